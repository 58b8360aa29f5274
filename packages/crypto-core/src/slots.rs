//! Fixed-capacity key slot table with per-slot lock counting.

use crate::error::{CoreResult, Error};
use crate::types::{KeyAttributes, KeyId};
use log::debug;
use zeroize::Zeroizing;

/// One in-memory key record: attributes plus the material buffer. Material is
/// absent or fully present with its recorded length, never partial.
pub struct KeySlot {
    pub attributes: KeyAttributes,
    material: Option<Zeroizing<Vec<u8>>>,
    lock_count: usize,
}

impl KeySlot {
    fn new(attributes: KeyAttributes) -> KeySlot {
        KeySlot {
            attributes,
            material: None,
            lock_count: 0,
        }
    }

    pub fn set_material(&mut self, data: Zeroizing<Vec<u8>>) -> CoreResult<()> {
        if self.material.is_some() {
            return Err(Error::AlreadyExists);
        }
        self.material = Some(data);
        Ok(())
    }

    pub fn material(&self) -> CoreResult<&[u8]> {
        match &self.material {
            Some(data) => Ok(data),
            None => Err(Error::CorruptionDetected),
        }
    }
}

impl std::fmt::Debug for KeySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySlot")
            .field("attributes", &self.attributes)
            .field("material", &self.material.as_ref().map(|m| m.len()))
            .field("lock_count", &self.lock_count)
            .finish()
    }
}

enum SlotEntry {
    Free,
    Occupied(KeySlot),
}

pub struct SlotTable {
    slots: Vec<SlotEntry>,
}

impl SlotTable {
    pub fn new(capacity: usize) -> SlotTable {
        SlotTable {
            slots: (0..capacity).map(|_| SlotEntry::Free).collect(),
        }
    }

    pub fn find(&self, id: KeyId) -> Option<usize> {
        self.slots.iter().position(|entry| match entry {
            SlotEntry::Occupied(slot) => slot.attributes.id == id,
            SlotEntry::Free => false,
        })
    }

    /// Claim a free slot for a new key. Exhaustion is reported distinctly
    /// from a missing key.
    pub fn allocate(&mut self, attributes: KeyAttributes) -> CoreResult<usize> {
        let index = self
            .slots
            .iter()
            .position(|entry| matches!(entry, SlotEntry::Free));
        match index {
            Some(index) => {
                self.slots[index] = SlotEntry::Occupied(KeySlot::new(attributes));
                Ok(index)
            }
            None => {
                debug!("key slot table exhausted ({} slots)", self.slots.len());
                Err(Error::InsufficientMemory)
            }
        }
    }

    pub fn get(&self, index: usize) -> CoreResult<&KeySlot> {
        match self.slots.get(index) {
            Some(SlotEntry::Occupied(slot)) => Ok(slot),
            _ => Err(Error::CorruptionDetected),
        }
    }

    pub fn get_mut(&mut self, index: usize) -> CoreResult<&mut KeySlot> {
        match self.slots.get_mut(index) {
            Some(SlotEntry::Occupied(slot)) => Ok(slot),
            _ => Err(Error::CorruptionDetected),
        }
    }

    pub fn lock(&mut self, index: usize) -> CoreResult<()> {
        let slot = self.get_mut(index)?;
        slot.lock_count = slot
            .lock_count
            .checked_add(1)
            .ok_or(Error::CorruptionDetected)?;
        Ok(())
    }

    pub fn release(&mut self, index: usize) -> CoreResult<()> {
        let slot = self.get_mut(index)?;
        if slot.lock_count == 0 {
            return Err(Error::CorruptionDetected);
        }
        slot.lock_count -= 1;
        Ok(())
    }

    pub fn lock_count(&self, index: usize) -> CoreResult<usize> {
        Ok(self.get(index)?.lock_count)
    }

    /// Zeroize the slot's material and return it to the free pool. The
    /// stored copy of a persistent key is the caller's concern.
    pub fn wipe(&mut self, index: usize) -> CoreResult<()> {
        match self.slots.get_mut(index) {
            Some(entry) => {
                // Dropping the Zeroizing material wipes it.
                *entry = SlotEntry::Free;
                Ok(())
            }
            None => Err(Error::CorruptionDetected),
        }
    }

    pub fn wipe_all(&mut self) {
        for entry in &mut self.slots {
            *entry = SlotEntry::Free;
        }
    }
}
