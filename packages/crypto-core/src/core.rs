//! The core service object: owns the slot table and the collaborator
//! adapters, and carries every public operation entry point.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::Algorithm;
use crate::error::{CoreResult, Error};
use crate::policy;
use crate::provider::CryptoProvider;
use crate::slots::SlotTable;
use crate::storage;
use crate::types::{KeyId, Usage};
use log::{debug, warn};

#[derive(Clone, Copy, Debug)]
pub struct CoreConfig {
    pub slot_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig { slot_capacity: 32 }
    }
}

pub struct CryptoCore<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> {
    pub(crate) provider: P,
    pub(crate) storage: S,
    pub(crate) entropy: E,
    pub(crate) slots: SlotTable,
}

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    pub fn new(provider: P, storage: S, entropy: E, config: CoreConfig) -> Self {
        CryptoCore {
            provider,
            storage,
            entropy,
            slots: SlotTable::new(config.slot_capacity),
        }
    }

    /// Wipe and release every slot. The instance is still usable afterwards;
    /// persistent keys reload lazily on next access.
    pub fn shutdown(&mut self) {
        self.slots.wipe_all();
    }

    /// Fill a buffer with random bytes from the random collaborator.
    pub fn generate_random(&mut self, out: &mut [u8]) -> CoreResult<()> {
        self.entropy.fill(out)
    }

    /// Find the slot for `id`, lazily loading a persistent key on first
    /// access, and take a lock on it.
    pub(crate) fn lock_slot(&mut self, id: KeyId) -> CoreResult<usize> {
        if id.0 == 0 {
            return Err(Error::InvalidArgument);
        }
        if let Some(index) = self.slots.find(id) {
            self.slots.lock(index)?;
            return Ok(index);
        }
        if !id.is_persistent() {
            return Err(Error::NotFound);
        }
        let record = self
            .storage
            .load(id)
            .map_err(|err| {
                warn!("storage load failed for key {:#010x}: {err:?}", id.0);
                Error::GenericError
            })?
            .ok_or(Error::NotFound)?;
        let (attributes, material) = storage::decode_key_record(&record)?;
        if attributes.id != id || attributes.lifetime.is_volatile() {
            return Err(Error::CorruptionDetected);
        }
        debug!("lazily loaded persistent key {:#010x}", id.0);
        let index = self.slots.allocate(attributes)?;
        if let Err(err) = self.slots.get_mut(index)?.set_material(material) {
            let _ = self.slots.wipe(index);
            return Err(err);
        }
        self.slots.lock(index)?;
        Ok(index)
    }

    /// Lock a slot and enforce its policy for the given usage and, when an
    /// algorithm is requested, for that algorithm. Public keys are treated
    /// as always exportable.
    pub(crate) fn lock_slot_with_policy(
        &mut self,
        id: KeyId,
        usage: Usage,
        alg: Option<&Algorithm>,
    ) -> CoreResult<usize> {
        let index = self.lock_slot(id)?;
        let slot = self.slots.get(index)?;
        let mut required = usage;
        if slot.attributes.key_type.is_public_key() {
            required = required.without(Usage::EXPORT);
        }
        let result = if !slot.attributes.policy.usage.contains(required) {
            Err(Error::NotPermitted)
        } else if let Some(alg) = alg {
            policy::permits(&slot.attributes.policy, slot.attributes.key_type, alg)
        } else {
            Ok(())
        };
        if let Err(err) = result {
            self.slots.release(index)?;
            return Err(err);
        }
        Ok(index)
    }
}

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> Drop for CryptoCore<P, S, E> {
    fn drop(&mut self) {
        self.slots.wipe_all();
    }
}
