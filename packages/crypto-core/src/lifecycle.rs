//! Key lifecycle: creation (import, generate, copy, derive-populate),
//! destruction, attribute queries, and export.
//!
//! Creation runs start -> populate -> finish, and any failure after start
//! wipes and frees the slot so a half-created key is never observable.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::core::CryptoCore;
use crate::error::{CoreResult, Error};
use crate::policy;
use crate::provider::CryptoProvider;
use crate::storage;
use crate::types::{
    fill_output, validate_ecc_bit_size, validate_unstructured_key_bit_size, KeyAttributes, KeyId,
    KeyType, Persistence, MAX_KEY_BITS,
};
use log::warn;
use zeroize::Zeroizing;

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    fn validate_key_attributes(&self, attributes: &KeyAttributes) -> CoreResult<()> {
        if !attributes.policy.usage.is_valid() {
            return Err(Error::InvalidArgument);
        }
        if attributes.bits > MAX_KEY_BITS {
            return Err(Error::NotSupported);
        }
        Ok(())
    }

    /// Allocate and lock a slot for a new key and stamp its metadata.
    /// On any later failure the caller must invoke `fail_key_creation`.
    pub(crate) fn start_key_creation(&mut self, attributes: &KeyAttributes) -> CoreResult<usize> {
        self.validate_key_attributes(attributes)?;
        if attributes.lifetime.is_volatile() {
            // Volatile keys get their identifier from the slot; a caller-chosen
            // one is contradictory.
            if attributes.id.0 != 0 {
                return Err(Error::InvalidArgument);
            }
        } else {
            if !attributes.id.is_persistent() {
                return Err(Error::InvalidArgument);
            }
            if self.slots.find(attributes.id).is_some() {
                return Err(Error::AlreadyExists);
            }
            let existing = self
                .storage
                .load(attributes.id)
                .map_err(|_| Error::GenericError)?;
            if existing.is_some() {
                return Err(Error::AlreadyExists);
            }
        }
        let index = self.slots.allocate(*attributes)?;
        if attributes.lifetime.is_volatile() {
            self.slots.get_mut(index)?.attributes.id = KeyId::for_volatile_slot(index);
        }
        self.slots.lock(index)?;
        Ok(index)
    }

    /// Persist (for non-volatile keys), unlock, and hand out the identifier.
    pub(crate) fn finish_key_creation(&mut self, index: usize) -> CoreResult<KeyId> {
        let slot = self.slots.get(index)?;
        let id = slot.attributes.id;
        if slot.attributes.lifetime.persistence != Persistence::Volatile {
            let record = storage::encode_key_record(&slot.attributes, slot.material()?)?;
            if let Err(err) = self.storage.save(id, &record) {
                warn!("storage save failed for key {:#010x}: {err:?}", id.0);
                self.fail_key_creation(index);
                return Err(Error::InsufficientStorage);
            }
        }
        self.slots.release(index)?;
        Ok(id)
    }

    /// Wipe and free a slot claimed by `start_key_creation`.
    pub(crate) fn fail_key_creation(&mut self, index: usize) {
        let _ = self.slots.wipe(index);
    }

    pub fn import_key(&mut self, attributes: &KeyAttributes, data: &[u8]) -> CoreResult<KeyId> {
        if data.is_empty() {
            return Err(Error::NotSupported);
        }
        let index = self.start_key_creation(attributes)?;
        match self.populate_import(index, data) {
            Ok(()) => self.finish_key_creation(index),
            Err(err) => {
                self.fail_key_creation(index);
                Err(err)
            }
        }
    }

    fn populate_import(&mut self, index: usize, data: &[u8]) -> CoreResult<()> {
        let attributes = self.slots.get(index)?.attributes;
        if attributes.key_type.is_unstructured() {
            let bits = data.len() * 8;
            validate_unstructured_key_bit_size(attributes.key_type, bits)?;
            if attributes.bits != 0 && attributes.bits != bits {
                return Err(Error::InvalidArgument);
            }
            let slot = self.slots.get_mut(index)?;
            slot.attributes.bits = bits;
            slot.set_material(Zeroizing::new(data.to_vec()))
        } else {
            let (material, bits) = self.provider.import_key(&attributes, data)?;
            if attributes.bits != 0 && attributes.bits != bits {
                return Err(Error::InvalidArgument);
            }
            let slot = self.slots.get_mut(index)?;
            slot.attributes.bits = bits;
            slot.set_material(Zeroizing::new(material))
        }
    }

    pub fn generate_key(&mut self, attributes: &KeyAttributes) -> CoreResult<KeyId> {
        if attributes.bits == 0 || attributes.key_type.is_public_key() {
            return Err(Error::InvalidArgument);
        }
        let index = self.start_key_creation(attributes)?;
        match self.populate_generate(index) {
            Ok(()) => self.finish_key_creation(index),
            Err(err) => {
                self.fail_key_creation(index);
                Err(err)
            }
        }
    }

    fn populate_generate(&mut self, index: usize) -> CoreResult<()> {
        let attributes = self.slots.get(index)?.attributes;
        if attributes.key_type.is_unstructured() {
            validate_unstructured_key_bit_size(attributes.key_type, attributes.bits)?;
            let mut material = Zeroizing::new(vec![0u8; attributes.bits / 8]);
            self.entropy.fill(&mut material)?;
            self.slots.get_mut(index)?.set_material(material)
        } else {
            if let KeyType::EccKeyPair(family) = attributes.key_type {
                validate_ecc_bit_size(family, attributes.bits)?;
            }
            let material = Zeroizing::new(self.provider.generate_key(&attributes)?);
            self.slots.get_mut(index)?.set_material(material)
        }
    }

    /// Create a new key from a locked source key whose policy permits copy.
    /// The new key's policy is the intersection of the source policy and the
    /// supplied constraint.
    pub fn copy_key(&mut self, source: KeyId, attributes: &KeyAttributes) -> CoreResult<KeyId> {
        let source_index = self.lock_slot_with_policy(source, crate::types::Usage::COPY, None)?;
        let result = self.copy_locked(source_index, attributes);
        self.slots.release(source_index)?;
        result
    }

    fn copy_locked(
        &mut self,
        source_index: usize,
        attributes: &KeyAttributes,
    ) -> CoreResult<KeyId> {
        let source_slot = self.slots.get(source_index)?;
        let source_attributes = source_slot.attributes;
        let material = Zeroizing::new(source_slot.material()?.to_vec());

        if attributes.key_type != source_attributes.key_type {
            return Err(Error::InvalidArgument);
        }
        if attributes.bits != 0 && attributes.bits != source_attributes.bits {
            return Err(Error::InvalidArgument);
        }
        // A copy across locations would require exposing plaintext material
        // outside both locations.
        if attributes.lifetime.location != source_attributes.lifetime.location {
            return Err(Error::NotPermitted);
        }
        let restricted = policy::intersect(
            &source_attributes.policy,
            &attributes.policy,
            source_attributes.key_type,
        )?;
        let actual = KeyAttributes {
            id: attributes.id,
            lifetime: attributes.lifetime,
            key_type: source_attributes.key_type,
            bits: source_attributes.bits,
            policy: restricted,
        };
        let index = self.start_key_creation(&actual)?;
        let populate = self.slots.get_mut(index)?.set_material(material);
        match populate {
            Ok(()) => self.finish_key_creation(index),
            Err(err) => {
                self.fail_key_creation(index);
                Err(err)
            }
        }
    }

    /// Destroy a key: fails `AlreadyInUse` while any other caller holds the
    /// slot, wipes memory unconditionally otherwise, and best-effort deletes
    /// the persistent copy.
    pub fn destroy_key(&mut self, id: KeyId) -> CoreResult<()> {
        let index = self.lock_slot(id)?;
        if self.slots.lock_count(index)? > 1 {
            self.slots.release(index)?;
            return Err(Error::AlreadyInUse);
        }
        let attributes = self.slots.get(index)?.attributes;
        let mut status = Ok(());
        match attributes.lifetime.persistence {
            Persistence::ReadOnly => {
                // Refuse to delete the provisioned copy; the in-memory copy
                // is still wiped below.
                warn!("refusing to destroy read-only key {:#010x}", id.0);
                status = Err(Error::NotPermitted);
            }
            Persistence::Persistent => {
                if let Err(err) = self.storage.delete(id) {
                    warn!("storage delete failed for key {:#010x}: {err:?}", id.0);
                    status = Err(Error::GenericError);
                }
            }
            Persistence::Volatile => {}
        }
        self.slots.wipe(index)?;
        status
    }

    pub fn get_key_attributes(&mut self, id: KeyId) -> CoreResult<KeyAttributes> {
        let index = self.lock_slot_with_policy(id, crate::types::Usage::NONE, None)?;
        let attributes = self.slots.get(index)?.attributes;
        self.slots.release(index)?;
        Ok(attributes)
    }

    /// Export key material. Requires the export usage bit, except for public
    /// keys which are always exportable.
    pub fn export_key(&mut self, id: KeyId, out: &mut [u8]) -> CoreResult<usize> {
        if out.is_empty() {
            return Err(Error::BufferTooSmall);
        }
        let index = self.lock_slot_with_policy(id, crate::types::Usage::EXPORT, None)?;
        let result = (|| {
            let slot = self.slots.get(index)?;
            let material = slot.material()?;
            if out.len() < material.len() {
                return Err(Error::BufferTooSmall);
            }
            out[..material.len()].copy_from_slice(material);
            Ok(material.len())
        })();
        self.slots.release(index)?;
        match result {
            Ok(length) => {
                out[length..].fill(0);
                Ok(length)
            }
            Err(err) => {
                fill_output(out);
                Err(err)
            }
        }
    }

    /// Export the public half of an asymmetric key. No usage bit required.
    pub fn export_public_key(&mut self, id: KeyId, out: &mut [u8]) -> CoreResult<usize> {
        if out.is_empty() {
            return Err(Error::BufferTooSmall);
        }
        let index = self.lock_slot_with_policy(id, crate::types::Usage::NONE, None)?;
        let result = (|| {
            let slot = self.slots.get(index)?;
            let attributes = slot.attributes;
            if !attributes.key_type.is_asymmetric() {
                return Err(Error::InvalidArgument);
            }
            let material = slot.material()?;
            if attributes.key_type.is_public_key() {
                if out.len() < material.len() {
                    return Err(Error::BufferTooSmall);
                }
                out[..material.len()].copy_from_slice(material);
                Ok(material.len())
            } else {
                self.provider.export_public_key(&attributes, material, out)
            }
        })();
        self.slots.release(index)?;
        match result {
            Ok(length) => {
                out[length..].fill(0);
                Ok(length)
            }
            Err(err) => {
                fill_output(out);
                Err(err)
            }
        }
    }
}
