//! Single-shot asymmetric signing and verification, over a message or a
//! precomputed hash.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::{Algorithm, SignAlg};
use crate::core::CryptoCore;
use crate::error::{CoreResult, Error};
use crate::provider::CryptoProvider;
use crate::types::{fill_output, fill_tail, KeyId, Usage};

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    fn sign_internal(
        &mut self,
        key: KeyId,
        is_message: bool,
        alg: &SignAlg,
        input: &[u8],
        signature: &mut [u8],
    ) -> CoreResult<usize> {
        Algorithm::Sign(*alg).require_concrete()?;
        if !is_message && !alg.supports_hash_input() {
            return Err(Error::InvalidArgument);
        }
        if signature.is_empty() {
            return Err(Error::BufferTooSmall);
        }
        let usage = if is_message {
            Usage::SIGN_MESSAGE
        } else {
            Usage::SIGN_HASH
        };
        let slot = self.lock_slot_with_policy(key, usage, Some(&Algorithm::Sign(*alg)))?;
        let result = (|| {
            let keyed = self.slots.get(slot)?;
            if !keyed.attributes.key_type.is_key_pair() {
                return Err(Error::InvalidArgument);
            }
            if is_message {
                self.provider
                    .sign_message(&keyed.attributes, keyed.material()?, alg, input, signature)
            } else {
                self.provider
                    .sign_hash(&keyed.attributes, keyed.material()?, alg, input, signature)
            }
        })();
        self.slots.release(slot)?;
        match result {
            Ok(length) => {
                fill_tail(signature, length);
                Ok(length)
            }
            Err(err) => {
                fill_output(signature);
                Err(err)
            }
        }
    }

    fn verify_internal(
        &mut self,
        key: KeyId,
        is_message: bool,
        alg: &SignAlg,
        input: &[u8],
        signature: &[u8],
    ) -> CoreResult<()> {
        Algorithm::Sign(*alg).require_concrete()?;
        if !is_message && !alg.supports_hash_input() {
            return Err(Error::InvalidArgument);
        }
        let usage = if is_message {
            Usage::VERIFY_MESSAGE
        } else {
            Usage::VERIFY_HASH
        };
        let slot = self.lock_slot_with_policy(key, usage, Some(&Algorithm::Sign(*alg)))?;
        let result = (|| {
            let keyed = self.slots.get(slot)?;
            if !keyed.attributes.key_type.is_asymmetric() {
                return Err(Error::InvalidArgument);
            }
            if is_message {
                self.provider.verify_message(
                    &keyed.attributes,
                    keyed.material()?,
                    alg,
                    input,
                    signature,
                )
            } else {
                self.provider.verify_hash(
                    &keyed.attributes,
                    keyed.material()?,
                    alg,
                    input,
                    signature,
                )
            }
        })();
        self.slots.release(slot)?;
        result
    }

    pub fn sign_message(
        &mut self,
        key: KeyId,
        alg: &SignAlg,
        message: &[u8],
        signature: &mut [u8],
    ) -> CoreResult<usize> {
        self.sign_internal(key, true, alg, message, signature)
    }

    pub fn verify_message(
        &mut self,
        key: KeyId,
        alg: &SignAlg,
        message: &[u8],
        signature: &[u8],
    ) -> CoreResult<()> {
        self.verify_internal(key, true, alg, message, signature)
    }

    pub fn sign_hash(
        &mut self,
        key: KeyId,
        alg: &SignAlg,
        hash: &[u8],
        signature: &mut [u8],
    ) -> CoreResult<usize> {
        self.sign_internal(key, false, alg, hash, signature)
    }

    pub fn verify_hash(
        &mut self,
        key: KeyId,
        alg: &SignAlg,
        hash: &[u8],
        signature: &[u8],
    ) -> CoreResult<()> {
        self.verify_internal(key, false, alg, hash, signature)
    }
}
