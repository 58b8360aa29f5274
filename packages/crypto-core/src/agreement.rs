//! Key agreement: raw shared-secret computation and the combined form that
//! feeds the secret straight into a key-derivation context.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::{
    AgreementAlg, Algorithm, DerivationStep, RAW_AGREEMENT_MAX_SIZE,
};
use crate::core::CryptoCore;
use crate::derivation::DerivationOperation;
use crate::error::{CoreResult, Error};
use crate::provider::CryptoProvider;
use crate::types::{KeyId, KeyType, Usage};
use zeroize::Zeroizing;

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    /// Run the agreement named by the derivation context's algorithm and
    /// feed the shared secret into the context as the given input step.
    /// The intermediate secret lives only on this call's stack.
    pub fn key_agreement(
        &mut self,
        operation: &mut DerivationOperation<P>,
        step: DerivationStep,
        private_key: KeyId,
        peer_key: &[u8],
    ) -> CoreResult<()> {
        let alg = match operation.algorithm() {
            Some(Algorithm::KeyAgreement(agreement)) => agreement,
            Some(_) | None => return Err(Error::InvalidArgument),
        };
        let slot = self.lock_slot_with_policy(
            private_key,
            Usage::DERIVE,
            Some(&Algorithm::KeyAgreement(alg)),
        )?;
        let result = (|| {
            let keyed = self.slots.get(slot)?;
            let attributes = keyed.attributes;
            let material = Zeroizing::new(keyed.material()?.to_vec());
            let mut shared = Zeroizing::new([0u8; RAW_AGREEMENT_MAX_SIZE]);
            let length =
                self.provider
                    .key_agreement(&attributes, &material, alg.base, peer_key, &mut *shared)?;
            self.derivation_input_internal(
                operation,
                step,
                Some(KeyType::Derive),
                &shared[..length],
            )
        })();
        match result {
            Ok(()) => {
                if step == DerivationStep::Secret {
                    self.derivation_mark_can_output_key(operation);
                }
            }
            Err(_) => {
                let _ = self.derivation_abort(operation);
            }
        }
        self.slots.release(slot)?;
        result
    }

    /// Compute the shared secret directly into the caller's buffer. On any
    /// failure the buffer is filled with fresh random bytes rather than
    /// zeros or a constant, so a caller that skips the error check cannot
    /// end up protecting data with predictable material.
    pub fn raw_key_agreement(
        &mut self,
        alg: &AgreementAlg,
        private_key: KeyId,
        peer_key: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = (|| {
            if alg.kdf.is_some() {
                return Err(Error::InvalidArgument);
            }
            let slot = self.lock_slot_with_policy(
                private_key,
                Usage::DERIVE,
                Some(&Algorithm::KeyAgreement(*alg)),
            )?;
            let result = (|| {
                let keyed = self.slots.get(slot)?;
                let attributes = keyed.attributes;
                let material = Zeroizing::new(keyed.material()?.to_vec());
                self.provider
                    .key_agreement(&attributes, &material, alg.base, peer_key, out)
            })();
            self.slots.release(slot)?;
            result
        })();
        if result.is_err() {
            let _ = self.entropy.fill(out);
        }
        result
    }
}
