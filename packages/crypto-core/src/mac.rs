//! Multi-part and single-shot MAC, with truncation policy enforced here and
//! the full-length tag computed by the provider.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::{Algorithm, MacAlg, MAC_MAX_SIZE};
use crate::core::CryptoCore;
use crate::error::{CoreResult, Error};
use crate::policy;
use crate::provider::CryptoProvider;
use crate::types::{fill_output, fill_tail, KeyId, Usage};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

enum MacState<P: CryptoProvider> {
    Blank,
    Active {
        op: P::MacOp,
        slot: usize,
        mac_length: usize,
        is_sign: bool,
    },
}

/// Caller-allocated MAC context. Holds the key slot locked from setup until
/// finish, verify, or abort.
pub struct MacOperation<P: CryptoProvider> {
    state: MacState<P>,
}

impl<P: CryptoProvider> MacOperation<P> {
    pub fn new() -> Self {
        MacOperation {
            state: MacState::Blank,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, MacState::Active { .. })
    }
}

impl<P: CryptoProvider> Default for MacOperation<P> {
    fn default() -> Self {
        MacOperation::new()
    }
}

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    /// Resolve the output length and check the key/algorithm combination.
    fn mac_validate(&self, slot: usize, alg: &MacAlg) -> CoreResult<usize> {
        let attributes = self.slots.get(slot)?.attributes;
        if !policy::mac_key_can_do(alg.base, attributes.key_type) {
            return Err(Error::InvalidArgument);
        }
        let full = alg.full_length(attributes.key_type);
        let resolved = alg.resolved_length(attributes.key_type);
        if resolved < 4 {
            // Short enough to brute-force; 32 bits is already marginal but
            // ancient protocols still use it.
            return Err(Error::NotSupported);
        }
        // There is no way to "truncate" to more than the full length.
        if resolved > full {
            return Err(Error::InvalidArgument);
        }
        Ok(resolved)
    }

    fn mac_setup(
        &mut self,
        operation: &mut MacOperation<P>,
        key: KeyId,
        alg: &MacAlg,
        is_sign: bool,
    ) -> CoreResult<()> {
        if operation.is_active() {
            return Err(Error::BadState);
        }
        Algorithm::Mac(*alg).require_concrete()?;
        let usage = if is_sign {
            Usage::SIGN_MESSAGE
        } else {
            Usage::VERIFY_MESSAGE
        };
        let slot = self.lock_slot_with_policy(key, usage, Some(&Algorithm::Mac(*alg)))?;
        let result = (|| {
            let mac_length = self.mac_validate(slot, alg)?;
            let keyed = self.slots.get(slot)?;
            let op = self
                .provider
                .mac_setup(&keyed.attributes, keyed.material()?, alg)?;
            Ok((op, mac_length))
        })();
        match result {
            Ok((op, mac_length)) => {
                operation.state = MacState::Active {
                    op,
                    slot,
                    mac_length,
                    is_sign,
                };
                Ok(())
            }
            Err(err) => {
                self.slots.release(slot)?;
                Err(err)
            }
        }
    }

    pub fn mac_sign_setup(
        &mut self,
        operation: &mut MacOperation<P>,
        key: KeyId,
        alg: &MacAlg,
    ) -> CoreResult<()> {
        self.mac_setup(operation, key, alg, true)
    }

    pub fn mac_verify_setup(
        &mut self,
        operation: &mut MacOperation<P>,
        key: KeyId,
        alg: &MacAlg,
    ) -> CoreResult<()> {
        self.mac_setup(operation, key, alg, false)
    }

    pub fn mac_update(&mut self, operation: &mut MacOperation<P>, input: &[u8]) -> CoreResult<()> {
        let result = match &mut operation.state {
            MacState::Blank => return Err(Error::BadState),
            MacState::Active { op, .. } => {
                if input.is_empty() {
                    return Ok(());
                }
                self.provider.mac_update(op, input)
            }
        };
        if result.is_err() {
            // A failed multipart operation is not retryable.
            let _ = self.mac_abort(operation);
        }
        result
    }

    /// Compute the (possibly truncated) tag into `out`. Trailing output space
    /// is sentinel-filled on success, the whole buffer on failure.
    pub fn mac_sign_finish(
        &mut self,
        operation: &mut MacOperation<P>,
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = match std::mem::replace(&mut operation.state, MacState::Blank) {
            MacState::Blank => Err(Error::BadState),
            MacState::Active {
                op,
                slot,
                mac_length,
                is_sign,
            } => {
                let result = (|| {
                    if !is_sign {
                        return Err(Error::BadState);
                    }
                    if out.len() < mac_length {
                        return Err(Error::BufferTooSmall);
                    }
                    let mut full = [0u8; MAC_MAX_SIZE];
                    self.provider.mac_finish(op, &mut full)?;
                    out[..mac_length].copy_from_slice(&full[..mac_length]);
                    full.zeroize();
                    Ok(mac_length)
                })();
                self.slots.release(slot)?;
                result
            }
        };
        match result {
            Ok(length) => {
                fill_tail(out, length);
                Ok(length)
            }
            Err(err) => {
                fill_output(out);
                Err(err)
            }
        }
    }

    /// Compare the expected tag against the internally computed one in
    /// constant time. The computed tag is never returned.
    pub fn mac_verify_finish(
        &mut self,
        operation: &mut MacOperation<P>,
        expected: &[u8],
    ) -> CoreResult<()> {
        match std::mem::replace(&mut operation.state, MacState::Blank) {
            MacState::Blank => Err(Error::BadState),
            MacState::Active {
                op,
                slot,
                mac_length,
                is_sign,
            } => {
                let result = (|| {
                    if is_sign {
                        return Err(Error::BadState);
                    }
                    if expected.len() != mac_length {
                        return Err(Error::InvalidSignature);
                    }
                    let mut full = [0u8; MAC_MAX_SIZE];
                    self.provider.mac_finish(op, &mut full)?;
                    let ok = bool::from(full[..mac_length].ct_eq(expected));
                    full.zeroize();
                    if ok {
                        Ok(())
                    } else {
                        Err(Error::InvalidSignature)
                    }
                })();
                self.slots.release(slot)?;
                result
            }
        }
    }

    /// Always succeeds; a no-op on a blank context.
    pub fn mac_abort(&mut self, operation: &mut MacOperation<P>) -> CoreResult<()> {
        if let MacState::Active { slot, .. } =
            std::mem::replace(&mut operation.state, MacState::Blank)
        {
            self.slots.release(slot)?;
        }
        Ok(())
    }

    pub fn mac_compute(
        &mut self,
        key: KeyId,
        alg: &MacAlg,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let mut operation = MacOperation::new();
        self.mac_sign_setup(&mut operation, key, alg)?;
        match self.mac_update(&mut operation, input) {
            Ok(()) => self.mac_sign_finish(&mut operation, out),
            Err(err) => {
                fill_output(out);
                Err(err)
            }
        }
    }

    pub fn mac_verify(
        &mut self,
        key: KeyId,
        alg: &MacAlg,
        input: &[u8],
        expected: &[u8],
    ) -> CoreResult<()> {
        let mut operation = MacOperation::new();
        self.mac_verify_setup(&mut operation, key, alg)?;
        self.mac_update(&mut operation, input)?;
        self.mac_verify_finish(&mut operation, expected)
    }
}
