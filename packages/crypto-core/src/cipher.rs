//! Multi-part and single-shot symmetric ciphers. The IV discipline lives
//! here: an IV-requiring algorithm cannot stream data until an IV is set,
//! and the one-shot encrypt generates a fresh IV and prepends it.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::{Algorithm, CipherAlg};
use crate::core::CryptoCore;
use crate::error::{CoreResult, Error};
use crate::provider::CryptoProvider;
use crate::types::{fill_output, fill_tail, KeyId, Usage};

pub const CIPHER_IV_MAX_SIZE: usize = 16;

enum CipherState<P: CryptoProvider> {
    Blank,
    Active {
        op: P::CipherOp,
        slot: usize,
        iv_required: bool,
        iv_set: bool,
        default_iv_length: usize,
        is_encrypt: bool,
    },
}

/// Caller-allocated cipher context. Holds the key slot locked from setup
/// until finish or abort.
pub struct CipherOperation<P: CryptoProvider> {
    state: CipherState<P>,
}

impl<P: CryptoProvider> CipherOperation<P> {
    pub fn new() -> Self {
        CipherOperation {
            state: CipherState::Blank,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, CipherState::Active { .. })
    }
}

impl<P: CryptoProvider> Default for CipherOperation<P> {
    fn default() -> Self {
        CipherOperation::new()
    }
}

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    fn cipher_setup(
        &mut self,
        operation: &mut CipherOperation<P>,
        key: KeyId,
        alg: CipherAlg,
        is_encrypt: bool,
    ) -> CoreResult<()> {
        if operation.is_active() {
            return Err(Error::BadState);
        }
        let usage = if is_encrypt {
            Usage::ENCRYPT
        } else {
            Usage::DECRYPT
        };
        let slot = self.lock_slot_with_policy(key, usage, Some(&Algorithm::Cipher(alg)))?;
        let result = (|| {
            let keyed = self.slots.get(slot)?;
            let block = keyed.attributes.key_type.block_length();
            if block <= 1 {
                return Err(Error::InvalidArgument);
            }
            let op = self
                .provider
                .cipher_setup(&keyed.attributes, keyed.material()?, alg, is_encrypt)?;
            Ok((op, block))
        })();
        match result {
            Ok((op, block)) => {
                operation.state = CipherState::Active {
                    op,
                    slot,
                    iv_required: true,
                    iv_set: false,
                    default_iv_length: block,
                    is_encrypt,
                };
                Ok(())
            }
            Err(err) => {
                self.slots.release(slot)?;
                Err(err)
            }
        }
    }

    pub fn cipher_encrypt_setup(
        &mut self,
        operation: &mut CipherOperation<P>,
        key: KeyId,
        alg: CipherAlg,
    ) -> CoreResult<()> {
        self.cipher_setup(operation, key, alg, true)
    }

    pub fn cipher_decrypt_setup(
        &mut self,
        operation: &mut CipherOperation<P>,
        key: KeyId,
        alg: CipherAlg,
    ) -> CoreResult<()> {
        self.cipher_setup(operation, key, alg, false)
    }

    /// Draw a fresh random IV, install it, and return it to the caller.
    pub fn cipher_generate_iv(
        &mut self,
        operation: &mut CipherOperation<P>,
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = match &mut operation.state {
            CipherState::Blank => return Err(Error::BadState),
            CipherState::Active {
                op,
                iv_required,
                iv_set,
                default_iv_length,
                ..
            } => {
                if *iv_set || !*iv_required {
                    return Err(Error::BadState);
                }
                let length = *default_iv_length;
                if out.len() < length {
                    Err(Error::BufferTooSmall)
                } else {
                    let mut iv = [0u8; CIPHER_IV_MAX_SIZE];
                    self.entropy.fill(&mut iv[..length])?;
                    match self.provider.cipher_set_iv(op, &iv[..length]) {
                        Ok(()) => {
                            out[..length].copy_from_slice(&iv[..length]);
                            *iv_set = true;
                            Ok(length)
                        }
                        Err(err) => Err(err),
                    }
                }
            }
        };
        if result.is_err() {
            let _ = self.cipher_abort(operation);
        }
        result
    }

    pub fn cipher_set_iv(
        &mut self,
        operation: &mut CipherOperation<P>,
        iv: &[u8],
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            CipherState::Blank => return Err(Error::BadState),
            CipherState::Active {
                op,
                iv_required,
                iv_set,
                ..
            } => {
                if *iv_set || !*iv_required {
                    return Err(Error::BadState);
                }
                match self.provider.cipher_set_iv(op, iv) {
                    Ok(()) => {
                        *iv_set = true;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };
        if result.is_err() {
            let _ = self.cipher_abort(operation);
        }
        result
    }

    /// Stream data through the cipher. Output may lag input by up to one
    /// block while the provider buffers partial blocks.
    pub fn cipher_update(
        &mut self,
        operation: &mut CipherOperation<P>,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = match &mut operation.state {
            CipherState::Blank => return Err(Error::BadState),
            CipherState::Active {
                op,
                iv_required,
                iv_set,
                ..
            } => {
                if *iv_required && !*iv_set {
                    return Err(Error::BadState);
                }
                if input.is_empty() {
                    return Ok(0);
                }
                self.provider.cipher_update(op, input, out)
            }
        };
        if result.is_err() {
            let _ = self.cipher_abort(operation);
        }
        result
    }

    pub fn cipher_finish(
        &mut self,
        operation: &mut CipherOperation<P>,
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = match std::mem::replace(&mut operation.state, CipherState::Blank) {
            CipherState::Blank => Err(Error::BadState),
            CipherState::Active {
                op,
                slot,
                iv_required,
                iv_set,
                ..
            } => {
                let result = if iv_required && !iv_set {
                    Err(Error::BadState)
                } else {
                    self.provider.cipher_finish(op, out)
                };
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

    /// Always succeeds; a no-op on a blank context.
    pub fn cipher_abort(&mut self, operation: &mut CipherOperation<P>) -> CoreResult<()> {
        if let CipherState::Active { slot, .. } =
            std::mem::replace(&mut operation.state, CipherState::Blank)
        {
            self.slots.release(slot)?;
        }
        Ok(())
    }

    /// One-shot encryption. A fresh IV is generated and prepended to the
    /// ciphertext in `out`.
    pub fn cipher_encrypt(
        &mut self,
        key: KeyId,
        alg: CipherAlg,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let mut operation = CipherOperation::new();
        let result = (|| {
            self.cipher_encrypt_setup(&mut operation, key, alg)?;
            let iv_length = match &operation.state {
                CipherState::Active {
                    default_iv_length, ..
                } => *default_iv_length,
                CipherState::Blank => return Err(Error::CorruptionDetected),
            };
            if out.len() < iv_length {
                let _ = self.cipher_abort(&mut operation);
                return Err(Error::BufferTooSmall);
            }
            let (iv_out, rest) = out.split_at_mut(iv_length);
            let n = self.cipher_generate_iv(&mut operation, iv_out)?;
            let mut written = self.cipher_update(&mut operation, input, rest)?;
            written += {
                let tail = &mut rest[written..];
                self.cipher_finish(&mut operation, tail)?
            };
            Ok(n + written)
        })();
        match result {
            Ok(length) => {
                fill_tail(out, length);
                Ok(length)
            }
            Err(err) => {
                let _ = self.cipher_abort(&mut operation);
                fill_output(out);
                Err(err)
            }
        }
    }

    /// One-shot decryption of an IV-prefixed ciphertext.
    pub fn cipher_decrypt(
        &mut self,
        key: KeyId,
        alg: CipherAlg,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let mut operation = CipherOperation::new();
        let result = (|| {
            self.cipher_decrypt_setup(&mut operation, key, alg)?;
            let iv_length = match &operation.state {
                CipherState::Active {
                    default_iv_length, ..
                } => *default_iv_length,
                CipherState::Blank => return Err(Error::CorruptionDetected),
            };
            if input.len() < iv_length {
                let _ = self.cipher_abort(&mut operation);
                return Err(Error::InvalidArgument);
            }
            let (iv, ciphertext) = input.split_at(iv_length);
            self.cipher_set_iv(&mut operation, iv)?;
            let mut written = self.cipher_update(&mut operation, ciphertext, out)?;
            written += {
                let tail = &mut out[written..];
                self.cipher_finish(&mut operation, tail)?
            };
            Ok(written)
        })();
        match result {
            Ok(length) => {
                fill_tail(out, length);
                Ok(length)
            }
            Err(err) => {
                let _ = self.cipher_abort(&mut operation);
                fill_output(out);
                Err(err)
            }
        }
    }
}
