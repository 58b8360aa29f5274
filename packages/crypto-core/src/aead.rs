//! Multi-part and single-shot authenticated encryption. Nonce and declared
//! length bookkeeping live here; the provider owns the math and may buffer.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::{AeadAlg, Algorithm};
use crate::core::CryptoCore;
use crate::error::{CoreResult, Error};
use crate::provider::CryptoProvider;
use crate::types::{fill_output, fill_tail, KeyId, Usage};

pub const AEAD_NONCE_MAX_SIZE: usize = 12;
pub const AEAD_TAG_MAX_SIZE: usize = 16;

enum AeadState<P: CryptoProvider> {
    Blank,
    Active {
        op: P::AeadOp,
        slot: usize,
        alg: AeadAlg,
        is_encrypt: bool,
        nonce_set: bool,
        lengths_set: bool,
        ad_started: bool,
        body_started: bool,
        ad_remaining: usize,
        body_remaining: usize,
    },
}

/// Caller-allocated AEAD context. Holds the key slot locked from setup until
/// finish, verify, or abort.
pub struct AeadOperation<P: CryptoProvider> {
    state: AeadState<P>,
}

impl<P: CryptoProvider> AeadOperation<P> {
    pub fn new() -> Self {
        AeadOperation {
            state: AeadState::Blank,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, AeadState::Active { .. })
    }
}

impl<P: CryptoProvider> Default for AeadOperation<P> {
    fn default() -> Self {
        AeadOperation::new()
    }
}

fn check_aead_algorithm(alg: &AeadAlg) -> CoreResult<()> {
    Algorithm::Aead(*alg).require_concrete()?;
    if !alg.base.tag_length_is_valid(alg.tag_length) {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

fn check_nonce_length(alg: &AeadAlg, length: usize) -> CoreResult<()> {
    if length == alg.base.default_nonce_length() {
        Ok(())
    } else {
        Err(Error::InvalidArgument)
    }
}

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    fn aead_setup(
        &mut self,
        operation: &mut AeadOperation<P>,
        key: KeyId,
        alg: &AeadAlg,
        is_encrypt: bool,
    ) -> CoreResult<()> {
        if operation.is_active() {
            return Err(Error::BadState);
        }
        check_aead_algorithm(alg)?;
        let usage = if is_encrypt {
            Usage::ENCRYPT
        } else {
            Usage::DECRYPT
        };
        let slot = self.lock_slot_with_policy(key, usage, Some(&Algorithm::Aead(*alg)))?;
        let result = (|| {
            let keyed = self.slots.get(slot)?;
            self.provider
                .aead_setup(&keyed.attributes, keyed.material()?, alg, is_encrypt)
        })();
        match result {
            Ok(op) => {
                operation.state = AeadState::Active {
                    op,
                    slot,
                    alg: *alg,
                    is_encrypt,
                    nonce_set: false,
                    lengths_set: false,
                    ad_started: false,
                    body_started: false,
                    ad_remaining: 0,
                    body_remaining: 0,
                };
                Ok(())
            }
            Err(err) => {
                self.slots.release(slot)?;
                Err(err)
            }
        }
    }

    pub fn aead_encrypt_setup(
        &mut self,
        operation: &mut AeadOperation<P>,
        key: KeyId,
        alg: &AeadAlg,
    ) -> CoreResult<()> {
        self.aead_setup(operation, key, alg, true)
    }

    pub fn aead_decrypt_setup(
        &mut self,
        operation: &mut AeadOperation<P>,
        key: KeyId,
        alg: &AeadAlg,
    ) -> CoreResult<()> {
        self.aead_setup(operation, key, alg, false)
    }

    /// Declare the total additional-data and plaintext lengths up front.
    /// Must precede the nonce-independent data steps; the totals are then
    /// enforced during update.
    pub fn aead_set_lengths(
        &mut self,
        operation: &mut AeadOperation<P>,
        ad_length: usize,
        plaintext_length: usize,
    ) -> CoreResult<()> {
        match &mut operation.state {
            AeadState::Blank => Err(Error::BadState),
            AeadState::Active {
                lengths_set,
                ad_started,
                body_started,
                ad_remaining,
                body_remaining,
                ..
            } => {
                if *lengths_set || *ad_started || *body_started {
                    return Err(Error::BadState);
                }
                *ad_remaining = ad_length;
                *body_remaining = plaintext_length;
                *lengths_set = true;
                Ok(())
            }
        }
    }

    /// Draw a fresh random nonce, install it, and return it. Encrypt-side
    /// only: a decryptor must be given the peer's nonce.
    pub fn aead_generate_nonce(
        &mut self,
        operation: &mut AeadOperation<P>,
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = match &mut operation.state {
            AeadState::Blank => return Err(Error::BadState),
            AeadState::Active {
                op,
                alg,
                is_encrypt,
                nonce_set,
                ..
            } => {
                if *nonce_set || !*is_encrypt {
                    return Err(Error::BadState);
                }
                let length = alg.base.default_nonce_length();
                if out.len() < length {
                    Err(Error::BufferTooSmall)
                } else {
                    let mut nonce = [0u8; AEAD_NONCE_MAX_SIZE];
                    self.entropy.fill(&mut nonce[..length])?;
                    match self.provider.aead_set_nonce(op, &nonce[..length]) {
                        Ok(()) => {
                            out[..length].copy_from_slice(&nonce[..length]);
                            *nonce_set = true;
                            Ok(length)
                        }
                        Err(err) => Err(err),
                    }
                }
            }
        };
        if result.is_err() {
            let _ = self.aead_abort(operation);
        }
        result
    }

    pub fn aead_set_nonce(
        &mut self,
        operation: &mut AeadOperation<P>,
        nonce: &[u8],
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            AeadState::Blank => return Err(Error::BadState),
            AeadState::Active {
                op,
                alg,
                nonce_set,
                ..
            } => {
                if *nonce_set {
                    return Err(Error::BadState);
                }
                match check_nonce_length(alg, nonce.len())
                    .and_then(|()| self.provider.aead_set_nonce(op, nonce))
                {
                    Ok(()) => {
                        *nonce_set = true;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };
        if result.is_err() {
            let _ = self.aead_abort(operation);
        }
        result
    }

    pub fn aead_update_ad(
        &mut self,
        operation: &mut AeadOperation<P>,
        input: &[u8],
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            AeadState::Blank => return Err(Error::BadState),
            AeadState::Active {
                op,
                nonce_set,
                lengths_set,
                ad_started,
                body_started,
                ad_remaining,
                ..
            } => {
                if !*nonce_set || *body_started {
                    return Err(Error::BadState);
                }
                if input.is_empty() {
                    return Ok(());
                }
                if *lengths_set {
                    if *ad_remaining < input.len() {
                        return Err(Error::InvalidArgument);
                    }
                    *ad_remaining -= input.len();
                }
                *ad_started = true;
                self.provider.aead_update_ad(op, input)
            }
        };
        if result.is_err() {
            let _ = self.aead_abort(operation);
        }
        result
    }

    pub fn aead_update(
        &mut self,
        operation: &mut AeadOperation<P>,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = match &mut operation.state {
            AeadState::Blank => return Err(Error::BadState),
            AeadState::Active {
                op,
                nonce_set,
                lengths_set,
                body_started,
                ad_remaining,
                body_remaining,
                ..
            } => {
                if !*nonce_set {
                    return Err(Error::BadState);
                }
                if input.is_empty() {
                    return Ok(0);
                }
                if *lengths_set {
                    // All declared additional data must precede the body.
                    if *ad_remaining != 0 {
                        return Err(Error::InvalidArgument);
                    }
                    if *body_remaining < input.len() {
                        return Err(Error::InvalidArgument);
                    }
                    *body_remaining -= input.len();
                }
                *body_started = true;
                self.provider.aead_update(op, input, out)
            }
        };
        if result.is_err() {
            let _ = self.aead_abort(operation);
        }
        result
    }

    /// Encrypt-side finish: flush remaining ciphertext and emit the tag,
    /// truncated to the algorithm's tag length.
    pub fn aead_finish(
        &mut self,
        operation: &mut AeadOperation<P>,
        ciphertext: &mut [u8],
        tag: &mut [u8],
    ) -> CoreResult<(usize, usize)> {
        let result = match std::mem::replace(&mut operation.state, AeadState::Blank) {
            AeadState::Blank => Err(Error::BadState),
            AeadState::Active {
                op,
                slot,
                alg,
                is_encrypt,
                nonce_set,
                lengths_set,
                ad_remaining,
                body_remaining,
                ..
            } => {
                let result = (|| {
                    if !is_encrypt || !nonce_set {
                        return Err(Error::BadState);
                    }
                    if lengths_set && (ad_remaining != 0 || body_remaining != 0) {
                        return Err(Error::InvalidArgument);
                    }
                    if tag.len() < alg.tag_length {
                        return Err(Error::BufferTooSmall);
                    }
                    let mut full_tag = [0u8; AEAD_TAG_MAX_SIZE];
                    let (ct_length, _) = self.provider.aead_finish(op, ciphertext, &mut full_tag)?;
                    tag[..alg.tag_length].copy_from_slice(&full_tag[..alg.tag_length]);
                    Ok((ct_length, alg.tag_length))
                })();
                self.slots.release(slot)?;
                result
            }
        };
        match result {
            Ok((ct_length, tag_length)) => {
                fill_tail(ciphertext, ct_length);
                fill_tail(tag, tag_length);
                Ok((ct_length, tag_length))
            }
            Err(err) => {
                fill_output(ciphertext);
                fill_output(tag);
                Err(err)
            }
        }
    }

    /// Decrypt-side finish: release plaintext only if the tag authenticates.
    pub fn aead_verify(
        &mut self,
        operation: &mut AeadOperation<P>,
        plaintext: &mut [u8],
        tag: &[u8],
    ) -> CoreResult<usize> {
        let result = match std::mem::replace(&mut operation.state, AeadState::Blank) {
            AeadState::Blank => Err(Error::BadState),
            AeadState::Active {
                op,
                slot,
                alg,
                is_encrypt,
                nonce_set,
                lengths_set,
                ad_remaining,
                body_remaining,
                ..
            } => {
                let result = (|| {
                    if is_encrypt || !nonce_set {
                        return Err(Error::BadState);
                    }
                    if lengths_set && (ad_remaining != 0 || body_remaining != 0) {
                        return Err(Error::InvalidArgument);
                    }
                    if tag.len() != alg.tag_length {
                        return Err(Error::InvalidSignature);
                    }
                    self.provider.aead_verify(op, plaintext, tag)
                })();
                self.slots.release(slot)?;
                result
            }
        };
        match result {
            Ok(length) => {
                fill_tail(plaintext, length);
                Ok(length)
            }
            Err(err) => {
                fill_output(plaintext);
                Err(err)
            }
        }
    }

    /// Always succeeds; a no-op on a blank context.
    pub fn aead_abort(&mut self, operation: &mut AeadOperation<P>) -> CoreResult<()> {
        if let AeadState::Active { slot, .. } =
            std::mem::replace(&mut operation.state, AeadState::Blank)
        {
            self.slots.release(slot)?;
        }
        Ok(())
    }

    /// One-shot encryption with a caller-supplied nonce. Output is the
    /// ciphertext with the tag appended.
    pub fn aead_encrypt(
        &mut self,
        key: KeyId,
        alg: &AeadAlg,
        nonce: &[u8],
        additional_data: &[u8],
        plaintext: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let mut operation = AeadOperation::new();
        let result = (|| {
            check_aead_algorithm(alg)?;
            if out.len() < plaintext.len() + alg.tag_length {
                return Err(Error::BufferTooSmall);
            }
            self.aead_encrypt_setup(&mut operation, key, alg)?;
            self.aead_set_nonce(&mut operation, nonce)?;
            self.aead_update_ad(&mut operation, additional_data)?;
            let (body, tag_area) = out.split_at_mut(plaintext.len());
            let written = self.aead_update(&mut operation, plaintext, body)?;
            let (flushed, tag_length) = {
                let rest = &mut body[written..];
                self.aead_finish(&mut operation, rest, tag_area)?
            };
            if written + flushed != plaintext.len() {
                return Err(Error::CorruptionDetected);
            }
            Ok(plaintext.len() + tag_length)
        })();
        match result {
            Ok(length) => Ok(length),
            Err(err) => {
                let _ = self.aead_abort(&mut operation);
                fill_output(out);
                Err(err)
            }
        }
    }

    /// One-shot decryption of ciphertext-with-appended-tag.
    pub fn aead_decrypt(
        &mut self,
        key: KeyId,
        alg: &AeadAlg,
        nonce: &[u8],
        additional_data: &[u8],
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let mut operation = AeadOperation::new();
        let result = (|| {
            check_aead_algorithm(alg)?;
            if input.len() < alg.tag_length {
                return Err(Error::InvalidArgument);
            }
            let (ciphertext, tag) = input.split_at(input.len() - alg.tag_length);
            if out.len() < ciphertext.len() {
                return Err(Error::BufferTooSmall);
            }
            self.aead_decrypt_setup(&mut operation, key, alg)?;
            self.aead_set_nonce(&mut operation, nonce)?;
            self.aead_update_ad(&mut operation, additional_data)?;
            let written = self.aead_update(&mut operation, ciphertext, out)?;
            let flushed = {
                let rest = &mut out[written..];
                self.aead_verify(&mut operation, rest, tag)?
            };
            Ok(written + flushed)
        })();
        match result {
            Ok(length) => {
                fill_tail(out, length);
                Ok(length)
            }
            Err(err) => {
                let _ = self.aead_abort(&mut operation);
                fill_output(out);
                Err(err)
            }
        }
    }
}
