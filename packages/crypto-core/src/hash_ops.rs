//! Multi-part and single-shot hashing. Hash operations touch no key, so the
//! state machine is the whole story: Blank -> Active -> Blank.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::{HashAlg, HASH_MAX_SIZE};
use crate::core::CryptoCore;
use crate::error::{CoreResult, Error};
use crate::provider::CryptoProvider;
use crate::types::{fill_output, fill_tail};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

enum HashState<P: CryptoProvider> {
    Blank,
    Active { op: P::HashOp, alg: HashAlg },
}

/// Caller-allocated hash context. Create it Blank, pass it by reference to
/// the core's hash entry points.
pub struct HashOperation<P: CryptoProvider> {
    state: HashState<P>,
}

impl<P: CryptoProvider> HashOperation<P> {
    pub fn new() -> Self {
        HashOperation {
            state: HashState::Blank,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, HashState::Active { .. })
    }
}

impl<P: CryptoProvider> Default for HashOperation<P> {
    fn default() -> Self {
        HashOperation::new()
    }
}

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    pub fn hash_setup(&mut self, operation: &mut HashOperation<P>, alg: HashAlg) -> CoreResult<()> {
        if operation.is_active() {
            return Err(Error::BadState);
        }
        let op = self.provider.hash_setup(alg)?;
        operation.state = HashState::Active { op, alg };
        Ok(())
    }

    pub fn hash_update(&mut self, operation: &mut HashOperation<P>, input: &[u8]) -> CoreResult<()> {
        let result = match &mut operation.state {
            HashState::Blank => return Err(Error::BadState),
            HashState::Active { op, .. } => {
                if input.is_empty() {
                    return Ok(());
                }
                self.provider.hash_update(op, input)
            }
        };
        if result.is_err() {
            operation.state = HashState::Blank;
        }
        result
    }

    /// Write the digest and return its length. The context always returns to
    /// Blank, and unused output space is overwritten with the sentinel.
    pub fn hash_finish(
        &mut self,
        operation: &mut HashOperation<P>,
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = match std::mem::replace(&mut operation.state, HashState::Blank) {
            HashState::Blank => Err(Error::BadState),
            HashState::Active { op, alg } => {
                if out.len() < alg.hash_length() {
                    Err(Error::BufferTooSmall)
                } else {
                    self.provider.hash_finish(op, out)
                }
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

    /// Finish the operation and compare against an expected digest without
    /// exposing the computed value. Any mismatch is `InvalidSignature`.
    pub fn hash_verify(
        &mut self,
        operation: &mut HashOperation<P>,
        expected: &[u8],
    ) -> CoreResult<()> {
        let mut actual = [0u8; HASH_MAX_SIZE];
        let result = self.hash_finish(operation, &mut actual);
        let verdict = match result {
            Ok(length) => {
                if length == expected.len() && bool::from(actual[..length].ct_eq(expected)) {
                    Ok(())
                } else {
                    Err(Error::InvalidSignature)
                }
            }
            Err(err) => Err(err),
        };
        actual.zeroize();
        verdict
    }

    /// Duplicate an active hash context into a blank one.
    pub fn hash_clone(
        &mut self,
        source: &HashOperation<P>,
        target: &mut HashOperation<P>,
    ) -> CoreResult<()> {
        if target.is_active() {
            return Err(Error::BadState);
        }
        match &source.state {
            HashState::Blank => Err(Error::BadState),
            HashState::Active { op, alg } => {
                let cloned = self.provider.hash_clone_op(op)?;
                target.state = HashState::Active {
                    op: cloned,
                    alg: *alg,
                };
                Ok(())
            }
        }
    }

    /// Always succeeds; a no-op on a blank context.
    pub fn hash_abort(&mut self, operation: &mut HashOperation<P>) -> CoreResult<()> {
        operation.state = HashState::Blank;
        Ok(())
    }

    pub fn hash_compute(
        &mut self,
        alg: HashAlg,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let mut operation = HashOperation::new();
        self.hash_setup(&mut operation, alg)?;
        self.hash_update(&mut operation, input)?;
        self.hash_finish(&mut operation, out)
    }

    pub fn hash_compare(&mut self, alg: HashAlg, input: &[u8], expected: &[u8]) -> CoreResult<()> {
        let mut operation = HashOperation::new();
        self.hash_setup(&mut operation, alg)?;
        self.hash_update(&mut operation, input)?;
        self.hash_verify(&mut operation, expected)
    }
}
