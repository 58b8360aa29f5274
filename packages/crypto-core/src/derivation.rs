//! The key-derivation state machine. Each family has a fixed input-step
//! grammar tracked by per-context flags; output draws down a capacity
//! counter, and running dry is a distinct, sticky condition
//! (`InsufficientData` until abort) so callers can tell "never set up"
//! from "ran out of output".

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::{Algorithm, DerivationStep, KdfAlg};
use crate::core::CryptoCore;
use crate::error::{CoreResult, Error};
use crate::provider::CryptoProvider;
use crate::types::{
    fill_output, validate_ecc_bit_size, validate_unstructured_key_bit_size, KeyAttributes, KeyId,
    KeyType, Usage,
};
use zeroize::Zeroizing;

/// Bound on the accept-or-retry loop when deriving a Weierstrass scalar.
/// A conforming provider accepts a candidate with overwhelming probability,
/// so reaching the bound means the provider is misbehaving.
const MAX_DERIVE_KEY_ATTEMPTS: usize = 16;

#[derive(Default, Clone, Copy)]
struct StepFlags {
    salt_set: bool,
    secret_set: bool,
    other_secret_set: bool,
    info_set: bool,
    label_set: bool,
    seed_set: bool,
    cost_set: bool,
    password_set: bool,
}

struct ActiveDerivation<P: CryptoProvider> {
    op: P::KdfOp,
    alg: Algorithm,
    kdf: KdfAlg,
    capacity: usize,
    flags: StepFlags,
    no_input: bool,
    can_output_key: bool,
}

enum DerivationState<P: CryptoProvider> {
    Blank,
    Active(ActiveDerivation<P>),
    /// Capacity ran out. The inner context is gone but the algorithm is
    /// remembered so further output keeps reporting `InsufficientData`
    /// rather than `BadState`.
    Exhausted {
        alg: Algorithm,
        can_output_key: bool,
    },
}

/// Caller-allocated key-derivation context.
pub struct DerivationOperation<P: CryptoProvider> {
    state: DerivationState<P>,
}

impl<P: CryptoProvider> DerivationOperation<P> {
    pub fn new() -> Self {
        DerivationOperation {
            state: DerivationState::Blank,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, DerivationState::Active(_))
    }

    /// The algorithm this context was set up with, if any. Survives
    /// exhaustion so diagnostics can still name the family.
    pub fn algorithm(&self) -> Option<Algorithm> {
        match &self.state {
            DerivationState::Blank => None,
            DerivationState::Active(active) => Some(active.alg),
            DerivationState::Exhausted { alg, .. } => Some(*alg),
        }
    }
}

impl<P: CryptoProvider> Default for DerivationOperation<P> {
    fn default() -> Self {
        DerivationOperation::new()
    }
}

/// Enforce the family's input-step grammar, marking the step as supplied.
/// Out-of-order or duplicate steps are `BadState`; steps the family never
/// uses are `InvalidArgument`.
fn advance_input(kdf: KdfAlg, flags: &mut StepFlags, step: DerivationStep) -> CoreResult<()> {
    use DerivationStep::*;
    match kdf {
        KdfAlg::Hkdf(_) => match step {
            Salt => {
                if flags.salt_set || flags.secret_set {
                    return Err(Error::BadState);
                }
                flags.salt_set = true;
            }
            Secret => {
                if flags.secret_set {
                    return Err(Error::BadState);
                }
                flags.secret_set = true;
            }
            Info => {
                if flags.info_set {
                    return Err(Error::BadState);
                }
                flags.info_set = true;
            }
            _ => return Err(Error::InvalidArgument),
        },
        KdfAlg::HkdfExtract(_) => match step {
            Salt => {
                if flags.salt_set {
                    return Err(Error::BadState);
                }
                flags.salt_set = true;
            }
            Secret => {
                if flags.secret_set || !flags.salt_set {
                    return Err(Error::BadState);
                }
                flags.secret_set = true;
            }
            _ => return Err(Error::InvalidArgument),
        },
        KdfAlg::HkdfExpand(_) => match step {
            Secret => {
                if flags.secret_set {
                    return Err(Error::BadState);
                }
                flags.secret_set = true;
            }
            Info => {
                if flags.info_set || !flags.secret_set {
                    return Err(Error::BadState);
                }
                flags.info_set = true;
            }
            _ => return Err(Error::InvalidArgument),
        },
        KdfAlg::Tls12Prf(_) | KdfAlg::Tls12PskToMs(_) => match step {
            Seed => {
                if flags.seed_set {
                    return Err(Error::BadState);
                }
                flags.seed_set = true;
            }
            OtherSecret => {
                if matches!(kdf, KdfAlg::Tls12Prf(_)) {
                    return Err(Error::InvalidArgument);
                }
                if !flags.seed_set || flags.secret_set || flags.other_secret_set {
                    return Err(Error::BadState);
                }
                flags.other_secret_set = true;
            }
            Secret => {
                if !flags.seed_set || flags.secret_set {
                    return Err(Error::BadState);
                }
                flags.secret_set = true;
            }
            Label => {
                if !flags.secret_set || flags.label_set {
                    return Err(Error::BadState);
                }
                flags.label_set = true;
            }
            _ => return Err(Error::InvalidArgument),
        },
        KdfAlg::Pbkdf2Hmac(_) => match step {
            Cost => {
                if flags.cost_set {
                    return Err(Error::BadState);
                }
                flags.cost_set = true;
            }
            // Salt may be supplied in several chunks; they concatenate.
            Salt => {
                if !flags.cost_set || flags.password_set {
                    return Err(Error::BadState);
                }
                flags.salt_set = true;
            }
            Password => {
                if !flags.salt_set || flags.password_set {
                    return Err(Error::BadState);
                }
                flags.password_set = true;
            }
            _ => return Err(Error::InvalidArgument),
        },
        KdfAlg::EcJpakeToPms => match step {
            Secret => {
                if flags.secret_set {
                    return Err(Error::BadState);
                }
                flags.secret_set = true;
            }
            _ => return Err(Error::InvalidArgument),
        },
    }
    Ok(())
}

/// Whether the family's terminal condition is met and output may begin.
fn output_ready(kdf: KdfAlg, flags: &StepFlags) -> bool {
    match kdf {
        KdfAlg::Hkdf(_) => flags.secret_set && flags.info_set,
        KdfAlg::HkdfExtract(_) => flags.secret_set,
        KdfAlg::HkdfExpand(_) => flags.info_set,
        KdfAlg::Tls12Prf(_) | KdfAlg::Tls12PskToMs(_) => flags.label_set,
        KdfAlg::Pbkdf2Hmac(_) => flags.password_set,
        KdfAlg::EcJpakeToPms => flags.secret_set,
    }
}

/// Secret steps accept derivation-typed key material; the other byte steps
/// accept raw-data keys. Data passed as plain bytes (`None`) is always
/// acceptable.
fn check_input_type(step: DerivationStep, source_type: Option<KeyType>) -> CoreResult<()> {
    let key_type = match source_type {
        None => return Ok(()),
        Some(key_type) => key_type,
    };
    use DerivationStep::*;
    match step {
        Secret | OtherSecret => {
            if key_type == KeyType::Derive {
                return Ok(());
            }
        }
        Salt | Info | Label | Seed | Cost | Password => {
            if key_type == KeyType::RawData {
                return Ok(());
            }
        }
    }
    Err(Error::InvalidArgument)
}

fn increment_be(data: &mut [u8]) {
    let mut carry = 1u32;
    for byte in data.iter_mut().rev() {
        carry += u32::from(*byte);
        *byte = carry as u8;
        carry >>= 8;
    }
}

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    /// Set up a derivation context from a derivation algorithm or a combined
    /// key-agreement-with-derivation algorithm.
    pub fn derivation_setup(
        &mut self,
        operation: &mut DerivationOperation<P>,
        alg: Algorithm,
    ) -> CoreResult<()> {
        if !matches!(operation.state, DerivationState::Blank) {
            return Err(Error::BadState);
        }
        let kdf = match alg {
            Algorithm::KeyDerivation(kdf) => kdf,
            Algorithm::KeyAgreement(agreement) => match agreement.kdf {
                Some(kdf) => kdf,
                // The raw form produces a secret directly and has no
                // multi-step context to set up.
                None => return Err(Error::InvalidArgument),
            },
            _ => return Err(Error::InvalidArgument),
        };
        let op = self.provider.derivation_setup(kdf)?;
        operation.state = DerivationState::Active(ActiveDerivation {
            op,
            alg,
            kdf,
            capacity: kdf.capacity(),
            flags: StepFlags::default(),
            no_input: false,
            can_output_key: false,
        });
        Ok(())
    }

    pub(crate) fn derivation_input_internal(
        &mut self,
        operation: &mut DerivationOperation<P>,
        step: DerivationStep,
        source_type: Option<KeyType>,
        data: &[u8],
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            DerivationState::Blank => return Err(Error::BadState),
            // Once output has begun (or the context ran dry), no further
            // input is valid; the failed input abandons the context.
            DerivationState::Exhausted { .. } => Err(Error::BadState),
            DerivationState::Active(active) => {
                if active.no_input {
                    Err(Error::BadState)
                } else {
                    advance_input(active.kdf, &mut active.flags, step)
                        .and_then(|()| check_input_type(step, source_type))
                        .and_then(|()| {
                            self.provider.derivation_input_bytes(&mut active.op, step, data)
                        })
                }
            }
        };
        if result.is_err() {
            operation.state = DerivationState::Blank;
        }
        result
    }

    pub fn derivation_input_bytes(
        &mut self,
        operation: &mut DerivationOperation<P>,
        step: DerivationStep,
        data: &[u8],
    ) -> CoreResult<()> {
        self.derivation_input_internal(operation, step, None, data)
    }

    /// Numeric input, used for the password-based cost/work-factor step.
    pub fn derivation_input_integer(
        &mut self,
        operation: &mut DerivationOperation<P>,
        step: DerivationStep,
        value: u64,
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            DerivationState::Blank => return Err(Error::BadState),
            DerivationState::Exhausted { .. } => Err(Error::BadState),
            DerivationState::Active(active) => {
                if active.no_input {
                    Err(Error::BadState)
                } else {
                    advance_input(active.kdf, &mut active.flags, step)
                        .and_then(|()| check_input_type(step, None))
                        .and_then(|()| {
                            self.provider
                                .derivation_input_integer(&mut active.op, step, value)
                        })
                }
            }
        };
        if result.is_err() {
            operation.state = DerivationState::Blank;
        }
        result
    }

    /// Feed key material into a step. Supplying the secret from a key object
    /// is what unlocks deriving new keys from this context.
    pub fn derivation_input_key(
        &mut self,
        operation: &mut DerivationOperation<P>,
        step: DerivationStep,
        key: KeyId,
    ) -> CoreResult<()> {
        let alg = match &operation.state {
            DerivationState::Blank => return Err(Error::BadState),
            DerivationState::Exhausted { alg, .. } => *alg,
            DerivationState::Active(active) => active.alg,
        };
        let slot = match self.lock_slot_with_policy(key, Usage::DERIVE, Some(&alg)) {
            Ok(slot) => slot,
            Err(err) => {
                operation.state = DerivationState::Blank;
                return Err(err);
            }
        };
        let (key_type, material) = {
            let keyed = self.slots.get(slot)?;
            (
                keyed.attributes.key_type,
                Zeroizing::new(keyed.material()?.to_vec()),
            )
        };
        if step == DerivationStep::Secret {
            if let DerivationState::Active(active) = &mut operation.state {
                active.can_output_key = true;
            }
        }
        let result = self.derivation_input_internal(operation, step, Some(key_type), &material);
        self.slots.release(slot)?;
        result
    }

    /// Draw output, decrementing capacity. Asking for more than remains
    /// abandons the inner context and leaves the operation exhausted:
    /// every further call keeps returning `InsufficientData` until abort.
    pub fn derivation_output_bytes(
        &mut self,
        operation: &mut DerivationOperation<P>,
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = (|| match &mut operation.state {
            DerivationState::Blank => Err(Error::BadState),
            DerivationState::Exhausted { .. } => Err(Error::InsufficientData),
            DerivationState::Active(active) => {
                if !active.no_input {
                    if !output_ready(active.kdf, &active.flags) {
                        return Err(Error::BadState);
                    }
                    active.no_input = true;
                }
                if out.len() <= active.capacity && active.capacity > 0 {
                    self.provider.derivation_output_bytes(&mut active.op, out)?;
                    active.capacity -= out.len();
                    Ok(out.len())
                } else {
                    Err(Error::InsufficientData)
                }
            }
        })();
        match result {
            Ok(length) => Ok(length),
            Err(Error::InsufficientData) => {
                // Abandon the inner context but keep the algorithm: the
                // exhausted condition is sticky until abort, so the caller
                // can tell it apart from a context that was never set up.
                if let DerivationState::Active(active) = &operation.state {
                    let alg = active.alg;
                    let can_output_key = active.can_output_key;
                    operation.state = DerivationState::Exhausted {
                        alg,
                        can_output_key,
                    };
                }
                fill_output(out);
                Err(Error::InsufficientData)
            }
            Err(err) => {
                operation.state = DerivationState::Blank;
                fill_output(out);
                Err(err)
            }
        }
    }

    /// Derive the same bytes internally and compare in constant time,
    /// without exposing them. Any mismatch is `InvalidSignature`.
    pub fn derivation_verify_bytes(
        &mut self,
        operation: &mut DerivationOperation<P>,
        expected: &[u8],
    ) -> CoreResult<()> {
        use subtle::ConstantTimeEq;
        let mut actual = Zeroizing::new(vec![0u8; expected.len()]);
        self.derivation_output_bytes(operation, &mut actual)?;
        if bool::from(actual.ct_eq(expected)) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }

    pub fn derivation_get_capacity(
        &mut self,
        operation: &DerivationOperation<P>,
    ) -> CoreResult<usize> {
        match &operation.state {
            DerivationState::Blank => Err(Error::BadState),
            DerivationState::Exhausted { .. } => Ok(0),
            DerivationState::Active(active) => Ok(active.capacity),
        }
    }

    /// Lower the remaining capacity. Raising it is invalid.
    pub fn derivation_set_capacity(
        &mut self,
        operation: &mut DerivationOperation<P>,
        capacity: usize,
    ) -> CoreResult<()> {
        match &mut operation.state {
            DerivationState::Blank => Err(Error::BadState),
            DerivationState::Exhausted { .. } => {
                if capacity > 0 {
                    Err(Error::InvalidArgument)
                } else {
                    Ok(())
                }
            }
            DerivationState::Active(active) => {
                if capacity > active.capacity {
                    Err(Error::InvalidArgument)
                } else {
                    active.capacity = capacity;
                    Ok(())
                }
            }
        }
    }

    /// Always succeeds; a no-op on a blank context.
    pub fn derivation_abort(&mut self, operation: &mut DerivationOperation<P>) -> CoreResult<()> {
        operation.state = DerivationState::Blank;
        Ok(())
    }

    pub(crate) fn derivation_mark_can_output_key(&mut self, operation: &mut DerivationOperation<P>) {
        if let DerivationState::Active(active) = &mut operation.state {
            active.can_output_key = true;
        }
    }

    /// Create a new key whose material is drawn from the derivation context.
    pub fn derivation_output_key(
        &mut self,
        attributes: &KeyAttributes,
        operation: &mut DerivationOperation<P>,
    ) -> CoreResult<KeyId> {
        if attributes.bits == 0 {
            return Err(Error::InvalidArgument);
        }
        let can_output_key = match &operation.state {
            DerivationState::Blank => return Err(Error::BadState),
            DerivationState::Exhausted {
                can_output_key, ..
            } => *can_output_key,
            DerivationState::Active(active) => active.can_output_key,
        };
        // Only material that came from a key object (or an agreement) may
        // become a key again.
        if !can_output_key {
            return Err(Error::NotPermitted);
        }
        let index = self.start_key_creation(attributes)?;
        match self.derive_key_material(operation, index) {
            Ok(()) => self.finish_key_creation(index),
            Err(err) => {
                self.fail_key_creation(index);
                Err(err)
            }
        }
    }

    fn derive_key_material(
        &mut self,
        operation: &mut DerivationOperation<P>,
        index: usize,
    ) -> CoreResult<()> {
        let attributes = self.slots.get(index)?.attributes;
        if attributes.key_type.is_public_key() {
            return Err(Error::InvalidArgument);
        }
        let bits = attributes.bits;
        if attributes.key_type.is_unstructured() {
            if bits % 8 != 0 {
                return Err(Error::InvalidArgument);
            }
            validate_unstructured_key_bit_size(attributes.key_type, bits)?;
            let mut data = Zeroizing::new(vec![0u8; bits / 8]);
            self.derivation_output_bytes(operation, &mut data)?;
            return self.slots.get_mut(index)?.set_material(data);
        }
        let family = match attributes.key_type {
            KeyType::EccKeyPair(family) => family,
            _ => return Err(Error::NotSupported),
        };
        validate_ecc_bit_size(family, bits)?;
        let bytes = bits.div_ceil(8);
        if !family.is_weierstrass() {
            let mut data = Zeroizing::new(vec![0u8; bytes]);
            self.derivation_output_bytes(operation, &mut data)?;
            let (material, actual_bits) = self.provider.import_key(&attributes, &data)?;
            if actual_bits != bits {
                return Err(Error::InvalidArgument);
            }
            return self
                .slots
                .get_mut(index)?
                .set_material(Zeroizing::new(material));
        }
        // Weierstrass curves: mask the candidate to the curve width, add one
        // (increment-with-carry), and retry with fresh output until the
        // provider accepts the scalar. Bounded, unlike the classical
        // formulation, so a broken provider cannot spin forever.
        for _ in 0..MAX_DERIVE_KEY_ATTEMPTS {
            let mut data = Zeroizing::new(vec![0u8; bytes]);
            self.derivation_output_bytes(operation, &mut data)?;
            if bits == 521 {
                data[0] &= 0x01;
            }
            increment_be(&mut data);
            match self.provider.import_key(&attributes, &data) {
                Ok((material, actual_bits)) => {
                    if actual_bits != bits {
                        return Err(Error::InvalidArgument);
                    }
                    return self
                        .slots
                        .get_mut(index)?
                        .set_material(Zeroizing::new(material));
                }
                Err(Error::InvalidArgument) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error::GenericError)
    }
}
