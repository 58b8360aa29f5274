//! Password-authenticated key exchange dispatch. Each protocol's message
//! order is a static sequence table (position -> allowed steps, acting side,
//! terminal flag); the dispatcher walks the table and hands the math to the
//! provider. The resulting key leaves only through a key-derivation context.

use crate::adapters::{EntropyAdapter, StorageAdapter};
use crate::algorithm::{Algorithm, DerivationStep, HashAlg, PakeAlg, HASH_MAX_SIZE};
use crate::core::CryptoCore;
use crate::derivation::DerivationOperation;
use crate::error::{CoreResult, Error};
use crate::provider::CryptoProvider;
use crate::types::{KeyId, KeyType, Usage};
use zeroize::Zeroizing;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PakePrimitive {
    EccP256,
    Dh3072,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PakeSuite {
    pub alg: PakeAlg,
    pub hash: HashAlg,
    pub primitive: PakePrimitive,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PakeRole {
    /// Client, prover, or the party that opens the exchange.
    First,
    /// Server or verifier.
    Second,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PakeStep {
    KeyShare,
    ZkPublic,
    ZkProof,
    Confirm,
    Salt,
}

/// Which party supplies the message at a given sequence position.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    First,
    Second,
    Either,
}

struct SeqEntry {
    steps: &'static [PakeStep],
    side: Side,
    last: bool,
}

const fn entry(steps: &'static [PakeStep], side: Side, last: bool) -> SeqEntry {
    SeqEntry { steps, side, last }
}

/// J-PAKE: two zero-knowledge rounds of (share, public, proof) from each
/// party, then one more from each. The direction of the opening position of
/// each output block (0 and 12) fixes which party is "first".
const JPAKE_SEQUENCE: [SeqEntry; 18] = {
    const S: &[PakeStep] = &[PakeStep::KeyShare];
    const P: &[PakeStep] = &[PakeStep::ZkPublic];
    const Z: &[PakeStep] = &[PakeStep::ZkProof];
    [
        entry(S, Side::First, false),
        entry(P, Side::First, false),
        entry(Z, Side::First, false),
        entry(S, Side::First, false),
        entry(P, Side::First, false),
        entry(Z, Side::First, false),
        entry(S, Side::Second, false),
        entry(P, Side::Second, false),
        entry(Z, Side::Second, false),
        entry(S, Side::Second, false),
        entry(P, Side::Second, false),
        entry(Z, Side::Second, false),
        entry(S, Side::First, false),
        entry(P, Side::First, false),
        entry(Z, Side::First, false),
        entry(S, Side::Second, false),
        entry(P, Side::Second, false),
        entry(Z, Side::Second, true),
    ]
};

/// SPAKE2+: shareP, shareV, confirmV, confirmP.
const SPAKE2P_SEQUENCE: [SeqEntry; 4] = [
    entry(&[PakeStep::KeyShare], Side::First, false),
    entry(&[PakeStep::KeyShare], Side::Second, false),
    entry(&[PakeStep::Confirm], Side::Second, false),
    entry(&[PakeStep::Confirm], Side::First, true),
];

/// SRP-6: salt and the two key shares in any interleaving, then the client
/// proof, then the server proof.
const SRP_SEQUENCE: [SeqEntry; 5] = [
    entry(&[PakeStep::Salt, PakeStep::KeyShare], Side::Either, false),
    entry(&[PakeStep::Salt, PakeStep::KeyShare], Side::Either, false),
    entry(&[PakeStep::Salt, PakeStep::KeyShare], Side::Either, false),
    entry(&[PakeStep::Confirm], Side::First, false),
    entry(&[PakeStep::Confirm], Side::Second, true),
];

fn sequence_table(alg: PakeAlg) -> &'static [SeqEntry] {
    match alg {
        PakeAlg::Jpake => &JPAKE_SEQUENCE,
        PakeAlg::Spake2p => &SPAKE2P_SEQUENCE,
        PakeAlg::Srp6 => &SRP_SEQUENCE,
    }
}

fn step_in_alphabet(alg: PakeAlg, step: PakeStep) -> bool {
    match alg {
        PakeAlg::Jpake => matches!(
            step,
            PakeStep::KeyShare | PakeStep::ZkPublic | PakeStep::ZkProof
        ),
        PakeAlg::Spake2p => matches!(step, PakeStep::KeyShare | PakeStep::Confirm),
        PakeAlg::Srp6 => matches!(step, PakeStep::Salt | PakeStep::KeyShare | PakeStep::Confirm),
    }
}

struct ActivePake<P: CryptoProvider> {
    op: P::PakeOp,
    alg: PakeAlg,
    sequence: usize,
    role_set: bool,
    user_set: bool,
    peer_set: bool,
    password_set: bool,
    started: bool,
    is_second: bool,
    done: bool,
}

enum PakeState<P: CryptoProvider> {
    Blank,
    Active(ActivePake<P>),
}

/// Caller-allocated PAKE context.
pub struct PakeOperation<P: CryptoProvider> {
    state: PakeState<P>,
}

impl<P: CryptoProvider> PakeOperation<P> {
    pub fn new() -> Self {
        PakeOperation {
            state: PakeState::Blank,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, PakeState::Active(_))
    }
}

impl<P: CryptoProvider> Default for PakeOperation<P> {
    fn default() -> Self {
        PakeOperation::new()
    }
}

/// Validate a message at the current sequence position. `acting_first` says
/// whether this message belongs to the first party (for output, the local
/// party; for input, the peer). Returns whether the terminal position was
/// just consumed.
fn check_sequence(
    alg: PakeAlg,
    sequence: usize,
    step: PakeStep,
    acting_first: bool,
) -> CoreResult<bool> {
    if !step_in_alphabet(alg, step) {
        return Err(Error::InvalidArgument);
    }
    let table = sequence_table(alg);
    let entry = table.get(sequence).ok_or(Error::BadState)?;
    match entry.side {
        Side::First => {
            if !acting_first {
                return Err(Error::BadState);
            }
        }
        Side::Second => {
            if acting_first {
                return Err(Error::BadState);
            }
        }
        Side::Either => {}
    }
    if !entry.steps.contains(&step) {
        // J-PAKE's three-step rounds make a wrong round a state error; the
        // fixed-shape protocols treat it as a malformed request.
        return match alg {
            PakeAlg::Jpake => Err(Error::BadState),
            PakeAlg::Spake2p | PakeAlg::Srp6 => Err(Error::InvalidArgument),
        };
    }
    Ok(entry.last)
}

impl<P: CryptoProvider, S: StorageAdapter, E: EntropyAdapter> CryptoCore<P, S, E> {
    pub fn pake_setup(
        &mut self,
        operation: &mut PakeOperation<P>,
        suite: &PakeSuite,
    ) -> CoreResult<()> {
        if operation.is_active() {
            return Err(Error::BadState);
        }
        let op = self.provider.pake_setup(suite)?;
        operation.state = PakeState::Active(ActivePake {
            op,
            alg: suite.alg,
            sequence: 0,
            role_set: false,
            user_set: false,
            peer_set: false,
            password_set: false,
            started: false,
            is_second: false,
            done: false,
        });
        Ok(())
    }

    pub fn pake_set_role(
        &mut self,
        operation: &mut PakeOperation<P>,
        role: PakeRole,
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            PakeState::Blank => return Err(Error::BadState),
            PakeState::Active(active) => {
                if active.role_set || active.started {
                    return Err(Error::BadState);
                }
                match self.provider.pake_set_role(&mut active.op, role) {
                    Ok(()) => {
                        if role == PakeRole::Second {
                            active.is_second = true;
                        }
                        active.role_set = true;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };
        if result.is_err() {
            let _ = self.pake_abort(operation);
        }
        result
    }

    pub fn pake_set_user(
        &mut self,
        operation: &mut PakeOperation<P>,
        user_id: &[u8],
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            PakeState::Blank => return Err(Error::BadState),
            PakeState::Active(active) => {
                if active.user_set || active.started {
                    return Err(Error::BadState);
                }
                if user_id.is_empty() {
                    return Err(Error::InvalidArgument);
                }
                // SPAKE2+ fixes the setter order: role first, and the
                // verifier identifies its peer before itself.
                if active.alg == PakeAlg::Spake2p
                    && (!active.role_set || (active.is_second && !active.peer_set))
                {
                    return Err(Error::BadState);
                }
                match self.provider.pake_set_user(&mut active.op, user_id) {
                    Ok(()) => {
                        active.user_set = true;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };
        if result.is_err() {
            let _ = self.pake_abort(operation);
        }
        result
    }

    pub fn pake_set_peer(
        &mut self,
        operation: &mut PakeOperation<P>,
        peer_id: &[u8],
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            PakeState::Blank => return Err(Error::BadState),
            PakeState::Active(active) => {
                if active.peer_set || active.started {
                    return Err(Error::BadState);
                }
                if peer_id.is_empty() {
                    return Err(Error::InvalidArgument);
                }
                if active.alg == PakeAlg::Spake2p
                    && (!active.role_set || (!active.is_second && !active.user_set))
                {
                    return Err(Error::BadState);
                }
                match self.provider.pake_set_peer(&mut active.op, peer_id) {
                    Ok(()) => {
                        active.peer_set = true;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };
        if result.is_err() {
            let _ = self.pake_abort(operation);
        }
        result
    }

    /// Bind the shared password to the exchange. The key must be a password
    /// key whose policy permits this PAKE algorithm for derivation.
    pub fn pake_set_password_key(
        &mut self,
        operation: &mut PakeOperation<P>,
        password: KeyId,
    ) -> CoreResult<()> {
        let alg = match &operation.state {
            PakeState::Blank => return Err(Error::BadState),
            PakeState::Active(active) => {
                if active.password_set || active.started {
                    return Err(Error::BadState);
                }
                if active.alg == PakeAlg::Spake2p
                    && (!active.role_set || !active.user_set || !active.peer_set)
                {
                    return Err(Error::BadState);
                }
                active.alg
            }
        };
        let result = (|| {
            let slot =
                self.lock_slot_with_policy(password, Usage::DERIVE, Some(&Algorithm::Pake(alg)))?;
            let result = (|| {
                let keyed = self.slots.get(slot)?;
                let attributes = keyed.attributes;
                if !matches!(
                    attributes.key_type,
                    KeyType::Password | KeyType::PasswordHash
                ) {
                    return Err(Error::InvalidArgument);
                }
                let material = Zeroizing::new(keyed.material()?.to_vec());
                match &mut operation.state {
                    PakeState::Active(active) => {
                        self.provider
                            .pake_set_password(&mut active.op, &attributes, &material)?;
                        active.password_set = true;
                        Ok(())
                    }
                    PakeState::Blank => Err(Error::CorruptionDetected),
                }
            })();
            self.slots.release(slot)?;
            result
        })();
        if result.is_err() {
            let _ = self.pake_abort(operation);
        }
        result
    }

    /// Produce the message for the current sequence position.
    pub fn pake_output(
        &mut self,
        operation: &mut PakeOperation<P>,
        step: PakeStep,
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let result = match &mut operation.state {
            PakeState::Blank => return Err(Error::BadState),
            PakeState::Active(active) => {
                if !active.password_set {
                    return Err(Error::BadState);
                }
                match active.alg {
                    PakeAlg::Jpake => {
                        if !active.user_set || !active.peer_set {
                            return Err(Error::BadState);
                        }
                        // Whoever outputs at an anchor position is first.
                        if active.sequence == 0 || active.sequence == 12 {
                            active.is_second = false;
                        }
                    }
                    PakeAlg::Spake2p => {
                        if !active.role_set || !active.user_set || !active.peer_set {
                            return Err(Error::BadState);
                        }
                    }
                    PakeAlg::Srp6 => {
                        if !active.role_set || !active.user_set {
                            return Err(Error::BadState);
                        }
                        // The salt is never produced locally.
                        if step == PakeStep::Salt {
                            return Err(Error::InvalidArgument);
                        }
                    }
                }
                match check_sequence(active.alg, active.sequence, step, !active.is_second) {
                    Ok(last) => {
                        if active.sequence == 0 {
                            active.started = true;
                        }
                        active.sequence += 1;
                        if last {
                            active.done = true;
                        }
                        self.provider.pake_output(&mut active.op, step, out)
                    }
                    Err(err) => return Err(err),
                }
            }
        };
        if result.is_err() {
            let _ = self.pake_abort(operation);
        }
        result
    }

    /// Consume the peer's message for the current sequence position.
    pub fn pake_input(
        &mut self,
        operation: &mut PakeOperation<P>,
        step: PakeStep,
        input: &[u8],
    ) -> CoreResult<()> {
        let result = match &mut operation.state {
            PakeState::Blank => return Err(Error::BadState),
            PakeState::Active(active) => {
                if !active.password_set {
                    return Err(Error::BadState);
                }
                if input.is_empty() {
                    return Err(Error::InvalidArgument);
                }
                match active.alg {
                    PakeAlg::Jpake => {
                        if !active.user_set || !active.peer_set {
                            return Err(Error::BadState);
                        }
                        // Whoever inputs at an anchor position is second.
                        if active.sequence == 0 || active.sequence == 12 {
                            active.is_second = true;
                        }
                    }
                    PakeAlg::Spake2p => {
                        if !active.role_set || !active.user_set || !active.peer_set {
                            return Err(Error::BadState);
                        }
                    }
                    PakeAlg::Srp6 => {
                        if !active.role_set || !active.user_set {
                            return Err(Error::BadState);
                        }
                    }
                }
                match check_sequence(active.alg, active.sequence, step, active.is_second) {
                    Ok(last) => {
                        if active.sequence == 0 {
                            active.started = true;
                        }
                        active.sequence += 1;
                        if last {
                            active.done = true;
                        }
                        self.provider.pake_input(&mut active.op, step, input)
                    }
                    Err(err) => return Err(err),
                }
            }
        };
        if result.is_err() {
            let _ = self.pake_abort(operation);
        }
        result
    }

    /// After the terminal position, extract the implicit shared key into a
    /// key-derivation context as its secret input. Valid exactly once: the
    /// PAKE context resets to blank whether or not this succeeds.
    pub fn pake_get_implicit_key(
        &mut self,
        operation: &mut PakeOperation<P>,
        output: &mut DerivationOperation<P>,
    ) -> CoreResult<()> {
        // An unfinished exchange is left untouched; only a finished one is
        // consumed.
        if !matches!(&operation.state, PakeState::Active(active) if active.done) {
            return Err(Error::BadState);
        }
        let active = match std::mem::replace(&mut operation.state, PakeState::Blank) {
            PakeState::Active(active) => active,
            PakeState::Blank => return Err(Error::CorruptionDetected),
        };
        let mut secret = Zeroizing::new([0u8; HASH_MAX_SIZE]);
        let length = match self.provider.pake_get_secret(active.op, &mut *secret) {
            Ok(length) => length,
            Err(err) => {
                let _ = self.derivation_abort(output);
                return Err(err);
            }
        };
        self.derivation_mark_can_output_key(output);
        self.derivation_input_internal(
            output,
            DerivationStep::Secret,
            Some(KeyType::Derive),
            &secret[..length],
        )
    }

    /// Always succeeds; a no-op on a blank context.
    pub fn pake_abort(&mut self, operation: &mut PakeOperation<P>) -> CoreResult<()> {
        operation.state = PakeState::Blank;
        Ok(())
    }
}
