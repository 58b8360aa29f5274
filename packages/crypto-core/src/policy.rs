//! Pure policy algebra: does a policy permit a requested algorithm, and what
//! is the intersection of two policies.

use crate::algorithm::{AeadAlg, Algorithm, HashSel, MacAlg, MacBase, MacLength, SignAlg};
use crate::error::{CoreResult, Error};
use crate::types::{KeyType, Policy};

/// Whether a key of the given type is structurally able to run the given MAC
/// base at all, independent of policy. CMAC needs a block cipher key.
pub fn mac_key_can_do(base: MacBase, key_type: KeyType) -> bool {
    match base {
        MacBase::Hmac(_) => key_type == KeyType::Hmac,
        MacBase::Cmac => key_type.block_length() > 1,
    }
}

fn sign_family_matches(policy: &SignAlg, requested: &SignAlg) -> bool {
    matches!(
        (policy, requested),
        (SignAlg::Ecdsa(HashSel::Any), SignAlg::Ecdsa(HashSel::Specific(_)))
    )
}

fn mac_permits(policy: &MacAlg, requested: &MacAlg, key_type: KeyType) -> bool {
    if policy.base != requested.base {
        return false;
    }
    if !mac_key_can_do(policy.base, key_type) {
        return false;
    }
    let requested_length = requested.resolved_length(key_type);
    let default_length = requested.full_length(key_type);
    match policy.length {
        // A default-length policy only allows the default length, however the
        // request spells it.
        MacLength::Default => requested_length == default_length,
        // A default-length request is allowed when the policy's exact length
        // happens to be the default.
        MacLength::Exact(n) => match requested.length {
            MacLength::Default => n == default_length,
            MacLength::Exact(m) => n == m,
            MacLength::AtLeast(_) => false,
        },
        MacLength::AtLeast(n) => requested_length >= n,
    }
}

fn aead_permits(policy: &AeadAlg, requested: &AeadAlg) -> bool {
    policy.base == requested.base
        && policy.at_least_tag
        && policy.tag_length <= requested.tag_length
}

fn algorithm_permits(
    policy_alg: &Algorithm,
    key_type: KeyType,
    requested: &Algorithm,
) -> bool {
    if policy_alg == requested {
        return true;
    }
    match (policy_alg, requested) {
        (Algorithm::Sign(p), Algorithm::Sign(r)) => sign_family_matches(p, r),
        (Algorithm::Aead(p), Algorithm::Aead(r)) => aead_permits(p, r),
        (Algorithm::Mac(p), Algorithm::Mac(r)) => mac_permits(p, r, key_type),
        // A raw key-agreement policy also covers the combined
        // agreement-into-derivation form with the same base.
        (Algorithm::KeyAgreement(p), Algorithm::KeyAgreement(r)) => {
            p.kdf.is_none() && r.kdf.is_some() && p.base == r.base
        }
        _ => false,
    }
}

/// Test whether a policy permits a concrete requested algorithm. Usage flags
/// are checked separately by the caller.
pub fn permits(policy: &Policy, key_type: KeyType, requested: &Algorithm) -> CoreResult<()> {
    requested.require_concrete()?;
    let allowed = policy
        .alg
        .as_ref()
        .is_some_and(|alg| algorithm_permits(alg, key_type, requested))
        || policy
            .alg2
            .as_ref()
            .is_some_and(|alg| algorithm_permits(alg, key_type, requested));
    if allowed {
        Ok(())
    } else {
        Err(Error::NotPermitted)
    }
}

fn mac_intersection(a: &MacAlg, b: &MacAlg, key_type: KeyType) -> Option<Algorithm> {
    if a.base != b.base || !mac_key_can_do(a.base, key_type) {
        return None;
    }
    // An at-least wildcard resolves to its shortest allowed length, which is
    // exactly what the most-restrictive computation needs.
    let a_len = a.resolved_length(key_type);
    let b_len = b.resolved_length(key_type);
    let restricted = a_len.max(b_len);
    match (a.length, b.length) {
        (MacLength::AtLeast(_), MacLength::AtLeast(_)) => Some(Algorithm::Mac(MacAlg {
            base: a.base,
            length: MacLength::AtLeast(restricted),
        })),
        (MacLength::AtLeast(_), _) => (a_len <= b_len).then_some(Algorithm::Mac(*b)),
        (_, MacLength::AtLeast(_)) => (b_len <= a_len).then_some(Algorithm::Mac(*a)),
        // One default-length and one specific-length form of the same length;
        // keep the specific-length version.
        _ => (a_len == b_len).then_some(Algorithm::Mac(MacAlg {
            base: a.base,
            length: MacLength::Exact(a_len),
        })),
    }
}

fn aead_intersection(a: &AeadAlg, b: &AeadAlg) -> Option<Algorithm> {
    if a.base != b.base {
        return None;
    }
    let restricted = a.tag_length.max(b.tag_length);
    match (a.at_least_tag, b.at_least_tag) {
        (true, true) => Some(Algorithm::Aead(AeadAlg::with_at_least_tag(
            a.base, restricted,
        ))),
        (true, false) => (a.tag_length <= b.tag_length).then_some(Algorithm::Aead(*b)),
        (false, true) => (b.tag_length <= a.tag_length).then_some(Algorithm::Aead(*a)),
        (false, false) => None,
    }
}

/// Intersection of two algorithm policy slots; `None` allows nothing.
fn algorithm_intersection(
    a: Option<Algorithm>,
    b: Option<Algorithm>,
    key_type: KeyType,
) -> Option<Algorithm> {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return None,
    };
    if a == b {
        return Some(a);
    }
    match (&a, &b) {
        (Algorithm::Sign(sa), Algorithm::Sign(sb)) => match (sa, sb) {
            (SignAlg::Ecdsa(HashSel::Any), SignAlg::Ecdsa(HashSel::Specific(_))) => Some(b),
            (SignAlg::Ecdsa(HashSel::Specific(_)), SignAlg::Ecdsa(HashSel::Any)) => Some(a),
            _ => None,
        },
        (Algorithm::Aead(aa), Algorithm::Aead(ab)) => aead_intersection(aa, ab),
        (Algorithm::Mac(ma), Algorithm::Mac(mb)) => mac_intersection(ma, mb, key_type),
        _ => None,
    }
}

/// Intersection of two policies over the same key type. Commutative and
/// idempotent. Fails `InvalidArgument` when an algorithm slot carries two
/// incompatible non-empty values.
pub fn intersect(policy: &Policy, other: &Policy, key_type: KeyType) -> CoreResult<Policy> {
    let alg = algorithm_intersection(policy.alg, other.alg, key_type);
    let alg2 = algorithm_intersection(policy.alg2, other.alg2, key_type);
    if alg.is_none() && policy.alg.is_some() && other.alg.is_some() {
        return Err(Error::InvalidArgument);
    }
    if alg2.is_none() && policy.alg2.is_some() && other.alg2.is_some() {
        return Err(Error::InvalidArgument);
    }
    Ok(Policy {
        usage: policy.usage & other.usage,
        alg,
        alg2,
    })
}
