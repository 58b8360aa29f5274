//! Key identifiers, key types, lifetimes, usage flags, and attributes.

use crate::algorithm::Algorithm;
use crate::error::{CoreResult, Error};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Largest key size the core will agree to hold, in bits.
pub const MAX_KEY_BITS: usize = 65528;

/// Byte written over unused output space so that a caller that skips the
/// error check cannot mistake stale bytes for a valid result. A documented
/// post-condition, not a value callers should parse.
pub const OUTPUT_SENTINEL: u8 = b'!';

pub(crate) fn fill_output(out: &mut [u8]) {
    out.fill(OUTPUT_SENTINEL);
}

pub(crate) fn fill_tail(out: &mut [u8], used: usize) {
    out[used..].fill(OUTPUT_SENTINEL);
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub u32);

pub const MIN_PERSISTENT_ID: u32 = 1;
pub const MAX_PERSISTENT_ID: u32 = 0x3fff_ffff;
pub(crate) const VOLATILE_ID_BASE: u32 = 0x4000_0000;

impl KeyId {
    pub fn is_persistent(self) -> bool {
        (MIN_PERSISTENT_ID..=MAX_PERSISTENT_ID).contains(&self.0)
    }

    pub(crate) fn for_volatile_slot(index: usize) -> KeyId {
        KeyId(VOLATILE_ID_BASE + index as u32)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({:#010x})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EccFamily {
    /// Short Weierstrass prime curves (secp*r1).
    SecpR1,
    /// Curve25519 in Montgomery form, for key agreement.
    Montgomery,
    /// Ed25519 in twisted Edwards form, for signatures.
    TwistedEdwards,
}

impl EccFamily {
    pub fn is_weierstrass(self) -> bool {
        matches!(self, EccFamily::SecpR1)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyType {
    RawData,
    Hmac,
    Derive,
    Password,
    PasswordHash,
    Aes,
    Des,
    ChaCha20,
    EccKeyPair(EccFamily),
    EccPublicKey(EccFamily),
}

impl KeyType {
    /// Types whose material is an opaque byte string with no internal
    /// structure the provider needs to validate.
    pub fn is_unstructured(self) -> bool {
        matches!(
            self,
            KeyType::RawData
                | KeyType::Hmac
                | KeyType::Derive
                | KeyType::Password
                | KeyType::PasswordHash
                | KeyType::Aes
                | KeyType::Des
                | KeyType::ChaCha20
        )
    }

    pub fn is_public_key(self) -> bool {
        matches!(self, KeyType::EccPublicKey(_))
    }

    pub fn is_key_pair(self) -> bool {
        matches!(self, KeyType::EccKeyPair(_))
    }

    pub fn is_asymmetric(self) -> bool {
        self.is_public_key() || self.is_key_pair()
    }

    /// Block length of the underlying cipher; 1 for anything that is not a
    /// block cipher. Used for structural MAC and cipher compatibility.
    pub fn block_length(self) -> usize {
        match self {
            KeyType::Aes => 16,
            KeyType::Des => 8,
            _ => 1,
        }
    }
}

/// Check that a bit size is acceptable for an unstructured key type.
pub fn validate_unstructured_key_bit_size(key_type: KeyType, bits: usize) -> CoreResult<()> {
    match key_type {
        KeyType::RawData
        | KeyType::Hmac
        | KeyType::Derive
        | KeyType::Password
        | KeyType::PasswordHash => {}
        KeyType::Aes => {
            if bits != 128 && bits != 192 && bits != 256 {
                return Err(Error::InvalidArgument);
            }
        }
        KeyType::Des => {
            if bits != 64 && bits != 128 && bits != 192 {
                return Err(Error::InvalidArgument);
            }
        }
        KeyType::ChaCha20 => {
            if bits != 256 {
                return Err(Error::InvalidArgument);
            }
        }
        _ => return Err(Error::NotSupported),
    }
    if bits % 8 != 0 || bits == 0 || bits > MAX_KEY_BITS {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

/// Declared bit size of an elliptic-curve key for a family this core models.
pub fn validate_ecc_bit_size(family: EccFamily, bits: usize) -> CoreResult<()> {
    match family {
        EccFamily::SecpR1 => match bits {
            192 | 224 | 256 | 384 | 521 => Ok(()),
            _ => Err(Error::InvalidArgument),
        },
        EccFamily::Montgomery | EccFamily::TwistedEdwards => {
            if bits == 255 {
                Ok(())
            } else {
                Err(Error::InvalidArgument)
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Persistence {
    Volatile,
    Persistent,
    /// Provisioned outside this core's control; destroy wipes the in-memory
    /// copy but refuses to delete the stored one.
    ReadOnly,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Location(pub u32);

impl Location {
    pub const LOCAL: Location = Location(0);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Lifetime {
    pub persistence: Persistence,
    pub location: Location,
}

impl Lifetime {
    pub const VOLATILE: Lifetime = Lifetime {
        persistence: Persistence::Volatile,
        location: Location::LOCAL,
    };

    pub fn persistent(location: Location) -> Lifetime {
        Lifetime {
            persistence: Persistence::Persistent,
            location,
        }
    }

    pub fn is_volatile(self) -> bool {
        self.persistence == Persistence::Volatile
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Lifetime::VOLATILE
    }
}

/// Usage flag bitmask attached to a key's policy.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage(pub u32);

impl Usage {
    pub const NONE: Usage = Usage(0);
    pub const EXPORT: Usage = Usage(1 << 0);
    pub const COPY: Usage = Usage(1 << 1);
    pub const ENCRYPT: Usage = Usage(1 << 2);
    pub const DECRYPT: Usage = Usage(1 << 3);
    pub const SIGN_MESSAGE: Usage = Usage(1 << 4);
    pub const VERIFY_MESSAGE: Usage = Usage(1 << 5);
    pub const SIGN_HASH: Usage = Usage(1 << 6);
    pub const VERIFY_HASH: Usage = Usage(1 << 7);
    pub const DERIVE: Usage = Usage(1 << 8);
    pub const VERIFY_DERIVATION: Usage = Usage(1 << 9);

    const ALL_KNOWN: u32 = (1 << 10) - 1;

    pub fn contains(self, other: Usage) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: Usage) -> Usage {
        Usage(self.0 & !other.0)
    }

    pub fn is_valid(self) -> bool {
        self.0 & !Usage::ALL_KNOWN == 0
    }
}

impl BitOr for Usage {
    type Output = Usage;

    fn bitor(self, rhs: Usage) -> Usage {
        Usage(self.0 | rhs.0)
    }
}

impl BitAnd for Usage {
    type Output = Usage;

    fn bitand(self, rhs: Usage) -> Usage {
        Usage(self.0 & rhs.0)
    }
}

impl fmt::Debug for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Usage({:#06x})", self.0)
    }
}

/// The (usage, permitted algorithms) pair attached to a key. `None` in an
/// algorithm slot permits nothing through that slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Policy {
    pub usage: Usage,
    pub alg: Option<Algorithm>,
    pub alg2: Option<Algorithm>,
}

impl Policy {
    pub fn new(usage: Usage, alg: Algorithm) -> Policy {
        Policy {
            usage,
            alg: Some(alg),
            alg2: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyAttributes {
    pub id: KeyId,
    pub lifetime: Lifetime,
    pub key_type: KeyType,
    pub bits: usize,
    pub policy: Policy,
}

impl Default for KeyAttributes {
    fn default() -> Self {
        KeyAttributes {
            id: KeyId(0),
            lifetime: Lifetime::VOLATILE,
            key_type: KeyType::RawData,
            bits: 0,
            policy: Policy::default(),
        }
    }
}
