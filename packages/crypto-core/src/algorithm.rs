//! Algorithm identifiers. Wildcard forms (`Any` hash, `AtLeast` lengths) are
//! only meaningful inside key policies; a requested algorithm must always be
//! concrete.

use crate::error::{CoreResult, Error};
use crate::types::KeyType;

pub const HASH_MAX_SIZE: usize = 64;
pub const MAC_MAX_SIZE: usize = 64;
pub const SIGNATURE_MAX_SIZE: usize = 64;
pub const RAW_AGREEMENT_MAX_SIZE: usize = 66;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HashAlg {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    pub fn hash_length(self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
            HashAlg::Sha512 => 64,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MacBase {
    Hmac(HashAlg),
    /// CMAC over the key's block cipher.
    Cmac,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MacLength {
    /// The base algorithm's full output length.
    Default,
    Exact(usize),
    /// Policy-only wildcard: any truncation of at least this many bytes.
    AtLeast(usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MacAlg {
    pub base: MacBase,
    pub length: MacLength,
}

impl MacAlg {
    pub fn hmac(hash: HashAlg) -> MacAlg {
        MacAlg {
            base: MacBase::Hmac(hash),
            length: MacLength::Default,
        }
    }

    pub fn cmac() -> MacAlg {
        MacAlg {
            base: MacBase::Cmac,
            length: MacLength::Default,
        }
    }

    pub fn truncated(self, length: usize) -> MacAlg {
        MacAlg {
            base: self.base,
            length: MacLength::Exact(length),
        }
    }

    pub fn at_least(self, length: usize) -> MacAlg {
        MacAlg {
            base: self.base,
            length: MacLength::AtLeast(length),
        }
    }

    /// Full (untruncated) output length for the given key type. The CMAC tag
    /// is one block of the underlying cipher.
    pub fn full_length(&self, key_type: KeyType) -> usize {
        match self.base {
            MacBase::Hmac(hash) => hash.hash_length(),
            MacBase::Cmac => key_type.block_length(),
        }
    }

    /// Output length this algorithm resolves to; an `AtLeast` wildcard
    /// resolves to its minimum.
    pub fn resolved_length(&self, key_type: KeyType) -> usize {
        match self.length {
            MacLength::Default => self.full_length(key_type),
            MacLength::Exact(n) | MacLength::AtLeast(n) => n,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.length, MacLength::AtLeast(_))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CipherAlg {
    /// Counter mode with a big-endian block-wide counter.
    Ctr,
    CbcNoPadding,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AeadBase {
    Gcm,
    ChaCha20Poly1305,
}

impl AeadBase {
    pub fn full_tag_length(self) -> usize {
        16
    }

    pub fn default_nonce_length(self) -> usize {
        12
    }

    pub fn tag_length_is_valid(self, tag_length: usize) -> bool {
        match self {
            AeadBase::Gcm => matches!(tag_length, 4 | 8 | 12..=16),
            AeadBase::ChaCha20Poly1305 => tag_length == 16,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AeadAlg {
    pub base: AeadBase,
    pub tag_length: usize,
    /// Policy-only wildcard: any tag of at least `tag_length` bytes.
    pub at_least_tag: bool,
}

impl AeadAlg {
    pub fn new(base: AeadBase) -> AeadAlg {
        AeadAlg {
            base,
            tag_length: base.full_tag_length(),
            at_least_tag: false,
        }
    }

    pub fn with_tag(base: AeadBase, tag_length: usize) -> AeadAlg {
        AeadAlg {
            base,
            tag_length,
            at_least_tag: false,
        }
    }

    pub fn with_at_least_tag(base: AeadBase, tag_length: usize) -> AeadAlg {
        AeadAlg {
            base,
            tag_length,
            at_least_tag: true,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.at_least_tag
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HashSel {
    Specific(HashAlg),
    /// Policy-only wildcard matching any concrete hash in the same family.
    Any,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SignAlg {
    Ecdsa(HashSel),
    Ed25519,
}

impl SignAlg {
    /// Whether this is a hash-and-sign scheme that can consume a precomputed
    /// hash. Ed25519 signs the message directly.
    pub fn supports_hash_input(&self) -> bool {
        matches!(self, SignAlg::Ecdsa(_))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, SignAlg::Ecdsa(HashSel::Any))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KdfAlg {
    Hkdf(HashAlg),
    HkdfExtract(HashAlg),
    HkdfExpand(HashAlg),
    Tls12Prf(HashAlg),
    Tls12PskToMs(HashAlg),
    Pbkdf2Hmac(HashAlg),
    /// Converts an EC J-PAKE shared point into a TLS 1.2 premaster secret.
    EcJpakeToPms,
}

impl KdfAlg {
    /// Maximum number of bytes the family can produce from one context.
    pub fn capacity(self) -> usize {
        match self {
            KdfAlg::Hkdf(hash) | KdfAlg::HkdfExpand(hash) => 255 * hash.hash_length(),
            KdfAlg::HkdfExtract(hash) => hash.hash_length(),
            KdfAlg::EcJpakeToPms => 32,
            KdfAlg::Tls12Prf(_) | KdfAlg::Tls12PskToMs(_) | KdfAlg::Pbkdf2Hmac(_) => usize::MAX,
        }
    }
}

/// Input steps of a key-derivation context. Which steps are valid, and in
/// what order, depends on the derivation family.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DerivationStep {
    Salt,
    Secret,
    OtherSecret,
    Info,
    Label,
    Seed,
    Cost,
    Password,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RawAgreement {
    X25519,
    EcdhP256,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AgreementAlg {
    pub base: RawAgreement,
    /// `None` is the raw form producing the shared secret directly.
    pub kdf: Option<KdfAlg>,
}

impl AgreementAlg {
    pub fn raw(base: RawAgreement) -> AgreementAlg {
        AgreementAlg { base, kdf: None }
    }

    pub fn with_kdf(base: RawAgreement, kdf: KdfAlg) -> AgreementAlg {
        AgreementAlg {
            base,
            kdf: Some(kdf),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PakeAlg {
    Jpake,
    Spake2p,
    Srp6,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Algorithm {
    Hash(HashAlg),
    Mac(MacAlg),
    Cipher(CipherAlg),
    Aead(AeadAlg),
    Sign(SignAlg),
    KeyDerivation(KdfAlg),
    KeyAgreement(AgreementAlg),
    Pake(PakeAlg),
}

impl Algorithm {
    pub fn is_wildcard(&self) -> bool {
        match self {
            Algorithm::Mac(mac) => mac.is_wildcard(),
            Algorithm::Aead(aead) => aead.is_wildcard(),
            Algorithm::Sign(sign) => sign.is_wildcard(),
            _ => false,
        }
    }

    /// Reject wildcard forms where a concrete algorithm is required.
    pub fn require_concrete(&self) -> CoreResult<()> {
        if self.is_wildcard() {
            Err(Error::InvalidArgument)
        } else {
            Ok(())
        }
    }
}
