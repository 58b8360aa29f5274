//! Encoding of the stored key record (attributes + material) for the
//! persistence collaborator. An internal representation, not a wire format.

use crate::algorithm::{
    AeadAlg, AeadBase, Algorithm, AgreementAlg, CipherAlg, HashAlg, HashSel, KdfAlg, MacAlg,
    MacBase, MacLength, PakeAlg, RawAgreement, SignAlg,
};
use crate::error::{CoreResult, Error};
use crate::types::{
    EccFamily, KeyAttributes, KeyId, KeyType, Lifetime, Location, Persistence, Policy, Usage,
};
use ciborium::value::Value;
use zeroize::Zeroizing;

fn uint(v: u64) -> Value {
    Value::Integer(v.into())
}

fn map_entry(key: u64, value: Value) -> (Value, Value) {
    (uint(key), value)
}

fn as_map(value: &Value) -> CoreResult<&[(Value, Value)]> {
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(Error::CorruptionDetected),
    }
}

fn map_get<'a>(map: &'a [(Value, Value)], key: u64) -> Option<&'a Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::Integer(i) if *i == key.into() => Some(v),
        _ => None,
    })
}

fn req_uint(map: &[(Value, Value)], key: u64) -> CoreResult<u64> {
    match map_get(map, key) {
        Some(Value::Integer(i)) => u64::try_from(*i).map_err(|_| Error::CorruptionDetected),
        _ => Err(Error::CorruptionDetected),
    }
}

fn req_bytes(map: &[(Value, Value)], key: u64) -> CoreResult<Vec<u8>> {
    match map_get(map, key) {
        Some(Value::Bytes(bytes)) => Ok(bytes.clone()),
        _ => Err(Error::CorruptionDetected),
    }
}

fn as_uint_array(value: &Value) -> CoreResult<Vec<u64>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Integer(i) => u64::try_from(*i).map_err(|_| Error::CorruptionDetected),
                _ => Err(Error::CorruptionDetected),
            })
            .collect(),
        _ => Err(Error::CorruptionDetected),
    }
}

fn hash_code(hash: HashAlg) -> u64 {
    match hash {
        HashAlg::Sha256 => 1,
        HashAlg::Sha384 => 2,
        HashAlg::Sha512 => 3,
    }
}

fn hash_from_code(code: u64) -> CoreResult<HashAlg> {
    match code {
        1 => Ok(HashAlg::Sha256),
        2 => Ok(HashAlg::Sha384),
        3 => Ok(HashAlg::Sha512),
        _ => Err(Error::CorruptionDetected),
    }
}

fn kdf_codes(kdf: KdfAlg) -> (u64, u64) {
    match kdf {
        KdfAlg::Hkdf(h) => (0, hash_code(h)),
        KdfAlg::HkdfExtract(h) => (1, hash_code(h)),
        KdfAlg::HkdfExpand(h) => (2, hash_code(h)),
        KdfAlg::Tls12Prf(h) => (3, hash_code(h)),
        KdfAlg::Tls12PskToMs(h) => (4, hash_code(h)),
        KdfAlg::Pbkdf2Hmac(h) => (5, hash_code(h)),
        KdfAlg::EcJpakeToPms => (6, 0),
    }
}

fn kdf_from_codes(kind: u64, hash: u64) -> CoreResult<KdfAlg> {
    Ok(match kind {
        0 => KdfAlg::Hkdf(hash_from_code(hash)?),
        1 => KdfAlg::HkdfExtract(hash_from_code(hash)?),
        2 => KdfAlg::HkdfExpand(hash_from_code(hash)?),
        3 => KdfAlg::Tls12Prf(hash_from_code(hash)?),
        4 => KdfAlg::Tls12PskToMs(hash_from_code(hash)?),
        5 => KdfAlg::Pbkdf2Hmac(hash_from_code(hash)?),
        6 => KdfAlg::EcJpakeToPms,
        _ => return Err(Error::CorruptionDetected),
    })
}

fn encode_algorithm(alg: &Algorithm) -> Value {
    let words: Vec<u64> = match alg {
        Algorithm::Hash(h) => vec![1, hash_code(*h)],
        Algorithm::Mac(MacAlg { base, length }) => {
            let (base_kind, hash) = match base {
                MacBase::Cmac => (0, 0),
                MacBase::Hmac(h) => (1, hash_code(*h)),
            };
            let (length_kind, length) = match length {
                MacLength::Default => (0, 0),
                MacLength::Exact(n) => (1, *n as u64),
                MacLength::AtLeast(n) => (2, *n as u64),
            };
            vec![2, base_kind, hash, length_kind, length]
        }
        Algorithm::Cipher(c) => vec![
            3,
            match c {
                CipherAlg::Ctr => 0,
                CipherAlg::CbcNoPadding => 1,
            },
        ],
        Algorithm::Aead(AeadAlg {
            base,
            tag_length,
            at_least_tag,
        }) => vec![
            4,
            match base {
                AeadBase::Gcm => 0,
                AeadBase::ChaCha20Poly1305 => 1,
            },
            *tag_length as u64,
            u64::from(*at_least_tag),
        ],
        Algorithm::Sign(sign) => match sign {
            SignAlg::Ecdsa(HashSel::Any) => vec![5, 0, 0],
            SignAlg::Ecdsa(HashSel::Specific(h)) => vec![5, 0, hash_code(*h)],
            SignAlg::Ed25519 => vec![5, 1, 0],
        },
        Algorithm::KeyDerivation(kdf) => {
            let (kind, hash) = kdf_codes(*kdf);
            vec![6, kind, hash]
        }
        Algorithm::KeyAgreement(AgreementAlg { base, kdf }) => {
            let base_code = match base {
                RawAgreement::X25519 => 0,
                RawAgreement::EcdhP256 => 1,
            };
            match kdf {
                None => vec![7, base_code, 0, 0, 0],
                Some(kdf) => {
                    let (kind, hash) = kdf_codes(*kdf);
                    vec![7, base_code, 1, kind, hash]
                }
            }
        }
        Algorithm::Pake(p) => vec![
            8,
            match p {
                PakeAlg::Jpake => 0,
                PakeAlg::Spake2p => 1,
                PakeAlg::Srp6 => 2,
            },
        ],
    };
    Value::Array(words.into_iter().map(uint).collect())
}

fn decode_algorithm(value: &Value) -> CoreResult<Algorithm> {
    let words = as_uint_array(value)?;
    let word = |i: usize| words.get(i).copied().ok_or(Error::CorruptionDetected);
    Ok(match word(0)? {
        1 => Algorithm::Hash(hash_from_code(word(1)?)?),
        2 => {
            let base = match word(1)? {
                0 => MacBase::Cmac,
                1 => MacBase::Hmac(hash_from_code(word(2)?)?),
                _ => return Err(Error::CorruptionDetected),
            };
            let length = match word(3)? {
                0 => MacLength::Default,
                1 => MacLength::Exact(word(4)? as usize),
                2 => MacLength::AtLeast(word(4)? as usize),
                _ => return Err(Error::CorruptionDetected),
            };
            Algorithm::Mac(MacAlg { base, length })
        }
        3 => Algorithm::Cipher(match word(1)? {
            0 => CipherAlg::Ctr,
            1 => CipherAlg::CbcNoPadding,
            _ => return Err(Error::CorruptionDetected),
        }),
        4 => Algorithm::Aead(AeadAlg {
            base: match word(1)? {
                0 => AeadBase::Gcm,
                1 => AeadBase::ChaCha20Poly1305,
                _ => return Err(Error::CorruptionDetected),
            },
            tag_length: word(2)? as usize,
            at_least_tag: word(3)? != 0,
        }),
        5 => Algorithm::Sign(match (word(1)?, word(2)?) {
            (0, 0) => SignAlg::Ecdsa(HashSel::Any),
            (0, h) => SignAlg::Ecdsa(HashSel::Specific(hash_from_code(h)?)),
            (1, _) => SignAlg::Ed25519,
            _ => return Err(Error::CorruptionDetected),
        }),
        6 => Algorithm::KeyDerivation(kdf_from_codes(word(1)?, word(2)?)?),
        7 => {
            let base = match word(1)? {
                0 => RawAgreement::X25519,
                1 => RawAgreement::EcdhP256,
                _ => return Err(Error::CorruptionDetected),
            };
            let kdf = if word(2)? != 0 {
                Some(kdf_from_codes(word(3)?, word(4)?)?)
            } else {
                None
            };
            Algorithm::KeyAgreement(AgreementAlg { base, kdf })
        }
        8 => Algorithm::Pake(match word(1)? {
            0 => PakeAlg::Jpake,
            1 => PakeAlg::Spake2p,
            2 => PakeAlg::Srp6,
            _ => return Err(Error::CorruptionDetected),
        }),
        _ => return Err(Error::CorruptionDetected),
    })
}

fn key_type_codes(key_type: KeyType) -> (u64, u64) {
    let family = |f: EccFamily| match f {
        EccFamily::SecpR1 => 0,
        EccFamily::Montgomery => 1,
        EccFamily::TwistedEdwards => 2,
    };
    match key_type {
        KeyType::RawData => (0, 0),
        KeyType::Hmac => (1, 0),
        KeyType::Derive => (2, 0),
        KeyType::Password => (3, 0),
        KeyType::PasswordHash => (4, 0),
        KeyType::Aes => (5, 0),
        KeyType::Des => (6, 0),
        KeyType::ChaCha20 => (7, 0),
        KeyType::EccKeyPair(f) => (8, family(f)),
        KeyType::EccPublicKey(f) => (9, family(f)),
    }
}

fn key_type_from_codes(code: u64, family: u64) -> CoreResult<KeyType> {
    let family = match family {
        0 => EccFamily::SecpR1,
        1 => EccFamily::Montgomery,
        2 => EccFamily::TwistedEdwards,
        _ => return Err(Error::CorruptionDetected),
    };
    Ok(match code {
        0 => KeyType::RawData,
        1 => KeyType::Hmac,
        2 => KeyType::Derive,
        3 => KeyType::Password,
        4 => KeyType::PasswordHash,
        5 => KeyType::Aes,
        6 => KeyType::Des,
        7 => KeyType::ChaCha20,
        8 => KeyType::EccKeyPair(family),
        9 => KeyType::EccPublicKey(family),
        _ => return Err(Error::CorruptionDetected),
    })
}

pub(crate) fn encode_key_record(
    attributes: &KeyAttributes,
    material: &[u8],
) -> CoreResult<Vec<u8>> {
    let persistence = match attributes.lifetime.persistence {
        Persistence::Volatile => return Err(Error::CorruptionDetected),
        Persistence::Persistent => 1,
        Persistence::ReadOnly => 2,
    };
    let (type_code, type_family) = key_type_codes(attributes.key_type);
    let mut entries = vec![
        map_entry(0, uint(u64::from(attributes.id.0))),
        map_entry(1, uint(persistence)),
        map_entry(2, uint(u64::from(attributes.lifetime.location.0))),
        map_entry(3, Value::Array(vec![uint(type_code), uint(type_family)])),
        map_entry(4, uint(attributes.bits as u64)),
        map_entry(5, uint(u64::from(attributes.policy.usage.0))),
    ];
    if let Some(alg) = &attributes.policy.alg {
        entries.push(map_entry(6, encode_algorithm(alg)));
    }
    if let Some(alg) = &attributes.policy.alg2 {
        entries.push(map_entry(7, encode_algorithm(alg)));
    }
    entries.push(map_entry(8, Value::Bytes(material.to_vec())));

    let mut out = Vec::new();
    ciborium::into_writer(&Value::Map(entries), &mut out)
        .map_err(|_| Error::InsufficientStorage)?;
    Ok(out)
}

pub(crate) fn decode_key_record(
    record: &[u8],
) -> CoreResult<(KeyAttributes, Zeroizing<Vec<u8>>)> {
    let value: Value =
        ciborium::from_reader(record).map_err(|_| Error::CorruptionDetected)?;
    let map = as_map(&value)?;

    let id = KeyId(u32::try_from(req_uint(map, 0)?).map_err(|_| Error::CorruptionDetected)?);
    let persistence = match req_uint(map, 1)? {
        1 => Persistence::Persistent,
        2 => Persistence::ReadOnly,
        _ => return Err(Error::CorruptionDetected),
    };
    let location = Location(
        u32::try_from(req_uint(map, 2)?).map_err(|_| Error::CorruptionDetected)?,
    );
    let type_words = as_uint_array(map_get(map, 3).ok_or(Error::CorruptionDetected)?)?;
    if type_words.len() != 2 {
        return Err(Error::CorruptionDetected);
    }
    let key_type = key_type_from_codes(type_words[0], type_words[1])?;
    let bits = req_uint(map, 4)? as usize;
    let usage = Usage(u32::try_from(req_uint(map, 5)?).map_err(|_| Error::CorruptionDetected)?);
    let alg = match map_get(map, 6) {
        Some(value) => Some(decode_algorithm(value)?),
        None => None,
    };
    let alg2 = match map_get(map, 7) {
        Some(value) => Some(decode_algorithm(value)?),
        None => None,
    };
    let material = Zeroizing::new(req_bytes(map, 8)?);

    Ok((
        KeyAttributes {
            id,
            lifetime: Lifetime {
                persistence,
                location,
            },
            key_type,
            bits,
            policy: Policy { usage, alg, alg2 },
        },
        material,
    ))
}
