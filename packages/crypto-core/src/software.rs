//! Software provider: implements the provider boundary for local
//! transparent keys on top of the RustCrypto stack. PAKE math is not
//! carried by this build and reports `NotSupported`.

use crate::algorithm::{
    AeadAlg, AeadBase, CipherAlg, DerivationStep, HashAlg, KdfAlg, MacAlg, MacBase, RawAgreement,
    SignAlg,
};
use crate::error::{CoreResult, Error};
use crate::provider::CryptoProvider;
use crate::types::{EccFamily, KeyAttributes, KeyType};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use chacha20poly1305::ChaCha20Poly1305;
use cmac::Cmac;
use ctr::Ctr128BE;
use ed25519_dalek::{
    Signature as Ed25519Signature, SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
};
use getrandom::getrandom;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{
    Signature as EcdsaSignature, SigningKey as EcdsaSigningKey, VerifyingKey as EcdsaVerifyingKey,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::{Signer, Verifier};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};
use zeroize::Zeroizing;

type Aes192Gcm = AesGcm<Aes192, U12>;

const GENERATE_SCALAR_ATTEMPTS: usize = 16;

#[derive(Default)]
pub struct SoftwareProvider;

impl SoftwareProvider {
    pub fn new() -> Self {
        SoftwareProvider
    }
}

fn to_array<const N: usize>(data: &[u8]) -> CoreResult<[u8; N]> {
    data.try_into().map_err(|_| Error::InvalidArgument)
}

fn hmac_over(hash: HashAlg, key: &[u8], chunks: &[&[u8]]) -> CoreResult<Zeroizing<Vec<u8>>> {
    fn run<M: Mac + KeyInit>(key: &[u8], chunks: &[&[u8]]) -> CoreResult<Zeroizing<Vec<u8>>> {
        let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| Error::InvalidArgument)?;
        for chunk in chunks {
            mac.update(chunk);
        }
        Ok(Zeroizing::new(
            mac.finalize().into_bytes().as_slice().to_vec(),
        ))
    }
    match hash {
        HashAlg::Sha256 => run::<Hmac<Sha256>>(key, chunks),
        HashAlg::Sha384 => run::<Hmac<Sha384>>(key, chunks),
        HashAlg::Sha512 => run::<Hmac<Sha512>>(key, chunks),
    }
}

fn hkdf_extract(hash: HashAlg, salt: Option<&[u8]>, ikm: &[u8]) -> Zeroizing<Vec<u8>> {
    match hash {
        HashAlg::Sha256 => {
            Zeroizing::new(Hkdf::<Sha256>::extract(salt, ikm).0.as_slice().to_vec())
        }
        HashAlg::Sha384 => {
            Zeroizing::new(Hkdf::<Sha384>::extract(salt, ikm).0.as_slice().to_vec())
        }
        HashAlg::Sha512 => {
            Zeroizing::new(Hkdf::<Sha512>::extract(salt, ikm).0.as_slice().to_vec())
        }
    }
}

// Hash

pub enum SoftwareHash {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

// MAC

pub enum SoftwareMac {
    HmacSha256(Hmac<Sha256>),
    HmacSha384(Hmac<Sha384>),
    HmacSha512(Hmac<Sha512>),
    CmacAes128(Cmac<Aes128>),
    CmacAes192(Cmac<Aes192>),
    CmacAes256(Cmac<Aes256>),
}

// Cipher

enum CipherEngine {
    Ctr128(Ctr128BE<Aes128>),
    Ctr192(Ctr128BE<Aes192>),
    Ctr256(Ctr128BE<Aes256>),
    CbcEnc128(cbc::Encryptor<Aes128>),
    CbcEnc192(cbc::Encryptor<Aes192>),
    CbcEnc256(cbc::Encryptor<Aes256>),
    CbcDec128(cbc::Decryptor<Aes128>),
    CbcDec192(cbc::Decryptor<Aes192>),
    CbcDec256(cbc::Decryptor<Aes256>),
}

pub struct SoftwareCipher {
    alg: CipherAlg,
    encrypt: bool,
    key: Zeroizing<Vec<u8>>,
    engine: Option<CipherEngine>,
    partial: Zeroizing<Vec<u8>>,
}

impl SoftwareCipher {
    fn build_engine(&self, iv: &[u8]) -> CoreResult<CipherEngine> {
        let key = &self.key;
        let make_err = |_| Error::InvalidArgument;
        Ok(match (self.alg, self.encrypt, key.len()) {
            (CipherAlg::Ctr, _, 16) => {
                CipherEngine::Ctr128(Ctr128BE::new_from_slices(key, iv).map_err(make_err)?)
            }
            (CipherAlg::Ctr, _, 24) => {
                CipherEngine::Ctr192(Ctr128BE::new_from_slices(key, iv).map_err(make_err)?)
            }
            (CipherAlg::Ctr, _, 32) => {
                CipherEngine::Ctr256(Ctr128BE::new_from_slices(key, iv).map_err(make_err)?)
            }
            (CipherAlg::CbcNoPadding, true, 16) => {
                CipherEngine::CbcEnc128(cbc::Encryptor::new_from_slices(key, iv).map_err(make_err)?)
            }
            (CipherAlg::CbcNoPadding, true, 24) => {
                CipherEngine::CbcEnc192(cbc::Encryptor::new_from_slices(key, iv).map_err(make_err)?)
            }
            (CipherAlg::CbcNoPadding, true, 32) => {
                CipherEngine::CbcEnc256(cbc::Encryptor::new_from_slices(key, iv).map_err(make_err)?)
            }
            (CipherAlg::CbcNoPadding, false, 16) => {
                CipherEngine::CbcDec128(cbc::Decryptor::new_from_slices(key, iv).map_err(make_err)?)
            }
            (CipherAlg::CbcNoPadding, false, 24) => {
                CipherEngine::CbcDec192(cbc::Decryptor::new_from_slices(key, iv).map_err(make_err)?)
            }
            (CipherAlg::CbcNoPadding, false, 32) => {
                CipherEngine::CbcDec256(cbc::Decryptor::new_from_slices(key, iv).map_err(make_err)?)
            }
            _ => return Err(Error::NotSupported),
        })
    }
}

fn cbc_blocks(engine: &mut CipherEngine, data: &[u8], out: &mut [u8]) -> CoreResult<()> {
    for (chunk, out_chunk) in data.chunks_exact(16).zip(out.chunks_exact_mut(16)) {
        let input = GenericArray::from_slice(chunk);
        let output = GenericArray::from_mut_slice(out_chunk);
        match engine {
            CipherEngine::CbcEnc128(c) => c.encrypt_block_b2b_mut(input, output),
            CipherEngine::CbcEnc192(c) => c.encrypt_block_b2b_mut(input, output),
            CipherEngine::CbcEnc256(c) => c.encrypt_block_b2b_mut(input, output),
            CipherEngine::CbcDec128(c) => c.decrypt_block_b2b_mut(input, output),
            CipherEngine::CbcDec192(c) => c.decrypt_block_b2b_mut(input, output),
            CipherEngine::CbcDec256(c) => c.decrypt_block_b2b_mut(input, output),
            _ => return Err(Error::CorruptionDetected),
        }
    }
    Ok(())
}

// AEAD

pub struct SoftwareAead {
    base: AeadBase,
    tag_length: usize,
    encrypt: bool,
    key: Zeroizing<Vec<u8>>,
    nonce: Option<[u8; 12]>,
    aad: Vec<u8>,
    data: Zeroizing<Vec<u8>>,
}

fn detached_encrypt(
    base: AeadBase,
    key: &[u8],
    nonce: &[u8; 12],
    aad: &[u8],
    buf: &mut [u8],
) -> CoreResult<[u8; 16]> {
    fn run<A: AeadInPlace + KeyInit>(
        key: &[u8],
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
    ) -> CoreResult<[u8; 16]> {
        let cipher = A::new_from_slice(key).map_err(|_| Error::InvalidArgument)?;
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buf)
            .map_err(|_| Error::GenericError)?;
        to_array(tag.as_slice())
    }
    match (base, key.len()) {
        (AeadBase::Gcm, 16) => run::<Aes128Gcm>(key, nonce, aad, buf),
        (AeadBase::Gcm, 24) => run::<Aes192Gcm>(key, nonce, aad, buf),
        (AeadBase::Gcm, 32) => run::<Aes256Gcm>(key, nonce, aad, buf),
        (AeadBase::ChaCha20Poly1305, 32) => run::<ChaCha20Poly1305>(key, nonce, aad, buf),
        _ => Err(Error::NotSupported),
    }
}

fn detached_decrypt(
    base: AeadBase,
    key: &[u8],
    nonce: &[u8; 12],
    aad: &[u8],
    buf: &mut [u8],
    tag: &[u8; 16],
) -> CoreResult<()> {
    fn run<A: AeadInPlace + KeyInit>(
        key: &[u8],
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; 16],
    ) -> CoreResult<()> {
        let cipher = A::new_from_slice(key).map_err(|_| Error::InvalidArgument)?;
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                aad,
                buf,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| Error::InvalidSignature)
    }
    match (base, key.len()) {
        (AeadBase::Gcm, 16) => run::<Aes128Gcm>(key, nonce, aad, buf, tag),
        (AeadBase::Gcm, 24) => run::<Aes192Gcm>(key, nonce, aad, buf, tag),
        (AeadBase::Gcm, 32) => run::<Aes256Gcm>(key, nonce, aad, buf, tag),
        (AeadBase::ChaCha20Poly1305, 32) => run::<ChaCha20Poly1305>(key, nonce, aad, buf, tag),
        _ => Err(Error::NotSupported),
    }
}

// Key derivation

enum HkdfMode {
    Full,
    Extract,
    Expand,
}

struct KdfStream {
    /// PRK for the expand chain, or the already-final output block.
    prk: Zeroizing<Vec<u8>>,
    block: Zeroizing<Vec<u8>>,
    counter: u8,
    pos: usize,
    expands: bool,
}

impl KdfStream {
    fn fixed(block: Zeroizing<Vec<u8>>) -> KdfStream {
        KdfStream {
            prk: Zeroizing::new(Vec::new()),
            block,
            counter: 0,
            pos: 0,
            expands: false,
        }
    }

    fn expanding(prk: Zeroizing<Vec<u8>>) -> KdfStream {
        KdfStream {
            prk,
            block: Zeroizing::new(Vec::new()),
            counter: 0,
            pos: 0,
            expands: true,
        }
    }
}

pub struct HkdfState {
    hash: HashAlg,
    mode: HkdfMode,
    salt: Option<Zeroizing<Vec<u8>>>,
    secret: Option<Zeroizing<Vec<u8>>>,
    info: Zeroizing<Vec<u8>>,
    stream: Option<KdfStream>,
}

impl HkdfState {
    fn start(&self) -> CoreResult<KdfStream> {
        let secret = self.secret.as_ref().ok_or(Error::BadState)?;
        match self.mode {
            HkdfMode::Full => Ok(KdfStream::expanding(hkdf_extract(
                self.hash,
                self.salt.as_deref().map(|v| v.as_slice()),
                secret,
            ))),
            HkdfMode::Extract => {
                let salt = self.salt.as_ref().ok_or(Error::BadState)?;
                Ok(KdfStream::fixed(hkdf_extract(self.hash, Some(salt), secret)))
            }
            HkdfMode::Expand => Ok(KdfStream::expanding(secret.clone())),
        }
    }

    fn output(&mut self, out: &mut [u8]) -> CoreResult<()> {
        if self.stream.is_none() {
            let stream = self.start()?;
            self.stream = Some(stream);
        }
        let stream = self.stream.as_mut().ok_or(Error::CorruptionDetected)?;
        let hash = self.hash;
        let info = &self.info;
        serve(stream, out, |stream| {
            // T(n) = HMAC(prk, T(n-1) || info || n)
            stream.counter = stream.counter.checked_add(1).ok_or(Error::InsufficientData)?;
            let counter = [stream.counter];
            stream.block = hmac_over(hash, &stream.prk, &[&stream.block, info, &counter])?;
            Ok(())
        })
    }
}

pub struct Tls12State {
    hash: HashAlg,
    psk_to_ms: bool,
    seed: Zeroizing<Vec<u8>>,
    other_secret: Option<Zeroizing<Vec<u8>>>,
    secret: Option<Zeroizing<Vec<u8>>>,
    label: Zeroizing<Vec<u8>>,
    label_seed: Zeroizing<Vec<u8>>,
    a: Zeroizing<Vec<u8>>,
    stream: Option<KdfStream>,
}

impl Tls12State {
    fn premaster(&self) -> CoreResult<Zeroizing<Vec<u8>>> {
        let psk = self.secret.as_ref().ok_or(Error::BadState)?;
        if !self.psk_to_ms {
            return Ok(psk.clone());
        }
        // The PSK premaster secret: other_secret (or a PSK-length run of
        // zeros) and the PSK, each with a 16-bit length prefix.
        let other: &[u8] = match &self.other_secret {
            Some(other) => other,
            None => &[],
        };
        let other_len = if other.is_empty() { psk.len() } else { other.len() };
        let mut premaster = Zeroizing::new(Vec::with_capacity(4 + other_len + psk.len()));
        premaster.extend_from_slice(&(other_len as u16).to_be_bytes());
        if other.is_empty() {
            premaster.extend_from_slice(&vec![0u8; other_len]);
        } else {
            premaster.extend_from_slice(other);
        }
        premaster.extend_from_slice(&(psk.len() as u16).to_be_bytes());
        premaster.extend_from_slice(psk);
        Ok(premaster)
    }

    fn output(&mut self, out: &mut [u8]) -> CoreResult<()> {
        if self.stream.is_none() {
            let secret = self.premaster()?;
            let mut label_seed = Zeroizing::new(Vec::new());
            label_seed.extend_from_slice(&self.label);
            label_seed.extend_from_slice(&self.seed);
            self.a = label_seed.clone();
            self.label_seed = label_seed;
            self.stream = Some(KdfStream::expanding(secret));
        }
        let stream = self.stream.as_mut().ok_or(Error::CorruptionDetected)?;
        let hash = self.hash;
        let label_seed = &self.label_seed;
        let a = &mut self.a;
        serve(stream, out, |stream| {
            // P_hash: A(n) = HMAC(secret, A(n-1)),
            // block(n) = HMAC(secret, A(n) || label || seed)
            stream.counter = stream.counter.checked_add(1).ok_or(Error::InsufficientData)?;
            *a = hmac_over(hash, &stream.prk, &[a.as_slice()])?;
            stream.block = hmac_over(hash, &stream.prk, &[a.as_slice(), label_seed.as_slice()])?;
            Ok(())
        })
    }
}

pub struct Pbkdf2State {
    hash: HashAlg,
    cost: Option<u64>,
    salt: Zeroizing<Vec<u8>>,
    password: Option<Zeroizing<Vec<u8>>>,
    stream: Option<KdfStream>,
    counter: u32,
}

impl Pbkdf2State {
    fn block(&self, index: u32) -> CoreResult<Zeroizing<Vec<u8>>> {
        let password = self.password.as_ref().ok_or(Error::BadState)?;
        let cost = self.cost.ok_or(Error::BadState)?;
        let mut u = hmac_over(
            self.hash,
            password,
            &[&self.salt, &index.to_be_bytes()],
        )?;
        let mut acc = u.clone();
        for _ in 1..cost {
            u = hmac_over(self.hash, password, &[&u])?;
            for (a, b) in acc.iter_mut().zip(u.iter()) {
                *a ^= b;
            }
        }
        Ok(acc)
    }

    fn output(&mut self, out: &mut [u8]) -> CoreResult<()> {
        if self.stream.is_none() {
            if self.password.is_none() || self.cost.is_none() {
                return Err(Error::BadState);
            }
            self.stream = Some(KdfStream::fixed(Zeroizing::new(Vec::new())));
        }
        let mut written = 0;
        while written < out.len() {
            let need_block = {
                let stream = self.stream.as_ref().ok_or(Error::CorruptionDetected)?;
                stream.pos == stream.block.len()
            };
            if need_block {
                self.counter = self.counter.checked_add(1).ok_or(Error::InsufficientData)?;
                let block = self.block(self.counter)?;
                let stream = self.stream.as_mut().ok_or(Error::CorruptionDetected)?;
                stream.block = block;
                stream.pos = 0;
            }
            let stream = self.stream.as_mut().ok_or(Error::CorruptionDetected)?;
            let n = (out.len() - written).min(stream.block.len() - stream.pos);
            out[written..written + n].copy_from_slice(&stream.block[stream.pos..stream.pos + n]);
            stream.pos += n;
            written += n;
        }
        Ok(())
    }
}

pub struct EcJpakeToPmsState {
    digest: Option<Zeroizing<[u8; 32]>>,
    pos: usize,
}

pub enum SoftwareKdf {
    Hkdf(HkdfState),
    Tls12(Tls12State),
    Pbkdf2(Pbkdf2State),
    EcJpakeToPms(EcJpakeToPmsState),
}

/// Copy bytes out of the stream, refilling blocks with `next_block` as
/// needed.
fn serve(
    stream: &mut KdfStream,
    out: &mut [u8],
    mut next_block: impl FnMut(&mut KdfStream) -> CoreResult<()>,
) -> CoreResult<()> {
    let mut written = 0;
    while written < out.len() {
        if stream.pos == stream.block.len() {
            if !stream.expands {
                return Err(Error::InsufficientData);
            }
            next_block(stream)?;
            stream.pos = 0;
        }
        let n = (out.len() - written).min(stream.block.len() - stream.pos);
        out[written..written + n].copy_from_slice(&stream.block[stream.pos..stream.pos + n]);
        stream.pos += n;
        written += n;
    }
    Ok(())
}

// Uninhabited: this build carries no PAKE math, so a PAKE context can never
// be constructed.
pub enum SoftwarePake {}

fn hash_message(hash: HashAlg, message: &[u8]) -> Zeroizing<Vec<u8>> {
    match hash {
        HashAlg::Sha256 => Zeroizing::new(Sha256::digest(message).as_slice().to_vec()),
        HashAlg::Sha384 => Zeroizing::new(Sha384::digest(message).as_slice().to_vec()),
        HashAlg::Sha512 => Zeroizing::new(Sha512::digest(message).as_slice().to_vec()),
    }
}

fn ecdsa_verifying_key(attributes: &KeyAttributes, material: &[u8]) -> CoreResult<EcdsaVerifyingKey> {
    if attributes.key_type.is_public_key() {
        EcdsaVerifyingKey::from_sec1_bytes(material).map_err(|_| Error::InvalidArgument)
    } else {
        let signing = EcdsaSigningKey::from_slice(material).map_err(|_| Error::InvalidArgument)?;
        Ok(*signing.verifying_key())
    }
}

fn ed25519_verifying_key(
    attributes: &KeyAttributes,
    material: &[u8],
) -> CoreResult<Ed25519VerifyingKey> {
    if attributes.key_type.is_public_key() {
        Ed25519VerifyingKey::from_bytes(&to_array(material)?).map_err(|_| Error::InvalidArgument)
    } else {
        let signing = Ed25519SigningKey::from_bytes(&to_array(material)?);
        Ok(signing.verifying_key())
    }
}

fn write_signature(out: &mut [u8], signature: &[u8]) -> CoreResult<usize> {
    if out.len() < signature.len() {
        return Err(Error::BufferTooSmall);
    }
    out[..signature.len()].copy_from_slice(signature);
    Ok(signature.len())
}

impl CryptoProvider for SoftwareProvider {
    type HashOp = SoftwareHash;
    type MacOp = SoftwareMac;
    type CipherOp = SoftwareCipher;
    type AeadOp = SoftwareAead;
    type KdfOp = SoftwareKdf;
    type PakeOp = SoftwarePake;

    fn import_key(&self, attributes: &KeyAttributes, data: &[u8]) -> CoreResult<(Vec<u8>, usize)> {
        match attributes.key_type {
            KeyType::EccKeyPair(EccFamily::SecpR1) => {
                if data.len() != 32 {
                    return Err(Error::NotSupported);
                }
                // The scalar must be nonzero and below the group order; a
                // candidate outside the range is an invalid argument, which
                // the derive retry loop relies on.
                p256::SecretKey::from_slice(data).map_err(|_| Error::InvalidArgument)?;
                Ok((data.to_vec(), 256))
            }
            KeyType::EccKeyPair(EccFamily::Montgomery) => {
                if data.len() != 32 {
                    return Err(Error::InvalidArgument);
                }
                Ok((data.to_vec(), 255))
            }
            KeyType::EccKeyPair(EccFamily::TwistedEdwards) => {
                if data.len() != 32 {
                    return Err(Error::InvalidArgument);
                }
                Ok((data.to_vec(), 255))
            }
            KeyType::EccPublicKey(EccFamily::SecpR1) => {
                p256::PublicKey::from_sec1_bytes(data).map_err(|_| Error::InvalidArgument)?;
                Ok((data.to_vec(), 256))
            }
            KeyType::EccPublicKey(EccFamily::Montgomery) => {
                if data.len() != 32 {
                    return Err(Error::InvalidArgument);
                }
                Ok((data.to_vec(), 255))
            }
            KeyType::EccPublicKey(EccFamily::TwistedEdwards) => {
                Ed25519VerifyingKey::from_bytes(&to_array(data)?)
                    .map_err(|_| Error::InvalidArgument)?;
                Ok((data.to_vec(), 255))
            }
            _ => Err(Error::NotSupported),
        }
    }

    fn generate_key(&self, attributes: &KeyAttributes) -> CoreResult<Vec<u8>> {
        match attributes.key_type {
            KeyType::EccKeyPair(EccFamily::SecpR1) => {
                if attributes.bits != 256 {
                    return Err(Error::NotSupported);
                }
                for _ in 0..GENERATE_SCALAR_ATTEMPTS {
                    let mut candidate = Zeroizing::new([0u8; 32]);
                    getrandom(&mut *candidate).map_err(|_| Error::GenericError)?;
                    if p256::SecretKey::from_slice(&*candidate).is_ok() {
                        return Ok(candidate.to_vec());
                    }
                }
                Err(Error::GenericError)
            }
            KeyType::EccKeyPair(EccFamily::Montgomery)
            | KeyType::EccKeyPair(EccFamily::TwistedEdwards) => {
                if attributes.bits != 255 {
                    return Err(Error::NotSupported);
                }
                let mut seed = Zeroizing::new([0u8; 32]);
                getrandom(&mut *seed).map_err(|_| Error::GenericError)?;
                Ok(seed.to_vec())
            }
            _ => Err(Error::NotSupported),
        }
    }

    fn export_public_key(
        &self,
        attributes: &KeyAttributes,
        material: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        match attributes.key_type {
            KeyType::EccKeyPair(EccFamily::SecpR1) => {
                let secret =
                    p256::SecretKey::from_slice(material).map_err(|_| Error::InvalidArgument)?;
                let point = secret.public_key().to_encoded_point(false);
                write_signature(out, point.as_bytes())
            }
            KeyType::EccKeyPair(EccFamily::Montgomery) => {
                let secret = X25519Secret::from(to_array::<32>(material)?);
                let public = X25519PublicKey::from(&secret);
                write_signature(out, public.as_bytes())
            }
            KeyType::EccKeyPair(EccFamily::TwistedEdwards) => {
                let signing = Ed25519SigningKey::from_bytes(&to_array(material)?);
                write_signature(out, signing.verifying_key().as_bytes())
            }
            _ => Err(Error::NotSupported),
        }
    }

    fn hash_setup(&self, alg: HashAlg) -> CoreResult<SoftwareHash> {
        Ok(match alg {
            HashAlg::Sha256 => SoftwareHash::Sha256(Sha256::new()),
            HashAlg::Sha384 => SoftwareHash::Sha384(Sha384::new()),
            HashAlg::Sha512 => SoftwareHash::Sha512(Sha512::new()),
        })
    }

    fn hash_update(&self, op: &mut SoftwareHash, input: &[u8]) -> CoreResult<()> {
        match op {
            SoftwareHash::Sha256(digest) => digest.update(input),
            SoftwareHash::Sha384(digest) => digest.update(input),
            SoftwareHash::Sha512(digest) => digest.update(input),
        }
        Ok(())
    }

    fn hash_finish(&self, op: SoftwareHash, out: &mut [u8]) -> CoreResult<usize> {
        let digest: Vec<u8> = match op {
            SoftwareHash::Sha256(digest) => digest.finalize().as_slice().to_vec(),
            SoftwareHash::Sha384(digest) => digest.finalize().as_slice().to_vec(),
            SoftwareHash::Sha512(digest) => digest.finalize().as_slice().to_vec(),
        };
        if out.len() < digest.len() {
            return Err(Error::BufferTooSmall);
        }
        out[..digest.len()].copy_from_slice(&digest);
        Ok(digest.len())
    }

    fn hash_clone_op(&self, op: &SoftwareHash) -> CoreResult<SoftwareHash> {
        Ok(match op {
            SoftwareHash::Sha256(digest) => SoftwareHash::Sha256(digest.clone()),
            SoftwareHash::Sha384(digest) => SoftwareHash::Sha384(digest.clone()),
            SoftwareHash::Sha512(digest) => SoftwareHash::Sha512(digest.clone()),
        })
    }

    fn mac_setup(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &MacAlg,
    ) -> CoreResult<SoftwareMac> {
        match alg.base {
            MacBase::Hmac(hash) => {
                if attributes.key_type != KeyType::Hmac {
                    return Err(Error::InvalidArgument);
                }
                Ok(match hash {
                    HashAlg::Sha256 => SoftwareMac::HmacSha256(
                        <Hmac<Sha256> as Mac>::new_from_slice(key)
                            .map_err(|_| Error::InvalidArgument)?,
                    ),
                    HashAlg::Sha384 => SoftwareMac::HmacSha384(
                        <Hmac<Sha384> as Mac>::new_from_slice(key)
                            .map_err(|_| Error::InvalidArgument)?,
                    ),
                    HashAlg::Sha512 => SoftwareMac::HmacSha512(
                        <Hmac<Sha512> as Mac>::new_from_slice(key)
                            .map_err(|_| Error::InvalidArgument)?,
                    ),
                })
            }
            MacBase::Cmac => match (attributes.key_type, key.len()) {
                (KeyType::Aes, 16) => Ok(SoftwareMac::CmacAes128(
                    <Cmac<Aes128> as Mac>::new_from_slice(key)
                        .map_err(|_| Error::InvalidArgument)?,
                )),
                (KeyType::Aes, 24) => Ok(SoftwareMac::CmacAes192(
                    <Cmac<Aes192> as Mac>::new_from_slice(key)
                        .map_err(|_| Error::InvalidArgument)?,
                )),
                (KeyType::Aes, 32) => Ok(SoftwareMac::CmacAes256(
                    <Cmac<Aes256> as Mac>::new_from_slice(key)
                        .map_err(|_| Error::InvalidArgument)?,
                )),
                _ => Err(Error::NotSupported),
            },
        }
    }

    fn mac_update(&self, op: &mut SoftwareMac, input: &[u8]) -> CoreResult<()> {
        match op {
            SoftwareMac::HmacSha256(mac) => mac.update(input),
            SoftwareMac::HmacSha384(mac) => mac.update(input),
            SoftwareMac::HmacSha512(mac) => mac.update(input),
            SoftwareMac::CmacAes128(mac) => mac.update(input),
            SoftwareMac::CmacAes192(mac) => mac.update(input),
            SoftwareMac::CmacAes256(mac) => mac.update(input),
        }
        Ok(())
    }

    fn mac_finish(&self, op: SoftwareMac, out: &mut [u8]) -> CoreResult<usize> {
        let tag: Vec<u8> = match op {
            SoftwareMac::HmacSha256(mac) => mac.finalize().into_bytes().as_slice().to_vec(),
            SoftwareMac::HmacSha384(mac) => mac.finalize().into_bytes().as_slice().to_vec(),
            SoftwareMac::HmacSha512(mac) => mac.finalize().into_bytes().as_slice().to_vec(),
            SoftwareMac::CmacAes128(mac) => mac.finalize().into_bytes().as_slice().to_vec(),
            SoftwareMac::CmacAes192(mac) => mac.finalize().into_bytes().as_slice().to_vec(),
            SoftwareMac::CmacAes256(mac) => mac.finalize().into_bytes().as_slice().to_vec(),
        };
        if out.len() < tag.len() {
            return Err(Error::BufferTooSmall);
        }
        out[..tag.len()].copy_from_slice(&tag);
        Ok(tag.len())
    }

    fn cipher_setup(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: CipherAlg,
        encrypt: bool,
    ) -> CoreResult<SoftwareCipher> {
        if attributes.key_type != KeyType::Aes {
            return Err(Error::NotSupported);
        }
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(Error::InvalidArgument);
        }
        Ok(SoftwareCipher {
            alg,
            encrypt,
            key: Zeroizing::new(key.to_vec()),
            engine: None,
            partial: Zeroizing::new(Vec::new()),
        })
    }

    fn cipher_set_iv(&self, op: &mut SoftwareCipher, iv: &[u8]) -> CoreResult<()> {
        if op.engine.is_some() {
            return Err(Error::BadState);
        }
        if iv.len() != 16 {
            return Err(Error::InvalidArgument);
        }
        op.engine = Some(op.build_engine(iv)?);
        Ok(())
    }

    fn cipher_update(
        &self,
        op: &mut SoftwareCipher,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        if op.engine.is_none() {
            return Err(Error::BadState);
        }
        let is_stream = matches!(
            op.engine,
            Some(CipherEngine::Ctr128(_) | CipherEngine::Ctr192(_) | CipherEngine::Ctr256(_))
        );
        if is_stream {
            if out.len() < input.len() {
                return Err(Error::BufferTooSmall);
            }
            let engine = op.engine.as_mut().ok_or(Error::BadState)?;
            let applied = match engine {
                CipherEngine::Ctr128(c) => c.apply_keystream_b2b(input, &mut out[..input.len()]),
                CipherEngine::Ctr192(c) => c.apply_keystream_b2b(input, &mut out[..input.len()]),
                CipherEngine::Ctr256(c) => c.apply_keystream_b2b(input, &mut out[..input.len()]),
                _ => return Err(Error::CorruptionDetected),
            };
            applied.map_err(|_| Error::GenericError)?;
            return Ok(input.len());
        }
        op.partial.extend_from_slice(input);
        let full = op.partial.len() - op.partial.len() % 16;
        if out.len() < full {
            return Err(Error::BufferTooSmall);
        }
        let data = Zeroizing::new(op.partial[..full].to_vec());
        let engine = op.engine.as_mut().ok_or(Error::BadState)?;
        cbc_blocks(engine, &data, &mut out[..full])?;
        op.partial.drain(..full);
        Ok(full)
    }

    fn cipher_finish(&self, op: SoftwareCipher, _out: &mut [u8]) -> CoreResult<usize> {
        // No padding mode is carried, so nothing is buffered at finish
        // except a misuse: trailing bytes that never filled a block.
        if !op.partial.is_empty() {
            return Err(Error::InvalidArgument);
        }
        Ok(0)
    }

    fn aead_setup(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &AeadAlg,
        encrypt: bool,
    ) -> CoreResult<SoftwareAead> {
        match (alg.base, attributes.key_type) {
            (AeadBase::Gcm, KeyType::Aes) => {
                if !matches!(key.len(), 16 | 24 | 32) {
                    return Err(Error::InvalidArgument);
                }
            }
            (AeadBase::ChaCha20Poly1305, KeyType::ChaCha20) => {
                if key.len() != 32 {
                    return Err(Error::InvalidArgument);
                }
            }
            _ => return Err(Error::NotSupported),
        }
        Ok(SoftwareAead {
            base: alg.base,
            tag_length: alg.tag_length,
            encrypt,
            key: Zeroizing::new(key.to_vec()),
            nonce: None,
            aad: Vec::new(),
            data: Zeroizing::new(Vec::new()),
        })
    }

    fn aead_set_nonce(&self, op: &mut SoftwareAead, nonce: &[u8]) -> CoreResult<()> {
        if op.nonce.is_some() {
            return Err(Error::BadState);
        }
        op.nonce = Some(to_array(nonce)?);
        Ok(())
    }

    fn aead_update_ad(&self, op: &mut SoftwareAead, input: &[u8]) -> CoreResult<()> {
        op.aad.extend_from_slice(input);
        Ok(())
    }

    fn aead_update(
        &self,
        op: &mut SoftwareAead,
        input: &[u8],
        _out: &mut [u8],
    ) -> CoreResult<usize> {
        // Buffered: everything is produced at finish/verify.
        op.data.extend_from_slice(input);
        Ok(0)
    }

    fn aead_finish(
        &self,
        op: SoftwareAead,
        ciphertext: &mut [u8],
        tag: &mut [u8],
    ) -> CoreResult<(usize, usize)> {
        let SoftwareAead {
            base,
            encrypt,
            key,
            nonce,
            aad,
            mut data,
            ..
        } = op;
        if !encrypt {
            return Err(Error::BadState);
        }
        let nonce = nonce.ok_or(Error::BadState)?;
        if ciphertext.len() < data.len() || tag.len() < 16 {
            return Err(Error::BufferTooSmall);
        }
        let full_tag = detached_encrypt(base, &key, &nonce, &aad, &mut data)?;
        ciphertext[..data.len()].copy_from_slice(&data);
        tag[..16].copy_from_slice(&full_tag);
        Ok((data.len(), 16))
    }

    fn aead_verify(&self, op: SoftwareAead, plaintext: &mut [u8], tag: &[u8]) -> CoreResult<usize> {
        let SoftwareAead {
            base,
            tag_length,
            encrypt,
            key,
            nonce,
            aad,
            mut data,
            ..
        } = op;
        if encrypt {
            return Err(Error::BadState);
        }
        let nonce = nonce.ok_or(Error::BadState)?;
        if tag.len() != tag_length {
            return Err(Error::InvalidSignature);
        }
        if plaintext.len() < data.len() {
            return Err(Error::BufferTooSmall);
        }
        if tag_length == 16 {
            let full_tag = to_array::<16>(tag).map_err(|_| Error::InvalidSignature)?;
            detached_decrypt(base, &key, &nonce, &aad, &mut data, &full_tag)?;
            plaintext[..data.len()].copy_from_slice(&data);
            return Ok(data.len());
        }
        // Truncated tag: recover the plaintext with the encryption direction
        // (the keystream is symmetric), recompute the full tag over the
        // ciphertext, and compare the prefix in constant time.
        let ciphertext = data.clone();
        detached_encrypt(base, &key, &nonce, &aad, &mut data)?;
        let mut check = data.clone();
        let full_tag = detached_encrypt(base, &key, &nonce, &aad, &mut check)?;
        if *check != *ciphertext {
            return Err(Error::CorruptionDetected);
        }
        if !bool::from(full_tag[..tag_length].ct_eq(tag)) {
            return Err(Error::InvalidSignature);
        }
        plaintext[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn sign_message(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &SignAlg,
        message: &[u8],
        signature: &mut [u8],
    ) -> CoreResult<usize> {
        match alg {
            SignAlg::Ecdsa(_) => {
                let hash = match alg {
                    SignAlg::Ecdsa(crate::algorithm::HashSel::Specific(hash)) => *hash,
                    _ => return Err(Error::InvalidArgument),
                };
                let digest = hash_message(hash, message);
                self.sign_hash(attributes, key, alg, &digest, signature)
            }
            SignAlg::Ed25519 => {
                if attributes.key_type != KeyType::EccKeyPair(EccFamily::TwistedEdwards) {
                    return Err(Error::InvalidArgument);
                }
                let signing = Ed25519SigningKey::from_bytes(&to_array(key)?);
                let sig: Ed25519Signature = signing.sign(message);
                write_signature(signature, &sig.to_bytes())
            }
        }
    }

    fn verify_message(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &SignAlg,
        message: &[u8],
        signature: &[u8],
    ) -> CoreResult<()> {
        match alg {
            SignAlg::Ecdsa(_) => {
                let hash = match alg {
                    SignAlg::Ecdsa(crate::algorithm::HashSel::Specific(hash)) => *hash,
                    _ => return Err(Error::InvalidArgument),
                };
                let digest = hash_message(hash, message);
                self.verify_hash(attributes, key, alg, &digest, signature)
            }
            SignAlg::Ed25519 => {
                let verifying = ed25519_verifying_key(attributes, key)?;
                let sig = Ed25519Signature::from_slice(signature)
                    .map_err(|_| Error::InvalidSignature)?;
                verifying
                    .verify(message, &sig)
                    .map_err(|_| Error::InvalidSignature)
            }
        }
    }

    fn sign_hash(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &SignAlg,
        hash: &[u8],
        signature: &mut [u8],
    ) -> CoreResult<usize> {
        match alg {
            SignAlg::Ecdsa(_) => {
                if attributes.key_type != KeyType::EccKeyPair(EccFamily::SecpR1) {
                    return Err(Error::InvalidArgument);
                }
                let signing =
                    EcdsaSigningKey::from_slice(key).map_err(|_| Error::InvalidArgument)?;
                let sig: EcdsaSignature = signing
                    .sign_prehash(hash)
                    .map_err(|_| Error::InvalidArgument)?;
                write_signature(signature, sig.to_bytes().as_slice())
            }
            SignAlg::Ed25519 => Err(Error::InvalidArgument),
        }
    }

    fn verify_hash(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &SignAlg,
        hash: &[u8],
        signature: &[u8],
    ) -> CoreResult<()> {
        match alg {
            SignAlg::Ecdsa(_) => {
                if !matches!(
                    attributes.key_type,
                    KeyType::EccKeyPair(EccFamily::SecpR1)
                        | KeyType::EccPublicKey(EccFamily::SecpR1)
                ) {
                    return Err(Error::InvalidArgument);
                }
                let verifying = ecdsa_verifying_key(attributes, key)?;
                let sig =
                    EcdsaSignature::from_slice(signature).map_err(|_| Error::InvalidSignature)?;
                verifying
                    .verify_prehash(hash, &sig)
                    .map_err(|_| Error::InvalidSignature)
            }
            SignAlg::Ed25519 => Err(Error::InvalidArgument),
        }
    }

    fn key_agreement(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: RawAgreement,
        peer_key: &[u8],
        shared_secret: &mut [u8],
    ) -> CoreResult<usize> {
        match alg {
            RawAgreement::X25519 => {
                if attributes.key_type != KeyType::EccKeyPair(EccFamily::Montgomery) {
                    return Err(Error::InvalidArgument);
                }
                let secret = X25519Secret::from(to_array::<32>(key)?);
                let peer = X25519PublicKey::from(to_array::<32>(peer_key)?);
                let shared = secret.diffie_hellman(&peer);
                write_signature(shared_secret, shared.as_bytes())
            }
            RawAgreement::EcdhP256 => {
                if attributes.key_type != KeyType::EccKeyPair(EccFamily::SecpR1) {
                    return Err(Error::InvalidArgument);
                }
                let secret =
                    p256::SecretKey::from_slice(key).map_err(|_| Error::InvalidArgument)?;
                let peer = p256::PublicKey::from_sec1_bytes(peer_key)
                    .map_err(|_| Error::InvalidArgument)?;
                let shared =
                    p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                write_signature(shared_secret, shared.raw_secret_bytes().as_slice())
            }
        }
    }

    fn derivation_setup(&self, alg: KdfAlg) -> CoreResult<SoftwareKdf> {
        Ok(match alg {
            KdfAlg::Hkdf(hash) | KdfAlg::HkdfExtract(hash) | KdfAlg::HkdfExpand(hash) => {
                SoftwareKdf::Hkdf(HkdfState {
                    hash,
                    mode: match alg {
                        KdfAlg::HkdfExtract(_) => HkdfMode::Extract,
                        KdfAlg::HkdfExpand(_) => HkdfMode::Expand,
                        _ => HkdfMode::Full,
                    },
                    salt: None,
                    secret: None,
                    info: Zeroizing::new(Vec::new()),
                    stream: None,
                })
            }
            KdfAlg::Tls12Prf(hash) | KdfAlg::Tls12PskToMs(hash) => {
                if !matches!(hash, HashAlg::Sha256 | HashAlg::Sha384) {
                    return Err(Error::NotSupported);
                }
                SoftwareKdf::Tls12(Tls12State {
                    hash,
                    psk_to_ms: matches!(alg, KdfAlg::Tls12PskToMs(_)),
                    seed: Zeroizing::new(Vec::new()),
                    other_secret: None,
                    secret: None,
                    label: Zeroizing::new(Vec::new()),
                    label_seed: Zeroizing::new(Vec::new()),
                    a: Zeroizing::new(Vec::new()),
                    stream: None,
                })
            }
            KdfAlg::Pbkdf2Hmac(hash) => SoftwareKdf::Pbkdf2(Pbkdf2State {
                hash,
                cost: None,
                salt: Zeroizing::new(Vec::new()),
                password: None,
                stream: None,
                counter: 0,
            }),
            KdfAlg::EcJpakeToPms => SoftwareKdf::EcJpakeToPms(EcJpakeToPmsState {
                digest: None,
                pos: 0,
            }),
        })
    }

    fn derivation_input_bytes(
        &self,
        op: &mut SoftwareKdf,
        step: DerivationStep,
        data: &[u8],
    ) -> CoreResult<()> {
        match (op, step) {
            (SoftwareKdf::Hkdf(state), DerivationStep::Salt) => {
                state.salt = Some(Zeroizing::new(data.to_vec()));
            }
            (SoftwareKdf::Hkdf(state), DerivationStep::Secret) => {
                state.secret = Some(Zeroizing::new(data.to_vec()));
            }
            (SoftwareKdf::Hkdf(state), DerivationStep::Info) => {
                state.info = Zeroizing::new(data.to_vec());
            }
            (SoftwareKdf::Tls12(state), DerivationStep::Seed) => {
                state.seed = Zeroizing::new(data.to_vec());
            }
            (SoftwareKdf::Tls12(state), DerivationStep::OtherSecret) => {
                state.other_secret = Some(Zeroizing::new(data.to_vec()));
            }
            (SoftwareKdf::Tls12(state), DerivationStep::Secret) => {
                state.secret = Some(Zeroizing::new(data.to_vec()));
            }
            (SoftwareKdf::Tls12(state), DerivationStep::Label) => {
                state.label = Zeroizing::new(data.to_vec());
            }
            // Successive salt chunks concatenate.
            (SoftwareKdf::Pbkdf2(state), DerivationStep::Salt) => {
                state.salt.extend_from_slice(data);
            }
            (SoftwareKdf::Pbkdf2(state), DerivationStep::Password) => {
                state.password = Some(Zeroizing::new(data.to_vec()));
            }
            (SoftwareKdf::EcJpakeToPms(state), DerivationStep::Secret) => {
                // The shared point, as an uncompressed SEC1 point or its
                // bare x-coordinate; the premaster is SHA-256 of x.
                let x = match data.len() {
                    65 if data[0] == 0x04 => &data[1..33],
                    32 => data,
                    _ => return Err(Error::InvalidArgument),
                };
                state.digest = Some(Zeroizing::new(
                    Sha256::digest(x).into(),
                ));
            }
            _ => return Err(Error::InvalidArgument),
        }
        Ok(())
    }

    fn derivation_input_integer(
        &self,
        op: &mut SoftwareKdf,
        step: DerivationStep,
        value: u64,
    ) -> CoreResult<()> {
        match (op, step) {
            (SoftwareKdf::Pbkdf2(state), DerivationStep::Cost) => {
                if value == 0 {
                    return Err(Error::InvalidArgument);
                }
                state.cost = Some(value);
                Ok(())
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    fn derivation_output_bytes(&self, op: &mut SoftwareKdf, out: &mut [u8]) -> CoreResult<()> {
        match op {
            SoftwareKdf::Hkdf(state) => state.output(out),
            SoftwareKdf::Tls12(state) => state.output(out),
            SoftwareKdf::Pbkdf2(state) => state.output(out),
            SoftwareKdf::EcJpakeToPms(state) => {
                let digest = state.digest.as_ref().ok_or(Error::BadState)?;
                let remaining = digest.len().saturating_sub(state.pos);
                if out.len() > remaining {
                    return Err(Error::InsufficientData);
                }
                out.copy_from_slice(&digest[state.pos..state.pos + out.len()]);
                state.pos += out.len();
                Ok(())
            }
        }
    }
}
