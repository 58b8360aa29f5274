use arx_crypto_core::adapters::{EntropyAdapter, StorageAdapter};
use arx_crypto_core::aead::AeadOperation;
use arx_crypto_core::algorithm::{
    AeadAlg, AeadBase, Algorithm, CipherAlg, HashAlg, HashSel, MacAlg, SignAlg,
};
use arx_crypto_core::cipher::CipherOperation;
use arx_crypto_core::core::{CoreConfig, CryptoCore};
use arx_crypto_core::error::{CoreResult, Error};
use arx_crypto_core::hash_ops::HashOperation;
use arx_crypto_core::mac::MacOperation;
use arx_crypto_core::software::SoftwareProvider;
use arx_crypto_core::types::{
    EccFamily, KeyAttributes, KeyId, KeyType, Policy, Usage, OUTPUT_SENTINEL,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

#[derive(Default)]
struct MemStorage {
    data: RefCell<HashMap<u32, Vec<u8>>>,
}

impl StorageAdapter for MemStorage {
    type Error = String;

    fn save(&self, id: KeyId, record: &[u8]) -> Result<(), Self::Error> {
        self.data.borrow_mut().insert(id.0, record.to_vec());
        Ok(())
    }

    fn load(&self, id: KeyId) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.data.borrow().get(&id.0).cloned())
    }

    fn delete(&self, id: KeyId) -> Result<(), Self::Error> {
        self.data.borrow_mut().remove(&id.0);
        Ok(())
    }
}

struct CountingEntropy {
    counter: Cell<u8>,
}

impl Default for CountingEntropy {
    fn default() -> Self {
        CountingEntropy {
            counter: Cell::new(1),
        }
    }
}

impl EntropyAdapter for CountingEntropy {
    fn fill(&self, buf: &mut [u8]) -> CoreResult<()> {
        let value = self.counter.get();
        self.counter.set(value.wrapping_add(1));
        buf.fill(value);
        Ok(())
    }
}

type TestCore = CryptoCore<SoftwareProvider, MemStorage, CountingEntropy>;

fn make_core() -> TestCore {
    CryptoCore::new(
        SoftwareProvider::new(),
        MemStorage::default(),
        CountingEntropy::default(),
        CoreConfig::default(),
    )
}

fn import_key(core: &mut TestCore, key_type: KeyType, material: &[u8], policy: Policy) -> KeyId {
    let attributes = KeyAttributes {
        key_type,
        policy,
        ..Default::default()
    };
    core.import_key(&attributes, material).expect("import key")
}

fn hmac_policy() -> Policy {
    Policy {
        usage: Usage::SIGN_MESSAGE | Usage::VERIFY_MESSAGE,
        alg: Some(Algorithm::Mac(MacAlg::hmac(HashAlg::Sha256).at_least(4))),
        alg2: None,
    }
}

// Hash

#[test]
fn hash_multipart_matches_one_shot() {
    let mut core = make_core();
    let mut one_shot = [0u8; 32];
    core.hash_compute(HashAlg::Sha256, b"abcdefgh", &mut one_shot)
        .expect("one-shot");

    let mut op = HashOperation::new();
    core.hash_setup(&mut op, HashAlg::Sha256).expect("setup");
    core.hash_update(&mut op, b"abc").expect("update");
    core.hash_update(&mut op, b"").expect("empty update");
    core.hash_update(&mut op, b"defgh").expect("update");
    let mut streamed = [0u8; 32];
    assert_eq!(core.hash_finish(&mut op, &mut streamed), Ok(32));
    assert_eq!(one_shot, streamed);
}

#[test]
fn hash_compare_detects_mutation() {
    let mut core = make_core();
    let mut digest = [0u8; 32];
    core.hash_compute(HashAlg::Sha256, b"payload", &mut digest)
        .expect("compute");
    core.hash_compare(HashAlg::Sha256, b"payload", &digest)
        .expect("compare");
    digest[5] ^= 0x01;
    assert_eq!(
        core.hash_compare(HashAlg::Sha256, b"payload", &digest),
        Err(Error::InvalidSignature)
    );
}

#[test]
fn hash_update_before_setup_is_bad_state() {
    let mut core = make_core();
    let mut op = HashOperation::new();
    assert_eq!(core.hash_update(&mut op, b"x"), Err(Error::BadState));
    // The context is still blank, so setup succeeds immediately.
    core.hash_setup(&mut op, HashAlg::Sha256).expect("setup");
    // And a second setup on the now-active context is refused.
    assert_eq!(
        core.hash_setup(&mut op, HashAlg::Sha256),
        Err(Error::BadState)
    );
}

#[test]
fn hash_clone_continues_independently() {
    let mut core = make_core();
    let mut op = HashOperation::new();
    core.hash_setup(&mut op, HashAlg::Sha512).expect("setup");
    core.hash_update(&mut op, b"shared-prefix").expect("update");

    let mut forked = HashOperation::new();
    core.hash_clone(&op, &mut forked).expect("clone");
    core.hash_update(&mut op, b"-a").expect("update a");
    core.hash_update(&mut forked, b"-b").expect("update b");

    let mut digest_a = [0u8; 64];
    let mut digest_b = [0u8; 64];
    core.hash_finish(&mut op, &mut digest_a).expect("finish a");
    core.hash_finish(&mut forked, &mut digest_b).expect("finish b");
    assert_ne!(digest_a, digest_b);

    let mut expected = [0u8; 64];
    core.hash_compute(HashAlg::Sha512, b"shared-prefix-b", &mut expected)
        .expect("direct");
    assert_eq!(digest_b, expected);
}

#[test]
fn hash_finish_sentinels_trailing_bytes() {
    let mut core = make_core();
    let mut out = [0u8; 40];
    let written = core
        .hash_compute(HashAlg::Sha256, b"x", &mut out)
        .expect("compute");
    assert_eq!(written, 32);
    assert!(out[32..].iter().all(|&b| b == OUTPUT_SENTINEL));
}

// MAC

#[test]
fn mac_compute_verify_and_bit_flip() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Hmac, &[0x42; 32], hmac_policy());
    let alg = MacAlg::hmac(HashAlg::Sha256);

    let mut tag = [0u8; 32];
    let written = core.mac_compute(key, &alg, b"message", &mut tag).expect("compute");
    assert_eq!(written, 32);
    core.mac_verify(key, &alg, b"message", &tag).expect("verify");

    let mut mutated = tag;
    mutated[0] ^= 0x80;
    assert_eq!(
        core.mac_verify(key, &alg, b"message", &mutated),
        Err(Error::InvalidSignature)
    );
    assert_eq!(
        core.mac_verify(key, &alg, b"other message", &tag),
        Err(Error::InvalidSignature)
    );
}

#[test]
fn mac_truncation_rules() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Hmac, &[0x42; 32], hmac_policy());

    let truncated = MacAlg::hmac(HashAlg::Sha256).truncated(16);
    let mut tag = [0u8; 16];
    assert_eq!(core.mac_compute(key, &truncated, b"m", &mut tag), Ok(16));
    core.mac_verify(key, &truncated, b"m", &tag).expect("verify");
    // A truncated tag presented at the wrong length is not authentic.
    assert_eq!(
        core.mac_verify(key, &truncated, b"m", &tag[..8]),
        Err(Error::InvalidSignature)
    );

    let mut op = MacOperation::new();
    let too_short = MacAlg::hmac(HashAlg::Sha256).truncated(2);
    assert_eq!(
        core.mac_sign_setup(&mut op, key, &too_short),
        Err(Error::NotSupported)
    );
    let too_long = MacAlg::hmac(HashAlg::Sha256).truncated(40);
    assert_eq!(
        core.mac_sign_setup(&mut op, key, &too_long),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn mac_multipart_and_state_machine() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Hmac, &[7u8; 20], hmac_policy());
    let alg = MacAlg::hmac(HashAlg::Sha256);

    let mut op = MacOperation::new();
    assert_eq!(core.mac_update(&mut op, b"x"), Err(Error::BadState));

    core.mac_sign_setup(&mut op, key, &alg).expect("setup");
    core.mac_update(&mut op, b"he").expect("update");
    core.mac_update(&mut op, b"llo").expect("update");
    let mut streamed = [0u8; 32];
    assert_eq!(core.mac_sign_finish(&mut op, &mut streamed), Ok(32));

    // Context is blank again after finish.
    assert_eq!(core.mac_update(&mut op, b"x"), Err(Error::BadState));

    let mut direct = [0u8; 32];
    core.mac_compute(key, &alg, b"hello", &mut direct).expect("compute");
    assert_eq!(streamed, direct);

    // A verify-side context refuses sign-side finish.
    core.mac_verify_setup(&mut op, key, &alg).expect("verify setup");
    let mut out = [0u8; 32];
    assert_eq!(core.mac_sign_finish(&mut op, &mut out), Err(Error::BadState));
    assert!(out.iter().all(|&b| b == OUTPUT_SENTINEL));
    // The failed finish reset the context.
    core.mac_sign_setup(&mut op, key, &alg).expect("setup again");
    core.mac_abort(&mut op).expect("abort");
}

#[test]
fn mac_usage_is_enforced() {
    let mut core = make_core();
    let policy = Policy {
        usage: Usage::VERIFY_MESSAGE,
        alg: Some(Algorithm::Mac(MacAlg::hmac(HashAlg::Sha256).at_least(4))),
        alg2: None,
    };
    let key = import_key(&mut core, KeyType::Hmac, &[1u8; 16], policy);
    let alg = MacAlg::hmac(HashAlg::Sha256);
    let mut tag = [0u8; 32];
    assert_eq!(
        core.mac_compute(key, &alg, b"m", &mut tag),
        Err(Error::NotPermitted)
    );
}

// Cipher

fn cbc_policy() -> Policy {
    Policy {
        usage: Usage::ENCRYPT | Usage::DECRYPT,
        alg: Some(Algorithm::Cipher(CipherAlg::CbcNoPadding)),
        alg2: None,
    }
}

#[test]
fn cbc_round_trip_with_distinct_ivs() {
    let mut core = make_core();
    let attributes = KeyAttributes {
        key_type: KeyType::Aes,
        bits: 256,
        policy: cbc_policy(),
        ..Default::default()
    };
    let key = core.generate_key(&attributes).expect("generate");

    let plaintext = [0u8; 32];
    let mut first = [0u8; 48];
    let written = core
        .cipher_encrypt(key, CipherAlg::CbcNoPadding, &plaintext, &mut first)
        .expect("encrypt");
    assert_eq!(written, 48);

    let mut recovered = [0u8; 32];
    let recovered_len = core
        .cipher_decrypt(key, CipherAlg::CbcNoPadding, &first, &mut recovered)
        .expect("decrypt");
    assert_eq!(recovered_len, 32);
    assert_eq!(recovered, plaintext);

    let mut second = [0u8; 48];
    core.cipher_encrypt(key, CipherAlg::CbcNoPadding, &plaintext, &mut second)
        .expect("encrypt again");
    // Two successive encryptions must not reuse the 16-byte IV.
    assert_ne!(first[..16], second[..16]);
}

#[test]
fn cbc_requires_block_aligned_input() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[2u8; 32], cbc_policy());
    let mut out = [0u8; 64];
    assert_eq!(
        core.cipher_encrypt(key, CipherAlg::CbcNoPadding, &[0u8; 30], &mut out),
        Err(Error::InvalidArgument)
    );
    assert!(out.iter().all(|&b| b == OUTPUT_SENTINEL));
}

#[test]
fn ctr_multipart_streams_across_chunks() {
    let mut core = make_core();
    let policy = Policy {
        usage: Usage::ENCRYPT | Usage::DECRYPT,
        alg: Some(Algorithm::Cipher(CipherAlg::Ctr)),
        alg2: None,
    };
    let key = import_key(&mut core, KeyType::Aes, &[9u8; 16], policy);
    let message = b"counter mode streams at byte granularity";

    let mut op = CipherOperation::new();
    core.cipher_encrypt_setup(&mut op, key, CipherAlg::Ctr)
        .expect("setup");
    let mut iv = [0u8; 16];
    assert_eq!(core.cipher_generate_iv(&mut op, &mut iv), Ok(16));
    let mut ciphertext = vec![0u8; message.len()];
    let mut written = core
        .cipher_update(&mut op, &message[..7], &mut ciphertext)
        .expect("update");
    written += {
        let rest = &mut ciphertext[written..];
        core.cipher_update(&mut op, &message[7..], rest).expect("update")
    };
    let mut tail = [0u8; 16];
    written += core.cipher_finish(&mut op, &mut tail).expect("finish");
    assert_eq!(written, message.len());

    let mut framed = iv.to_vec();
    framed.extend_from_slice(&ciphertext);
    let mut recovered = vec![0u8; message.len()];
    let recovered_len = core
        .cipher_decrypt(key, CipherAlg::Ctr, &framed, &mut recovered)
        .expect("decrypt");
    assert_eq!(&recovered[..recovered_len], message);
}

#[test]
fn cipher_iv_discipline() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[3u8; 16], cbc_policy());

    let mut op = CipherOperation::new();
    core.cipher_encrypt_setup(&mut op, key, CipherAlg::CbcNoPadding)
        .expect("setup");
    let mut out = [0u8; 16];
    // Streaming before the IV is set is a state error, which aborts.
    assert_eq!(
        core.cipher_update(&mut op, &[0u8; 16], &mut out),
        Err(Error::BadState)
    );
    assert!(!op.is_active());

    core.cipher_encrypt_setup(&mut op, key, CipherAlg::CbcNoPadding)
        .expect("setup again");
    core.cipher_set_iv(&mut op, &[1u8; 16]).expect("set iv");
    assert_eq!(core.cipher_set_iv(&mut op, &[1u8; 16]), Err(Error::BadState));
}

#[test]
fn destroy_waits_for_in_progress_operation() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[4u8; 16], cbc_policy());

    let mut op = CipherOperation::new();
    core.cipher_encrypt_setup(&mut op, key, CipherAlg::CbcNoPadding)
        .expect("setup");
    assert_eq!(core.destroy_key(key), Err(Error::AlreadyInUse));

    core.cipher_abort(&mut op).expect("abort");
    core.destroy_key(key).expect("destroy after abort");
}

// AEAD

fn gcm_policy() -> Policy {
    Policy {
        usage: Usage::ENCRYPT | Usage::DECRYPT,
        alg: Some(Algorithm::Aead(AeadAlg::with_at_least_tag(AeadBase::Gcm, 4))),
        alg2: None,
    }
}

#[test]
fn aead_gcm_round_trip_and_tag_mutation() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[6u8; 32], gcm_policy());
    let alg = AeadAlg::new(AeadBase::Gcm);
    let nonce = [1u8; 12];

    let mut sealed = vec![0u8; 21 + 16];
    let sealed_len = core
        .aead_encrypt(key, &alg, &nonce, b"aad", b"attack at dawn tomoro", &mut sealed)
        .expect("encrypt");
    assert_eq!(sealed_len, 21 + 16);

    let mut opened = vec![0u8; 21];
    let opened_len = core
        .aead_decrypt(key, &alg, &nonce, b"aad", &sealed, &mut opened)
        .expect("decrypt");
    assert_eq!(&opened[..opened_len], b"attack at dawn tomoro");

    let mut tampered = sealed.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 1;
    assert_eq!(
        core.aead_decrypt(key, &alg, &nonce, b"aad", &tampered, &mut opened),
        Err(Error::InvalidSignature)
    );
    assert!(opened.iter().all(|&b| b == OUTPUT_SENTINEL));

    // Wrong additional data also fails as a plain verification error.
    assert_eq!(
        core.aead_decrypt(key, &alg, &nonce, b"axd", &sealed, &mut opened),
        Err(Error::InvalidSignature)
    );
}

#[test]
fn aead_truncated_tag_round_trip() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[6u8; 16], gcm_policy());
    let alg = AeadAlg::with_tag(AeadBase::Gcm, 8);
    let nonce = [2u8; 12];

    let mut sealed = vec![0u8; 5 + 8];
    assert_eq!(
        core.aead_encrypt(key, &alg, &nonce, b"", b"hello", &mut sealed),
        Ok(13)
    );
    let mut opened = [0u8; 5];
    assert_eq!(
        core.aead_decrypt(key, &alg, &nonce, b"", &sealed, &mut opened),
        Ok(5)
    );
    assert_eq!(&opened, b"hello");

    let mut tampered = sealed.clone();
    tampered[9] ^= 4;
    assert_eq!(
        core.aead_decrypt(key, &alg, &nonce, b"", &tampered, &mut opened),
        Err(Error::InvalidSignature)
    );
}

#[test]
fn aead_requested_wildcard_tag_rejected() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[6u8; 16], gcm_policy());
    let mut op = AeadOperation::new();
    let wildcard = AeadAlg::with_at_least_tag(AeadBase::Gcm, 8);
    assert_eq!(
        core.aead_encrypt_setup(&mut op, key, &wildcard),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn aead_multipart_with_declared_lengths() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[5u8; 32], gcm_policy());
    let alg = AeadAlg::new(AeadBase::Gcm);

    let mut op = AeadOperation::new();
    core.aead_encrypt_setup(&mut op, key, &alg).expect("setup");
    core.aead_set_lengths(&mut op, 4, 12).expect("lengths");
    let mut nonce = [0u8; 12];
    assert_eq!(core.aead_generate_nonce(&mut op, &mut nonce), Ok(12));
    core.aead_update_ad(&mut op, b"head").expect("ad");
    let mut ciphertext = [0u8; 12];
    let written = core
        .aead_update(&mut op, b"twelve bytes", &mut ciphertext)
        .expect("update");
    let mut flushed = vec![0u8; 12 - written];
    let mut tag = [0u8; 16];
    let (ct_len, tag_len) = core
        .aead_finish(&mut op, &mut flushed, &mut tag)
        .expect("finish");
    assert_eq!(written + ct_len, 12);
    assert_eq!(tag_len, 16);

    let mut sealed = Vec::new();
    sealed.extend_from_slice(&ciphertext[..written]);
    sealed.extend_from_slice(&flushed[..ct_len]);
    sealed.extend_from_slice(&tag[..tag_len]);
    let mut opened = [0u8; 12];
    let opened_len = core
        .aead_decrypt(key, &alg, &nonce, b"head", &sealed, &mut opened)
        .expect("decrypt");
    assert_eq!(&opened[..opened_len], b"twelve bytes");
}

#[test]
fn aead_declared_lengths_are_enforced() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[5u8; 32], gcm_policy());
    let alg = AeadAlg::new(AeadBase::Gcm);

    let mut op = AeadOperation::new();
    core.aead_encrypt_setup(&mut op, key, &alg).expect("setup");
    core.aead_set_lengths(&mut op, 2, 4).expect("lengths");
    let mut nonce = [0u8; 12];
    core.aead_generate_nonce(&mut op, &mut nonce).expect("nonce");
    // More additional data than declared.
    assert_eq!(core.aead_update_ad(&mut op, b"abc"), Err(Error::InvalidArgument));
    assert!(!op.is_active());
}

#[test]
fn aead_nonce_discipline() {
    let mut core = make_core();
    let key = import_key(&mut core, KeyType::Aes, &[5u8; 16], gcm_policy());
    let alg = AeadAlg::new(AeadBase::Gcm);

    let mut op = AeadOperation::new();
    core.aead_encrypt_setup(&mut op, key, &alg).expect("setup");
    let mut out = [0u8; 16];
    assert_eq!(
        core.aead_update(&mut op, b"data", &mut out),
        Err(Error::BadState)
    );

    core.aead_decrypt_setup(&mut op, key, &alg).expect("setup");
    let mut nonce = [0u8; 12];
    // Only the encrypt side may invent a nonce.
    assert_eq!(
        core.aead_generate_nonce(&mut op, &mut nonce),
        Err(Error::BadState)
    );
}

#[test]
fn chacha20poly1305_round_trip() {
    let mut core = make_core();
    let policy = Policy {
        usage: Usage::ENCRYPT | Usage::DECRYPT,
        alg: Some(Algorithm::Aead(AeadAlg::new(AeadBase::ChaCha20Poly1305))),
        alg2: None,
    };
    let key = import_key(&mut core, KeyType::ChaCha20, &[8u8; 32], policy);
    let alg = AeadAlg::new(AeadBase::ChaCha20Poly1305);
    let nonce = [9u8; 12];

    let mut sealed = vec![0u8; 3 + 16];
    core.aead_encrypt(key, &alg, &nonce, b"", b"abc", &mut sealed)
        .expect("encrypt");
    let mut opened = [0u8; 3];
    assert_eq!(
        core.aead_decrypt(key, &alg, &nonce, b"", &sealed, &mut opened),
        Ok(3)
    );
    assert_eq!(&opened, b"abc");
}

// Asymmetric signatures

#[test]
fn ecdsa_sign_verify_message_and_hash() {
    let mut core = make_core();
    let attributes = KeyAttributes {
        key_type: KeyType::EccKeyPair(EccFamily::SecpR1),
        bits: 256,
        policy: Policy {
            usage: Usage::SIGN_MESSAGE | Usage::VERIFY_MESSAGE | Usage::SIGN_HASH
                | Usage::VERIFY_HASH,
            alg: Some(Algorithm::Sign(SignAlg::Ecdsa(HashSel::Any))),
            alg2: None,
        },
        ..Default::default()
    };
    let key = core.generate_key(&attributes).expect("generate");
    let alg = SignAlg::Ecdsa(HashSel::Specific(HashAlg::Sha256));

    let mut signature = [0u8; 64];
    let written = core
        .sign_message(key, &alg, b"signed payload", &mut signature)
        .expect("sign");
    assert_eq!(written, 64);
    core.verify_message(key, &alg, b"signed payload", &signature)
        .expect("verify");

    let mut mutated = signature;
    mutated[10] ^= 2;
    assert_eq!(
        core.verify_message(key, &alg, b"signed payload", &mutated),
        Err(Error::InvalidSignature)
    );

    let mut digest = [0u8; 32];
    core.hash_compute(HashAlg::Sha256, b"signed payload", &mut digest)
        .expect("digest");
    core.verify_hash(key, &alg, &digest, &signature)
        .expect("verify hash");
    let mut from_hash = [0u8; 64];
    core.sign_hash(key, &alg, &digest, &mut from_hash)
        .expect("sign hash");
    core.verify_message(key, &alg, b"signed payload", &from_hash)
        .expect("cross verify");
}

#[test]
fn ecdsa_verify_with_exported_public_key() {
    let mut core = make_core();
    let attributes = KeyAttributes {
        key_type: KeyType::EccKeyPair(EccFamily::SecpR1),
        bits: 256,
        policy: Policy {
            usage: Usage::SIGN_MESSAGE,
            alg: Some(Algorithm::Sign(SignAlg::Ecdsa(HashSel::Specific(
                HashAlg::Sha256,
            )))),
            alg2: None,
        },
        ..Default::default()
    };
    let pair = core.generate_key(&attributes).expect("generate");
    let mut point = [0u8; 65];
    assert_eq!(core.export_public_key(pair, &mut point), Ok(65));

    let public_attributes = KeyAttributes {
        key_type: KeyType::EccPublicKey(EccFamily::SecpR1),
        policy: Policy {
            usage: Usage::VERIFY_MESSAGE,
            alg: Some(Algorithm::Sign(SignAlg::Ecdsa(HashSel::Specific(
                HashAlg::Sha256,
            )))),
            alg2: None,
        },
        ..Default::default()
    };
    let public = core.import_key(&public_attributes, &point).expect("import");

    let alg = SignAlg::Ecdsa(HashSel::Specific(HashAlg::Sha256));
    let mut signature = [0u8; 64];
    core.sign_message(pair, &alg, b"msg", &mut signature)
        .expect("sign");
    core.verify_message(public, &alg, b"msg", &signature)
        .expect("verify with public");
    // The public key's policy never carried the sign usage.
    assert_eq!(
        core.sign_message(public, &alg, b"msg", &mut signature),
        Err(Error::NotPermitted)
    );
}

#[test]
fn ed25519_signs_messages_only() {
    let mut core = make_core();
    let attributes = KeyAttributes {
        key_type: KeyType::EccKeyPair(EccFamily::TwistedEdwards),
        bits: 255,
        policy: Policy {
            usage: Usage::SIGN_MESSAGE | Usage::VERIFY_MESSAGE | Usage::SIGN_HASH,
            alg: Some(Algorithm::Sign(SignAlg::Ed25519)),
            alg2: None,
        },
        ..Default::default()
    };
    let key = core.generate_key(&attributes).expect("generate");

    let mut signature = [0u8; 64];
    core.sign_message(key, &SignAlg::Ed25519, b"m", &mut signature)
        .expect("sign");
    core.verify_message(key, &SignAlg::Ed25519, b"m", &signature)
        .expect("verify");
    assert_eq!(
        core.sign_hash(key, &SignAlg::Ed25519, &[0u8; 32], &mut signature),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn sign_rejects_wildcard_algorithm() {
    let mut core = make_core();
    let attributes = KeyAttributes {
        key_type: KeyType::EccKeyPair(EccFamily::SecpR1),
        bits: 256,
        policy: Policy {
            usage: Usage::SIGN_MESSAGE,
            alg: Some(Algorithm::Sign(SignAlg::Ecdsa(HashSel::Any))),
            alg2: None,
        },
        ..Default::default()
    };
    let key = core.generate_key(&attributes).expect("generate");
    let mut signature = [0u8; 64];
    assert_eq!(
        core.sign_message(key, &SignAlg::Ecdsa(HashSel::Any), b"m", &mut signature),
        Err(Error::InvalidArgument)
    );
}
