use arx_crypto_core::adapters::{EntropyAdapter, StorageAdapter};
use arx_crypto_core::algorithm::{
    Algorithm, AgreementAlg, CipherAlg, DerivationStep, HashAlg, HashSel, KdfAlg, RawAgreement,
    SignAlg,
};
use arx_crypto_core::core::{CoreConfig, CryptoCore};
use arx_crypto_core::derivation::DerivationOperation;
use arx_crypto_core::error::{CoreResult, Error};
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

fn derive_key(core: &mut TestCore, kdf: KdfAlg, material: &[u8]) -> KeyId {
    let attributes = KeyAttributes {
        key_type: KeyType::Derive,
        policy: Policy {
            usage: Usage::DERIVE,
            alg: Some(Algorithm::KeyDerivation(kdf)),
            alg2: None,
        },
        ..Default::default()
    };
    core.import_key(&attributes, material).expect("import secret")
}

#[test]
fn extract_only_capacity_runs_dry_then_reports_insufficient_data() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::HkdfExtract(HashAlg::Sha256));
    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    assert_eq!(core.derivation_get_capacity(&op), Ok(32));

    core.derivation_input_bytes(&mut op, DerivationStep::Salt, b"salt")
        .expect("salt");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
        .expect("secret");

    let mut chunk = [0u8; 16];
    assert_eq!(core.derivation_output_bytes(&mut op, &mut chunk), Ok(16));
    assert_eq!(core.derivation_output_bytes(&mut op, &mut chunk), Ok(16));
    assert_eq!(core.derivation_get_capacity(&op), Ok(0));

    // Exhaustion is sticky and distinct from a never-set-up context.
    let mut one = [0u8; 1];
    assert_eq!(
        core.derivation_output_bytes(&mut op, &mut one),
        Err(Error::InsufficientData)
    );
    assert_eq!(one[0], OUTPUT_SENTINEL);
    assert_eq!(
        core.derivation_output_bytes(&mut op, &mut one),
        Err(Error::InsufficientData)
    );

    core.derivation_abort(&mut op).expect("abort");
    let mut blank_out = [0u8; 1];
    assert_eq!(
        core.derivation_output_bytes(&mut op, &mut blank_out),
        Err(Error::BadState)
    );
    core.derivation_setup(&mut op, alg).expect("setup after abort");
}

#[test]
fn hkdf_chunked_output_matches_one_shot() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::Hkdf(HashAlg::Sha256));

    let mut chunked = [0u8; 42];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, alg).expect("setup");
        core.derivation_input_bytes(&mut op, DerivationStep::Salt, b"pepper")
            .expect("salt");
        core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"input keying material")
            .expect("secret");
        core.derivation_input_bytes(&mut op, DerivationStep::Info, b"context")
            .expect("info");
        let (head, tail) = chunked.split_at_mut(10);
        core.derivation_output_bytes(&mut op, head).expect("head");
        core.derivation_output_bytes(&mut op, tail).expect("tail");
    }

    let mut whole = [0u8; 42];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, alg).expect("setup");
        core.derivation_input_bytes(&mut op, DerivationStep::Salt, b"pepper")
            .expect("salt");
        core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"input keying material")
            .expect("secret");
        core.derivation_input_bytes(&mut op, DerivationStep::Info, b"context")
            .expect("info");
        core.derivation_output_bytes(&mut op, &mut whole).expect("whole");
    }
    assert_eq!(chunked, whole);
}

#[test]
fn hkdf_step_ordering() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::Hkdf(HashAlg::Sha256));
    let mut op = DerivationOperation::new();

    // Salt after the secret is out of order, and the failed input abandons
    // the context.
    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
        .expect("secret");
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::Salt, b"late"),
        Err(Error::BadState)
    );
    assert!(!op.is_active());

    // Duplicate secret.
    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
        .expect("secret");
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"again"),
        Err(Error::BadState)
    );

    // A step the family never takes.
    core.derivation_setup(&mut op, alg).expect("setup");
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::Seed, b"seed"),
        Err(Error::InvalidArgument)
    );

    // Output before the terminal condition.
    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
        .expect("secret");
    let mut out = [0u8; 8];
    assert_eq!(
        core.derivation_output_bytes(&mut op, &mut out),
        Err(Error::BadState)
    );

    // Input after output has begun.
    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
        .expect("secret");
    core.derivation_input_bytes(&mut op, DerivationStep::Info, b"info")
        .expect("info");
    core.derivation_output_bytes(&mut op, &mut out).expect("output");
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::Info, b"more"),
        Err(Error::BadState)
    );
}

#[test]
fn hkdf_extract_requires_salt_before_secret() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::HkdfExtract(HashAlg::Sha256));
    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm"),
        Err(Error::BadState)
    );
}

#[test]
fn hkdf_expand_requires_secret_before_info() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::HkdfExpand(HashAlg::Sha256));
    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::Info, b"info"),
        Err(Error::BadState)
    );
}

#[test]
fn tls12_prf_sequence() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::Tls12Prf(HashAlg::Sha256));
    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Seed, b"client+server random")
        .expect("seed");
    // The two-secret step belongs to the PSK variant only.
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::OtherSecret, b"x"),
        Err(Error::InvalidArgument)
    );

    core.derivation_setup(&mut op, alg).expect("setup");
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"premaster"),
        Err(Error::BadState)
    );

    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Seed, b"randoms")
        .expect("seed");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"premaster")
        .expect("secret");
    core.derivation_input_bytes(&mut op, DerivationStep::Label, b"master secret")
        .expect("label");
    let mut out = [0u8; 48];
    core.derivation_output_bytes(&mut op, &mut out).expect("output");
    assert_ne!(out, [0u8; 48]);
}

#[test]
fn tls12_psk_to_ms_accepts_other_secret() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::Tls12PskToMs(HashAlg::Sha256));

    let mut with_other = [0u8; 32];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, alg).expect("setup");
        core.derivation_input_bytes(&mut op, DerivationStep::Seed, b"randoms")
            .expect("seed");
        core.derivation_input_bytes(&mut op, DerivationStep::OtherSecret, b"ecdhe part")
            .expect("other secret");
        core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"psk")
            .expect("psk");
        core.derivation_input_bytes(&mut op, DerivationStep::Label, b"master secret")
            .expect("label");
        core.derivation_output_bytes(&mut op, &mut with_other)
            .expect("output");
    }

    let mut without_other = [0u8; 32];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, alg).expect("setup");
        core.derivation_input_bytes(&mut op, DerivationStep::Seed, b"randoms")
            .expect("seed");
        core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"psk")
            .expect("psk");
        core.derivation_input_bytes(&mut op, DerivationStep::Label, b"master secret")
            .expect("label");
        core.derivation_output_bytes(&mut op, &mut without_other)
            .expect("output");
    }
    assert_ne!(with_other, without_other);
}

#[test]
fn pbkdf2_sequence_and_streaming() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::Pbkdf2Hmac(HashAlg::Sha256));

    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    // Salt before cost is out of order.
    assert_eq!(
        core.derivation_input_bytes(&mut op, DerivationStep::Salt, b"s"),
        Err(Error::BadState)
    );

    core.derivation_setup(&mut op, alg).expect("setup");
    assert_eq!(
        core.derivation_input_integer(&mut op, DerivationStep::Cost, 0),
        Err(Error::InvalidArgument)
    );

    let mut chunked = [0u8; 40];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, alg).expect("setup");
        core.derivation_input_integer(&mut op, DerivationStep::Cost, 2)
            .expect("cost");
        core.derivation_input_bytes(&mut op, DerivationStep::Salt, b"sea")
            .expect("salt");
        // Salt chunks concatenate.
        core.derivation_input_bytes(&mut op, DerivationStep::Salt, b"salt")
            .expect("salt chunk");
        core.derivation_input_bytes(&mut op, DerivationStep::Password, b"correct horse")
            .expect("password");
        let (head, tail) = chunked.split_at_mut(7);
        core.derivation_output_bytes(&mut op, head).expect("head");
        core.derivation_output_bytes(&mut op, tail).expect("tail");
    }

    let mut whole = [0u8; 40];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, alg).expect("setup");
        core.derivation_input_integer(&mut op, DerivationStep::Cost, 2)
            .expect("cost");
        core.derivation_input_bytes(&mut op, DerivationStep::Salt, b"seasalt")
            .expect("salt");
        core.derivation_input_bytes(&mut op, DerivationStep::Password, b"correct horse")
            .expect("password");
        core.derivation_output_bytes(&mut op, &mut whole).expect("whole");
    }
    assert_eq!(chunked, whole);
}

#[test]
fn ec_jpake_premaster_is_hash_of_x_coordinate() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::EcJpakeToPms);
    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    assert_eq!(core.derivation_get_capacity(&op), Ok(32));

    let mut point = [0u8; 65];
    point[0] = 0x04;
    for (i, byte) in point[1..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, &point)
        .expect("secret");
    let mut pms = [0u8; 32];
    core.derivation_output_bytes(&mut op, &mut pms).expect("output");

    core.hash_compare(HashAlg::Sha256, &point[1..33], &pms)
        .expect("premaster is sha-256 of x");
}

#[test]
fn derive_key_requires_key_fed_secret() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::Hkdf(HashAlg::Sha256));
    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"plain bytes")
        .expect("secret");
    core.derivation_input_bytes(&mut op, DerivationStep::Info, b"info")
        .expect("info");
    let attributes = KeyAttributes {
        key_type: KeyType::Aes,
        bits: 128,
        policy: Policy {
            usage: Usage::EXPORT,
            alg: None,
            alg2: None,
        },
        ..Default::default()
    };
    assert_eq!(
        core.derivation_output_key(&attributes, &mut op),
        Err(Error::NotPermitted)
    );
}

#[test]
fn derive_aes_key_from_secret_key() {
    let mut core = make_core();
    let kdf = KdfAlg::Hkdf(HashAlg::Sha256);
    let secret = derive_key(&mut core, kdf, b"master secret material");

    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, Algorithm::KeyDerivation(kdf))
        .expect("setup");
    core.derivation_input_key(&mut op, DerivationStep::Secret, secret)
        .expect("secret key");
    core.derivation_input_bytes(&mut op, DerivationStep::Info, b"aes key")
        .expect("info");
    let attributes = KeyAttributes {
        key_type: KeyType::Aes,
        bits: 128,
        policy: Policy {
            usage: Usage::EXPORT,
            alg: None,
            alg2: None,
        },
        ..Default::default()
    };
    let derived = core
        .derivation_output_key(&attributes, &mut op)
        .expect("output key");

    // The derived key equals the raw stream from identical inputs.
    let mut twin = DerivationOperation::new();
    core.derivation_setup(&mut twin, Algorithm::KeyDerivation(kdf))
        .expect("setup twin");
    core.derivation_input_key(&mut twin, DerivationStep::Secret, secret)
        .expect("secret twin");
    core.derivation_input_bytes(&mut twin, DerivationStep::Info, b"aes key")
        .expect("info twin");
    let mut expected = [0u8; 16];
    core.derivation_output_bytes(&mut twin, &mut expected)
        .expect("twin output");

    let mut exported = [0u8; 16];
    assert_eq!(core.export_key(derived, &mut exported), Ok(16));
    assert_eq!(exported, expected);
}

#[test]
fn derive_weierstrass_key_pair_signs() {
    let mut core = make_core();
    let kdf = KdfAlg::Hkdf(HashAlg::Sha256);
    let secret = derive_key(&mut core, kdf, b"scalar seed material");

    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, Algorithm::KeyDerivation(kdf))
        .expect("setup");
    core.derivation_input_key(&mut op, DerivationStep::Secret, secret)
        .expect("secret");
    core.derivation_input_bytes(&mut op, DerivationStep::Info, b"signing key")
        .expect("info");
    let attributes = KeyAttributes {
        key_type: KeyType::EccKeyPair(EccFamily::SecpR1),
        bits: 256,
        policy: Policy {
            usage: Usage::SIGN_MESSAGE | Usage::VERIFY_MESSAGE,
            alg: Some(Algorithm::Sign(SignAlg::Ecdsa(HashSel::Specific(
                HashAlg::Sha256,
            )))),
            alg2: None,
        },
        ..Default::default()
    };
    let pair = core
        .derivation_output_key(&attributes, &mut op)
        .expect("derive pair");

    let alg = SignAlg::Ecdsa(HashSel::Specific(HashAlg::Sha256));
    let mut signature = [0u8; 64];
    core.sign_message(pair, &alg, b"derived", &mut signature)
        .expect("sign");
    core.verify_message(pair, &alg, b"derived", &signature)
        .expect("verify");
}

#[test]
fn derivation_input_key_enforces_usage_and_type() {
    let mut core = make_core();
    let kdf = KdfAlg::Hkdf(HashAlg::Sha256);

    let no_derive = KeyAttributes {
        key_type: KeyType::Derive,
        policy: Policy {
            usage: Usage::EXPORT,
            alg: Some(Algorithm::KeyDerivation(kdf)),
            alg2: None,
        },
        ..Default::default()
    };
    let locked = core.import_key(&no_derive, b"secret..").expect("import");
    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, Algorithm::KeyDerivation(kdf))
        .expect("setup");
    assert_eq!(
        core.derivation_input_key(&mut op, DerivationStep::Secret, locked),
        Err(Error::NotPermitted)
    );

    // A raw-data key is not acceptable as a secret input.
    let raw = KeyAttributes {
        key_type: KeyType::RawData,
        policy: Policy {
            usage: Usage::DERIVE,
            alg: Some(Algorithm::KeyDerivation(kdf)),
            alg2: None,
        },
        ..Default::default()
    };
    let raw_key = core.import_key(&raw, b"not a secret").expect("import raw");
    core.derivation_setup(&mut op, Algorithm::KeyDerivation(kdf))
        .expect("setup");
    assert_eq!(
        core.derivation_input_key(&mut op, DerivationStep::Secret, raw_key),
        Err(Error::InvalidArgument)
    );

    // But it serves fine for the non-secret steps.
    core.derivation_setup(&mut op, Algorithm::KeyDerivation(kdf))
        .expect("setup");
    core.derivation_input_key(&mut op, DerivationStep::Salt, raw_key)
        .expect("salt from raw key");
}

#[test]
fn set_capacity_only_lowers() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::Hkdf(HashAlg::Sha256));
    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_set_capacity(&mut op, 8).expect("lower");
    assert_eq!(core.derivation_get_capacity(&op), Ok(8));
    assert_eq!(
        core.derivation_set_capacity(&mut op, 9),
        Err(Error::InvalidArgument)
    );

    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
        .expect("secret");
    core.derivation_input_bytes(&mut op, DerivationStep::Info, b"info")
        .expect("info");
    let mut out = [0u8; 8];
    core.derivation_output_bytes(&mut op, &mut out).expect("output");
    let mut more = [0u8; 1];
    assert_eq!(
        core.derivation_output_bytes(&mut op, &mut more),
        Err(Error::InsufficientData)
    );
}

#[test]
fn verify_bytes_compares_without_exposing() {
    let mut core = make_core();
    let alg = Algorithm::KeyDerivation(KdfAlg::Hkdf(HashAlg::Sha256));

    let mut expected = [0u8; 24];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, alg).expect("setup");
        core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
            .expect("secret");
        core.derivation_input_bytes(&mut op, DerivationStep::Info, b"info")
            .expect("info");
        core.derivation_output_bytes(&mut op, &mut expected)
            .expect("output");
    }

    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
        .expect("secret");
    core.derivation_input_bytes(&mut op, DerivationStep::Info, b"info")
        .expect("info");
    core.derivation_verify_bytes(&mut op, &expected)
        .expect("verify");

    core.derivation_setup(&mut op, alg).expect("setup");
    core.derivation_input_bytes(&mut op, DerivationStep::Secret, b"ikm")
        .expect("secret");
    core.derivation_input_bytes(&mut op, DerivationStep::Info, b"info")
        .expect("info");
    let mut wrong = expected;
    wrong[0] ^= 1;
    assert_eq!(
        core.derivation_verify_bytes(&mut op, &wrong),
        Err(Error::InvalidSignature)
    );
}

// Key agreement

fn x25519_pair(core: &mut TestCore) -> (KeyId, [u8; 32]) {
    let attributes = KeyAttributes {
        key_type: KeyType::EccKeyPair(EccFamily::Montgomery),
        bits: 255,
        policy: Policy {
            usage: Usage::DERIVE,
            // The raw policy also covers the combined form.
            alg: Some(Algorithm::KeyAgreement(AgreementAlg::raw(RawAgreement::X25519))),
            alg2: None,
        },
        ..Default::default()
    };
    let id = core.generate_key(&attributes).expect("generate pair");
    let mut public = [0u8; 32];
    core.export_public_key(id, &mut public).expect("public");
    (id, public)
}

#[test]
fn x25519_agreement_feeds_derivation_symmetrically() {
    let mut core = make_core();
    let kdf = KdfAlg::Hkdf(HashAlg::Sha256);
    let combined = Algorithm::KeyAgreement(AgreementAlg::with_kdf(RawAgreement::X25519, kdf));
    let (a, a_public) = x25519_pair(&mut core);
    let (b, b_public) = x25519_pair(&mut core);

    let mut from_a = [0u8; 32];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, combined).expect("setup");
        core.key_agreement(&mut op, DerivationStep::Secret, a, &b_public)
            .expect("agree");
        core.derivation_input_bytes(&mut op, DerivationStep::Info, b"session")
            .expect("info");
        core.derivation_output_bytes(&mut op, &mut from_a).expect("output");
    }

    let mut from_b = [0u8; 32];
    {
        let mut op = DerivationOperation::new();
        core.derivation_setup(&mut op, combined).expect("setup");
        core.key_agreement(&mut op, DerivationStep::Secret, b, &a_public)
            .expect("agree");
        core.derivation_input_bytes(&mut op, DerivationStep::Info, b"session")
            .expect("info");
        core.derivation_output_bytes(&mut op, &mut from_b).expect("output");
    }
    assert_eq!(from_a, from_b);
}

#[test]
fn agreement_can_output_session_key() {
    let mut core = make_core();
    let kdf = KdfAlg::Hkdf(HashAlg::Sha256);
    let combined = Algorithm::KeyAgreement(AgreementAlg::with_kdf(RawAgreement::X25519, kdf));
    let (a, _) = x25519_pair(&mut core);
    let (_, b_public) = x25519_pair(&mut core);

    let mut op = DerivationOperation::new();
    core.derivation_setup(&mut op, combined).expect("setup");
    core.key_agreement(&mut op, DerivationStep::Secret, a, &b_public)
        .expect("agree");
    core.derivation_input_bytes(&mut op, DerivationStep::Info, b"session key")
        .expect("info");
    let attributes = KeyAttributes {
        key_type: KeyType::Aes,
        bits: 256,
        policy: Policy {
            usage: Usage::ENCRYPT | Usage::DECRYPT,
            alg: Some(Algorithm::Cipher(CipherAlg::Ctr)),
            alg2: None,
        },
        ..Default::default()
    };
    let session = core
        .derivation_output_key(&attributes, &mut op)
        .expect("session key");
    let attributes = core.get_key_attributes(session).expect("attributes");
    assert_eq!(attributes.bits, 256);
}

#[test]
fn raw_agreement_matches_both_sides() {
    let mut core = make_core();
    let (a, a_public) = x25519_pair(&mut core);
    let (b, b_public) = x25519_pair(&mut core);
    let raw = AgreementAlg::raw(RawAgreement::X25519);

    let mut from_a = [0u8; 32];
    let mut from_b = [0u8; 32];
    assert_eq!(core.raw_key_agreement(&raw, a, &b_public, &mut from_a), Ok(32));
    assert_eq!(core.raw_key_agreement(&raw, b, &a_public, &mut from_b), Ok(32));
    assert_eq!(from_a, from_b);
}

#[test]
fn failed_raw_agreement_randomizes_output() {
    let mut core = make_core();
    let (a, _) = x25519_pair(&mut core);
    let raw = AgreementAlg::raw(RawAgreement::X25519);

    let mut out = [0u8; 32];
    // A malformed peer key fails, and the buffer is neither zeros nor the
    // sentinel but freshly drawn bytes.
    assert!(core.raw_key_agreement(&raw, a, &[0u8; 7], &mut out).is_err());
    assert_ne!(out, [0u8; 32]);
    assert!(out.iter().any(|&b| b != OUTPUT_SENTINEL));
}

#[test]
fn p256_agreement_matches_both_sides() {
    let mut core = make_core();
    let raw = AgreementAlg::raw(RawAgreement::EcdhP256);
    let attributes = KeyAttributes {
        key_type: KeyType::EccKeyPair(EccFamily::SecpR1),
        bits: 256,
        policy: Policy {
            usage: Usage::DERIVE,
            alg: Some(Algorithm::KeyAgreement(raw)),
            alg2: None,
        },
        ..Default::default()
    };
    let a = core.generate_key(&attributes).expect("a");
    let b = core.generate_key(&attributes).expect("b");
    let mut a_public = [0u8; 65];
    let mut b_public = [0u8; 65];
    core.export_public_key(a, &mut a_public).expect("a public");
    core.export_public_key(b, &mut b_public).expect("b public");

    let mut from_a = [0u8; 32];
    let mut from_b = [0u8; 32];
    assert_eq!(core.raw_key_agreement(&raw, a, &b_public, &mut from_a), Ok(32));
    assert_eq!(core.raw_key_agreement(&raw, b, &a_public, &mut from_b), Ok(32));
    assert_eq!(from_a, from_b);
}
