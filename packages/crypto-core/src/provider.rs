//! The provider boundary: the pluggable interface that performs the actual
//! cryptographic math. The core validates state, policy, and buffers; the
//! provider computes. Every method defaults to `NotSupported` so a provider
//! implements only the primitives its build carries.

use crate::algorithm::{
    AeadAlg, CipherAlg, DerivationStep, HashAlg, KdfAlg, MacAlg, RawAgreement, SignAlg,
};
use crate::error::{CoreResult, Error};
use crate::pake::{PakeRole, PakeStep, PakeSuite};
use crate::types::KeyAttributes;

pub trait CryptoProvider {
    /// In-flight state of one multi-part operation, one type per family.
    /// The core owns the state machine; these types own the math.
    type HashOp;
    type MacOp;
    type CipherOp;
    type AeadOp;
    type KdfOp;
    type PakeOp;

    // Structured key material. Unstructured types are handled by the core.

    /// Validate and canonicalize imported material; returns the stored form
    /// and the actual bit size.
    fn import_key(&self, attributes: &KeyAttributes, data: &[u8]) -> CoreResult<(Vec<u8>, usize)> {
        let _ = (attributes, data);
        Err(Error::NotSupported)
    }

    fn generate_key(&self, attributes: &KeyAttributes) -> CoreResult<Vec<u8>> {
        let _ = attributes;
        Err(Error::NotSupported)
    }

    fn export_public_key(
        &self,
        attributes: &KeyAttributes,
        material: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let _ = (attributes, material, out);
        Err(Error::NotSupported)
    }

    // Hash

    fn hash_setup(&self, alg: HashAlg) -> CoreResult<Self::HashOp> {
        let _ = alg;
        Err(Error::NotSupported)
    }

    fn hash_update(&self, op: &mut Self::HashOp, input: &[u8]) -> CoreResult<()> {
        let _ = (op, input);
        Err(Error::NotSupported)
    }

    fn hash_finish(&self, op: Self::HashOp, out: &mut [u8]) -> CoreResult<usize> {
        let _ = (op, out);
        Err(Error::NotSupported)
    }

    fn hash_clone_op(&self, op: &Self::HashOp) -> CoreResult<Self::HashOp> {
        let _ = op;
        Err(Error::NotSupported)
    }

    // MAC. The provider always produces the full-length tag; truncation is
    // the core's concern.

    fn mac_setup(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &MacAlg,
    ) -> CoreResult<Self::MacOp> {
        let _ = (attributes, key, alg);
        Err(Error::NotSupported)
    }

    fn mac_update(&self, op: &mut Self::MacOp, input: &[u8]) -> CoreResult<()> {
        let _ = (op, input);
        Err(Error::NotSupported)
    }

    fn mac_finish(&self, op: Self::MacOp, out: &mut [u8]) -> CoreResult<usize> {
        let _ = (op, out);
        Err(Error::NotSupported)
    }

    // Cipher

    fn cipher_setup(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: CipherAlg,
        encrypt: bool,
    ) -> CoreResult<Self::CipherOp> {
        let _ = (attributes, key, alg, encrypt);
        Err(Error::NotSupported)
    }

    fn cipher_set_iv(&self, op: &mut Self::CipherOp, iv: &[u8]) -> CoreResult<()> {
        let _ = (op, iv);
        Err(Error::NotSupported)
    }

    fn cipher_update(
        &self,
        op: &mut Self::CipherOp,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let _ = (op, input, out);
        Err(Error::NotSupported)
    }

    fn cipher_finish(&self, op: Self::CipherOp, out: &mut [u8]) -> CoreResult<usize> {
        let _ = (op, out);
        Err(Error::NotSupported)
    }

    // AEAD. The provider may buffer internally; `update` is allowed to
    // return fewer bytes than it consumed, with the remainder at finish.

    fn aead_setup(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &AeadAlg,
        encrypt: bool,
    ) -> CoreResult<Self::AeadOp> {
        let _ = (attributes, key, alg, encrypt);
        Err(Error::NotSupported)
    }

    fn aead_set_nonce(&self, op: &mut Self::AeadOp, nonce: &[u8]) -> CoreResult<()> {
        let _ = (op, nonce);
        Err(Error::NotSupported)
    }

    fn aead_update_ad(&self, op: &mut Self::AeadOp, input: &[u8]) -> CoreResult<()> {
        let _ = (op, input);
        Err(Error::NotSupported)
    }

    fn aead_update(
        &self,
        op: &mut Self::AeadOp,
        input: &[u8],
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let _ = (op, input, out);
        Err(Error::NotSupported)
    }

    /// Encrypt side: emit remaining ciphertext and the full-length tag.
    fn aead_finish(
        &self,
        op: Self::AeadOp,
        ciphertext: &mut [u8],
        tag: &mut [u8],
    ) -> CoreResult<(usize, usize)> {
        let _ = (op, ciphertext, tag);
        Err(Error::NotSupported)
    }

    /// Decrypt side: release plaintext only if the (possibly truncated) tag
    /// authenticates.
    fn aead_verify(&self, op: Self::AeadOp, plaintext: &mut [u8], tag: &[u8]) -> CoreResult<usize> {
        let _ = (op, plaintext, tag);
        Err(Error::NotSupported)
    }

    // Asymmetric signatures

    fn sign_message(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &SignAlg,
        message: &[u8],
        signature: &mut [u8],
    ) -> CoreResult<usize> {
        let _ = (attributes, key, alg, message, signature);
        Err(Error::NotSupported)
    }

    fn verify_message(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &SignAlg,
        message: &[u8],
        signature: &[u8],
    ) -> CoreResult<()> {
        let _ = (attributes, key, alg, message, signature);
        Err(Error::NotSupported)
    }

    fn sign_hash(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &SignAlg,
        hash: &[u8],
        signature: &mut [u8],
    ) -> CoreResult<usize> {
        let _ = (attributes, key, alg, hash, signature);
        Err(Error::NotSupported)
    }

    fn verify_hash(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: &SignAlg,
        hash: &[u8],
        signature: &[u8],
    ) -> CoreResult<()> {
        let _ = (attributes, key, alg, hash, signature);
        Err(Error::NotSupported)
    }

    // Key agreement

    fn key_agreement(
        &self,
        attributes: &KeyAttributes,
        key: &[u8],
        alg: RawAgreement,
        peer_key: &[u8],
        shared_secret: &mut [u8],
    ) -> CoreResult<usize> {
        let _ = (attributes, key, alg, peer_key, shared_secret);
        Err(Error::NotSupported)
    }

    // Key derivation. Step ordering is enforced by the core; the provider
    // stores inputs and streams output.

    fn derivation_setup(&self, alg: KdfAlg) -> CoreResult<Self::KdfOp> {
        let _ = alg;
        Err(Error::NotSupported)
    }

    fn derivation_input_bytes(
        &self,
        op: &mut Self::KdfOp,
        step: DerivationStep,
        data: &[u8],
    ) -> CoreResult<()> {
        let _ = (op, step, data);
        Err(Error::NotSupported)
    }

    fn derivation_input_integer(
        &self,
        op: &mut Self::KdfOp,
        step: DerivationStep,
        value: u64,
    ) -> CoreResult<()> {
        let _ = (op, step, value);
        Err(Error::NotSupported)
    }

    fn derivation_output_bytes(&self, op: &mut Self::KdfOp, out: &mut [u8]) -> CoreResult<()> {
        let _ = (op, out);
        Err(Error::NotSupported)
    }

    // PAKE. Message sequencing is enforced by the core.

    fn pake_setup(&self, suite: &PakeSuite) -> CoreResult<Self::PakeOp> {
        let _ = suite;
        Err(Error::NotSupported)
    }

    fn pake_set_password(
        &self,
        op: &mut Self::PakeOp,
        attributes: &KeyAttributes,
        material: &[u8],
    ) -> CoreResult<()> {
        let _ = (op, attributes, material);
        Err(Error::NotSupported)
    }

    fn pake_set_role(&self, op: &mut Self::PakeOp, role: PakeRole) -> CoreResult<()> {
        let _ = (op, role);
        Err(Error::NotSupported)
    }

    fn pake_set_user(&self, op: &mut Self::PakeOp, user_id: &[u8]) -> CoreResult<()> {
        let _ = (op, user_id);
        Err(Error::NotSupported)
    }

    fn pake_set_peer(&self, op: &mut Self::PakeOp, peer_id: &[u8]) -> CoreResult<()> {
        let _ = (op, peer_id);
        Err(Error::NotSupported)
    }

    fn pake_output(
        &self,
        op: &mut Self::PakeOp,
        step: PakeStep,
        out: &mut [u8],
    ) -> CoreResult<usize> {
        let _ = (op, step, out);
        Err(Error::NotSupported)
    }

    fn pake_input(&self, op: &mut Self::PakeOp, step: PakeStep, input: &[u8]) -> CoreResult<()> {
        let _ = (op, step, input);
        Err(Error::NotSupported)
    }

    /// Consume the finished exchange and emit the implicit shared secret.
    fn pake_get_secret(&self, op: Self::PakeOp, out: &mut [u8]) -> CoreResult<usize> {
        let _ = (op, out);
        Err(Error::NotSupported)
    }
}
