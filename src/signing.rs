//! OpenPGP signing/verification (spec §1: interface contract for the signing collaborator).

use crate::errors::*;
use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey, StandaloneSignature};
use pgp::crypto::hash::HashAlgorithm;
use pgp::packet::{Signature, SignatureConfig, SignatureType};
use pgp::types::PublicKeyTrait;
use std::io::Cursor;

/// Produces a detached OpenPGP signature over a byte buffer.
pub trait Signer {
    fn sign_detached(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Verifies a detached OpenPGP signature against a byte buffer.
pub trait Verifier {
    fn verify_detached(&self, data: &[u8], signature: &[u8]) -> Result<()>;
}

/// An OpenPGP signing key, loaded from an armored secret-key block.
pub struct OpenPgpSigner {
    key: SignedSecretKey,
    passphrase: String,
}

impl OpenPgpSigner {
    /// Loads an armored secret key. Fails if the key material is empty, unparseable, or
    /// the key is encrypted and no passphrase was supplied (spec §7 "signing" error kind).
    pub fn load(armored: &[u8], passphrase: Option<&str>) -> Result<Self> {
        if armored.is_empty() {
            return Err(Error::SigningKeyEmpty);
        }
        let (key, _headers) = SignedSecretKey::from_armor_single(Cursor::new(armored))
            .map_err(|e| Error::Pgp(e.to_string()))?;

        if key.primary_key.secret_params().is_encrypted() && passphrase.is_none() {
            return Err(Error::SigningKeyEncrypted);
        }

        Ok(OpenPgpSigner { key, passphrase: passphrase.unwrap_or_default().to_string() })
    }
}

impl Signer for OpenPgpSigner {
    fn sign_detached(&self, data: &[u8]) -> Result<Vec<u8>> {
        let config = SignatureConfig::v4(SignatureType::Binary, self.key.primary_key.algorithm(), HashAlgorithm::SHA2_256);
        let passphrase = self.passphrase.clone();
        let signature: Signature = config
            .sign(&self.key, move || passphrase, Cursor::new(data))
            .map_err(|e| Error::Pgp(e.to_string()))?;

        let standalone = StandaloneSignature::new(signature);
        standalone.to_armored_bytes(Default::default()).map_err(|e| Error::Pgp(e.to_string()))
    }
}

/// An OpenPGP verification key, loaded from an armored public-key block.
pub struct OpenPgpVerifier {
    key: SignedPublicKey,
}

impl OpenPgpVerifier {
    /// Loads an armored public key. Fails if the key material is missing or empty
    /// (spec §7 "signing" error kind: "key nil/empty").
    pub fn load(armored: &[u8]) -> Result<Self> {
        if armored.is_empty() {
            return Err(Error::SigningKeyEmpty);
        }
        let (key, _headers) = SignedPublicKey::from_armor_single(Cursor::new(armored))
            .map_err(|e| Error::Pgp(e.to_string()))?;
        Ok(OpenPgpVerifier { key })
    }
}

impl Verifier for OpenPgpVerifier {
    fn verify_detached(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let (standalone, _headers) = StandaloneSignature::from_armor_single(Cursor::new(signature))
            .map_err(|e| Error::Pgp(e.to_string()))?;
        standalone.verify(&self.key, data).map_err(|_| Error::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgp::composed::{KeyType, SecretKeyParamsBuilder};
    use pgp::crypto::sym::SymmetricKeyAlgorithm;
    use pgp::types::{CompressionAlgorithm, SecretKeyTrait};
    use smallvec::smallvec;

    fn generate_keypair() -> (Vec<u8>, Vec<u8>) {
        let mut key_params = SecretKeyParamsBuilder::default();
        key_params
            .key_type(KeyType::EdDSALegacy)
            .can_sign(true)
            .primary_user_id("Test <test@example.com>".to_string())
            .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
            .preferred_compression_algorithms(smallvec![CompressionAlgorithm::Uncompressed]);
        let secret_key_params = key_params.build().unwrap();
        let secret_key = secret_key_params.generate(rand::thread_rng()).unwrap();
        let signed_secret_key = secret_key.sign(rand::thread_rng(), String::new).unwrap();
        let public_key = signed_secret_key
            .public_key()
            .sign(rand::thread_rng(), &signed_secret_key, String::new)
            .unwrap();

        let secret_armored = signed_secret_key.to_armored_bytes(Default::default()).unwrap();
        let public_armored = public_key.to_armored_bytes(Default::default()).unwrap();
        (secret_armored, public_armored)
    }

    #[test]
    fn test_sign_then_verify_roundtrip() {
        let (secret, public) = generate_keypair();
        let signer = OpenPgpSigner::load(&secret, None).unwrap();
        let verifier = OpenPgpVerifier::load(&public).unwrap();

        let data = b"repomd.xml contents go here";
        let sig = signer.sign_detached(data).unwrap();
        verifier.verify_detached(data, &sig).unwrap();
    }

    #[test]
    fn test_verify_rejects_tampered_data() {
        let (secret, public) = generate_keypair();
        let signer = OpenPgpSigner::load(&secret, None).unwrap();
        let verifier = OpenPgpVerifier::load(&public).unwrap();

        let sig = signer.sign_detached(b"original").unwrap();
        let err = verifier.verify_detached(b"tampered", &sig).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch));
    }

    #[test]
    fn test_load_rejects_empty_key() {
        assert!(matches!(OpenPgpSigner::load(&[], None), Err(Error::SigningKeyEmpty)));
        assert!(matches!(OpenPgpVerifier::load(&[]), Err(Error::SigningKeyEmpty)));
    }
}
