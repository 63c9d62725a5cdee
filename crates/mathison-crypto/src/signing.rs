// signing.rs - HMAC signing keys and Ed25519 verification.
//
// Two kinds of signatures appear in Mathison:
//
// - Symmetric HMAC-SHA256 tags, produced and checked by the same process.
//   Capability tokens and receipt chain signatures use these. The key is
//   established once at boot and wrapped in an immutable `SigningKey`.
// - Asymmetric Ed25519 signatures, produced by an external authority and
//   only *verified* here. Policy capsules are signed this way.
//
// Tags and signatures travel as standard base64 strings.

use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{hmac, signature};

use crate::error::CryptoError;
use crate::hasher;

/// An immutable HMAC-SHA256 signing key with an identifier.
///
/// The `key_id` is recorded in everything the key signs (e.g. a token's
/// `boot_key_id`), so a verifier can tell "signed by a different key" apart
/// from "tampered". Constructing a new `SigningKey` with a different secret
/// is a key rotation: everything signed by the old key stops verifying.
#[derive(Clone)]
pub struct SigningKey {
    key: hmac::Key,
    key_id: String,
}

impl SigningKey {
    /// Minimum accepted secret length in bytes.
    pub const MIN_SECRET_LEN: usize = 32;

    /// Build a key from raw secret bytes and an explicit identifier.
    pub fn new(secret: &[u8], key_id: impl Into<String>) -> Result<Self, CryptoError> {
        if secret.len() < Self::MIN_SECRET_LEN {
            return Err(CryptoError::KeyTooShort {
                len: secret.len(),
                min: Self::MIN_SECRET_LEN,
            });
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            key_id: key_id.into(),
        })
    }

    /// Build a key whose identifier is derived from the secret itself.
    ///
    /// The same persisted secret always yields the same id, so tokens
    /// survive a restart only when the key file is unchanged.
    pub fn from_secret(secret: &[u8]) -> Result<Self, CryptoError> {
        let key_id = derive_key_id(secret);
        Self::new(secret, key_id)
    }

    /// Generate a fresh random key that lives for this process only.
    pub fn ephemeral() -> Result<Self, CryptoError> {
        let secret = generate_secret()?;
        Self::from_secret(&secret)
    }

    /// Decode a base64 secret (surrounding whitespace ignored).
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let secret = decode_b64(text.trim(), "signing key")?;
        Self::from_secret(&secret)
    }

    /// Load a base64 secret from a key file.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let text = std::fs::read_to_string(path).map_err(|source| CryptoError::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_base64(&text)
    }

    /// The identifier recorded alongside every signature.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign `data`, returning a base64 HMAC tag.
    pub fn sign(&self, data: &[u8]) -> String {
        let tag = hmac::sign(&self.key, data);
        BASE64.encode(tag.as_ref())
    }

    /// Verify a base64 HMAC tag in constant time.
    ///
    /// Malformed base64 is simply "not valid", never an error: verification
    /// callers only need a yes/no.
    pub fn verify(&self, data: &[u8], tag_b64: &str) -> bool {
        match BASE64.decode(tag_b64) {
            Ok(tag) => hmac::verify(&self.key, data, &tag).is_ok(),
            Err(_) => false,
        }
    }
}

// Never print key material.
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Generate 32 bytes of secret material from the system RNG.
pub fn generate_secret() -> Result<[u8; 32], CryptoError> {
    let mut secret = [0u8; 32];
    SystemRandom::new()
        .fill(&mut secret)
        .map_err(|_| CryptoError::Randomness)?;
    Ok(secret)
}

/// Encode bytes as standard base64 (used for key files and public keys).
pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard base64, naming the field in the error.
pub fn decode_b64(text: &str, what: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64.decode(text).map_err(|e| CryptoError::Encoding {
        what: what.to_string(),
        reason: e.to_string(),
    })
}

/// Verify an Ed25519 signature over `message`.
///
/// Both the public key (32 raw bytes) and the signature (64 raw bytes) are
/// base64 encoded.
pub fn verify_ed25519(
    public_key_b64: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), CryptoError> {
    let public_key = decode_b64(public_key_b64, "public key")?;
    let sig = decode_b64(signature_b64, "signature")?;
    signature::UnparsedPublicKey::new(&signature::ED25519, public_key)
        .verify(message, &sig)
        .map_err(|_| CryptoError::SignatureInvalid)
}

fn derive_key_id(secret: &[u8]) -> String {
    let digest = hasher::hash_bytes(secret);
    format!("key-{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::signature::{Ed25519KeyPair, KeyPair};

    #[test]
    fn rejects_short_secret() {
        let result = SigningKey::new(&[1u8; 8], "k");
        assert!(matches!(result, Err(CryptoError::KeyTooShort { len: 8, .. })));
    }

    #[test]
    fn sign_verify_round_trip() {
        let key = SigningKey::new(&[9u8; 32], "k1").unwrap();
        let tag = key.sign(b"data");
        assert!(key.verify(b"data", &tag));
        assert!(!key.verify(b"other", &tag));
    }

    #[test]
    fn different_secret_does_not_verify() {
        let a = SigningKey::new(&[1u8; 32], "k").unwrap();
        let b = SigningKey::new(&[2u8; 32], "k").unwrap();
        assert!(!b.verify(b"data", &a.sign(b"data")));
    }

    #[test]
    fn malformed_tag_is_not_valid() {
        let key = SigningKey::new(&[1u8; 32], "k").unwrap();
        assert!(!key.verify(b"data", "%%% not base64"));
    }

    #[test]
    fn key_id_is_stable_for_same_secret() {
        let a = SigningKey::from_secret(&[5u8; 32]).unwrap();
        let b = SigningKey::from_secret(&[5u8; 32]).unwrap();
        let c = SigningKey::from_secret(&[6u8; 32]).unwrap();
        assert_eq!(a.key_id(), b.key_id());
        assert_ne!(a.key_id(), c.key_id());
    }

    #[test]
    fn ephemeral_keys_differ() {
        let a = SigningKey::ephemeral().unwrap();
        let b = SigningKey::ephemeral().unwrap();
        assert_ne!(a.key_id(), b.key_id());
    }

    #[test]
    fn load_from_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.key");
        std::fs::write(&path, format!("{}\n", encode_b64(&[3u8; 32]))).unwrap();
        let loaded = SigningKey::load(&path).unwrap();
        let direct = SigningKey::from_secret(&[3u8; 32]).unwrap();
        assert_eq!(loaded.key_id(), direct.key_id());
    }

    #[test]
    fn debug_hides_secret() {
        let key = SigningKey::new(&[1u8; 32], "visible-id").unwrap();
        let dbg = format!("{:?}", key);
        assert!(dbg.contains("visible-id"));
    }

    #[test]
    fn ed25519_verification() {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let pk = encode_b64(pair.public_key().as_ref());
        let sig = encode_b64(pair.sign(b"capsule").as_ref());

        assert!(verify_ed25519(&pk, b"capsule", &sig).is_ok());
        assert!(matches!(
            verify_ed25519(&pk, b"tampered", &sig),
            Err(CryptoError::SignatureInvalid)
        ));
    }
}
