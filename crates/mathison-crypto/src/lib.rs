//! # mathison-crypto
//!
//! Deterministic canonicalization, content hashing, and signing primitives
//! shared by every other Mathison crate.
//!
//! - [`canonical`] turns any JSON-serializable record into one stable byte
//!   string (object keys sorted, no whitespace), so two processes hashing
//!   the same record always agree.
//! - [`hasher`] produces lowercase hex SHA-256 digests.
//! - [`signing`] holds the HMAC-SHA256 [`SigningKey`] used for capability
//!   tokens and the receipt chain, plus Ed25519 verification for signed
//!   policy capsules.
//!
//! ## Quick Example
//!
//! ```rust
//! use mathison_crypto::{canonical, hasher, SigningKey};
//!
//! let record = serde_json::json!({"b": 1, "a": [true, null]});
//! assert_eq!(canonical::canonical_json(&record), r#"{"a":[true,null],"b":1}"#);
//!
//! let key = SigningKey::new(&[7u8; 32], "boot-1").unwrap();
//! let sig = key.sign(hasher::hash_str("payload").as_bytes());
//! assert!(key.verify(hasher::hash_str("payload").as_bytes(), &sig));
//! ```

pub mod canonical;
pub mod error;
pub mod hasher;
pub mod signing;

pub use error::CryptoError;
pub use hasher::GENESIS_HASH;
pub use signing::{generate_secret, verify_ed25519, SigningKey};
