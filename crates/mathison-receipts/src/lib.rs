//! # mathison-receipts
//!
//! The append-only receipt ledger. Every governed decision and every job
//! stage transition is recorded as a [`Receipt`], linked to its predecessor
//! by content hash and signed with an HMAC over
//! `{receipt_hash, prev_hash, sequence_number}`.
//!
//! [`ReceiptLedger::validate_chain`] replays the whole ledger and reports
//! every broken link with its index, so tampering, reordering, and gaps are
//! all detected without trusting the storage medium.
//!
//! Storage is pluggable through [`ReceiptBackend`]: a JSONL file
//! ([`JsonlBackend`]) for deployments, an in-memory store
//! ([`MemoryBackend`]) for tests.

pub mod error;
pub mod ledger;
pub mod receipt;
pub mod store;

pub use error::ReceiptError;
pub use ledger::{ChainReport, ChainViolation, ReceiptLedger, ReceiptQuery, ViolationKind};
pub use receipt::{Decision, Receipt};
pub use store::{JsonlBackend, MemoryBackend, ReceiptBackend};
