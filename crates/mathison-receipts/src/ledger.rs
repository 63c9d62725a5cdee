// ledger.rs - The hash-chained receipt ledger.
//
// Append, under one mutex:
//
//   1. receipt_hash    = sha256(canonical business fields)
//   2. prev_hash       = content hash of the previous receipt, or GENESIS_HASH
//   3. sequence_number = previous + 1, starting at 0
//   4. chain_signature = HMAC(key, canonical {receipt_hash, prev_hash, sequence_number})
//   5. persist durably, then advance the in-memory head
//
// The head only advances after the backend confirms the write, so a failed
// append leaves the chain exactly as it was.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mathison_crypto::{SigningKey, GENESIS_HASH};

use crate::error::ReceiptError;
use crate::receipt::{chain_signing_payload, Decision, Receipt};
use crate::store::{JsonlBackend, MemoryBackend, ReceiptBackend, StoredEntry};

/// Filter for `ReceiptLedger::query`.
#[derive(Debug, Clone, Default)]
pub struct ReceiptQuery {
    pub job_id: Option<String>,
    pub stage: Option<String>,
    pub decision: Option<Decision>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    /// Keep only the last `n` matches.
    pub last: Option<usize>,
}

impl ReceiptQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn last(mut self, n: usize) -> Self {
        self.last = Some(n);
        self
    }

    pub fn matches(&self, r: &Receipt) -> bool {
        self.job_id.as_ref().map_or(true, |j| &r.job_id == j)
            && self.stage.as_ref().map_or(true, |s| &r.stage == s)
            && self.decision.map_or(true, |d| r.decision == Some(d))
            && self.from.map_or(true, |from| r.timestamp >= from)
            && self.to.map_or(true, |to| r.timestamp < to)
    }
}

/// What went wrong at one position in the chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PrevHashMismatch,
    SequenceMismatch,
    SignatureInvalid,
    Unparseable,
}

/// One integrity violation, with enough detail to investigate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainViolation {
    /// Zero-based position in the ledger.
    pub index: usize,
    pub kind: ViolationKind,
    pub expected: String,
    pub actual: String,
}

/// Result of validating all or part of the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainReport {
    pub valid: bool,
    /// Number of entries examined.
    pub checked: usize,
    /// Total entries in the ledger.
    pub total: usize,
    pub violations: Vec<ChainViolation>,
}

impl ChainReport {
    /// Index of the first broken entry, if any.
    pub fn first_broken_index(&self) -> Option<usize> {
        self.violations.iter().map(|v| v.index).min()
    }
}

struct ChainHead {
    hash: String,
    next_sequence: u64,
}

struct LedgerInner {
    backend: Box<dyn ReceiptBackend>,
    // Recovered lazily from storage on first append.
    head: Option<ChainHead>,
}

/// Append-only, hash-chained, HMAC-signed receipt log.
pub struct ReceiptLedger {
    inner: Mutex<LedgerInner>,
    key: SigningKey,
}

impl ReceiptLedger {
    pub fn new(backend: Box<dyn ReceiptBackend>, key: SigningKey) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                backend,
                head: None,
            }),
            key,
        }
    }

    /// A ledger backed by a JSONL file.
    pub fn open_jsonl(path: impl AsRef<std::path::Path>, key: SigningKey) -> Result<Self, ReceiptError> {
        Ok(Self::new(Box::new(JsonlBackend::open(path)?), key))
    }

    /// An in-memory ledger, plus a handle to its storage.
    pub fn in_memory(key: SigningKey) -> (Self, MemoryBackend) {
        let backend = MemoryBackend::new();
        (Self::new(Box::new(backend.clone()), key), backend)
    }

    pub fn key_id(&self) -> &str {
        self.key.key_id()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerInner>, ReceiptError> {
        self.inner.lock().map_err(|_| ReceiptError::LockPoisoned)
    }

    /// Chain and durably persist `receipt`, returning the stored form.
    ///
    /// Any error means the receipt was not recorded and the caller must not
    /// treat the audited action as having happened.
    pub fn append(&self, mut receipt: Receipt) -> Result<Receipt, ReceiptError> {
        let mut inner = self.lock()?;

        if inner.head.is_none() {
            let head = recover_head(inner.backend.as_ref())?;
            inner.head = Some(head);
        }
        let (prev_hash, sequence_number) = match &inner.head {
            Some(head) => (head.hash.clone(), head.next_sequence),
            None => (GENESIS_HASH.to_string(), 0),
        };

        let receipt_hash = receipt.content_hash()?;
        receipt.prev_hash = prev_hash;
        receipt.sequence_number = sequence_number;
        receipt.chain_signature = self.key.sign(
            chain_signing_payload(&receipt_hash, &receipt.prev_hash, sequence_number).as_bytes(),
        );

        if let Err(err) = inner.backend.append(&receipt) {
            tracing::warn!(
                backend = %inner.backend.describe(),
                sequence_number,
                error = %err,
                "receipt append failed"
            );
            // The write may have partially landed; re-read the head next time.
            inner.head = None;
            return Err(err);
        }

        inner.head = Some(ChainHead {
            hash: receipt_hash,
            next_sequence: sequence_number + 1,
        });
        tracing::debug!(
            job_id = %receipt.job_id,
            stage = %receipt.stage,
            action = %receipt.action,
            sequence_number,
            "receipt appended"
        );
        Ok(receipt)
    }

    /// Every receipt for `job_id`, in append order.
    pub fn read_by_job(&self, job_id: &str) -> Result<Vec<Receipt>, ReceiptError> {
        self.query(&ReceiptQuery::new().job(job_id))
    }

    /// Every receipt in append order.
    pub fn read_all(&self) -> Result<Vec<Receipt>, ReceiptError> {
        self.lock()?.backend.read_all()
    }

    /// Receipts matching `query`, in append order.
    pub fn query(&self, query: &ReceiptQuery) -> Result<Vec<Receipt>, ReceiptError> {
        let mut matched: Vec<Receipt> = self
            .read_all()?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();
        if let Some(n) = query.last {
            let skip = matched.len().saturating_sub(n);
            matched.drain(..skip);
        }
        Ok(matched)
    }

    /// The most recent receipt for `job_id`.
    pub fn latest(&self, job_id: &str) -> Result<Option<Receipt>, ReceiptError> {
        Ok(self.read_by_job(job_id)?.pop())
    }

    pub fn len(&self) -> Result<usize, ReceiptError> {
        Ok(self.lock()?.backend.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ReceiptError> {
        Ok(self.len()? == 0)
    }

    /// Replay the whole chain and collect every violation.
    pub fn validate_chain(&self) -> Result<ChainReport, ReceiptError> {
        let entries = self.lock()?.backend.entries()?;
        Ok(self.validate_entries(&entries, 0))
    }

    /// Validate only the last `n` entries, linking from the entry before them.
    pub fn validate_tail(&self, n: usize) -> Result<ChainReport, ReceiptError> {
        let entries = self.lock()?.backend.entries()?;
        let start = entries.len().saturating_sub(n);
        Ok(self.validate_entries(&entries, start))
    }

    fn validate_entries(&self, entries: &[StoredEntry], start: usize) -> ChainReport {
        let mut violations = Vec::new();

        let (mut expected_prev, mut expected_seq) = if start == 0 {
            (Some(GENESIS_HASH.to_string()), 0u64)
        } else {
            match &entries[start - 1] {
                Ok(prev) => (prev.content_hash().ok(), prev.sequence_number + 1),
                Err(_) => (None, start as u64),
            }
        };

        for (index, entry) in entries.iter().enumerate().skip(start) {
            let receipt = match entry {
                Ok(r) => r,
                Err(reason) => {
                    violations.push(ChainViolation {
                        index,
                        kind: ViolationKind::Unparseable,
                        expected: "a receipt record".to_string(),
                        actual: reason.clone(),
                    });
                    expected_prev = None;
                    expected_seq += 1;
                    continue;
                }
            };

            if let Some(expected) = &expected_prev {
                if &receipt.prev_hash != expected {
                    violations.push(ChainViolation {
                        index,
                        kind: ViolationKind::PrevHashMismatch,
                        expected: expected.clone(),
                        actual: receipt.prev_hash.clone(),
                    });
                }
            }

            if receipt.sequence_number != expected_seq {
                violations.push(ChainViolation {
                    index,
                    kind: ViolationKind::SequenceMismatch,
                    expected: expected_seq.to_string(),
                    actual: receipt.sequence_number.to_string(),
                });
            }

            match receipt.content_hash() {
                Ok(hash) => {
                    let payload =
                        chain_signing_payload(&hash, &receipt.prev_hash, receipt.sequence_number);
                    if !self.key.verify(payload.as_bytes(), &receipt.chain_signature) {
                        violations.push(ChainViolation {
                            index,
                            kind: ViolationKind::SignatureInvalid,
                            expected: self.key.sign(payload.as_bytes()),
                            actual: receipt.chain_signature.clone(),
                        });
                    }
                    expected_prev = Some(hash);
                }
                Err(err) => {
                    violations.push(ChainViolation {
                        index,
                        kind: ViolationKind::Unparseable,
                        expected: "a hashable receipt".to_string(),
                        actual: err.to_string(),
                    });
                    expected_prev = None;
                }
            }
            expected_seq += 1;
        }

        if !violations.is_empty() {
            tracing::warn!(
                violations = violations.len(),
                first_index = violations[0].index,
                "receipt chain integrity violations detected"
            );
        }

        ChainReport {
            valid: violations.is_empty(),
            checked: entries.len() - start,
            total: entries.len(),
            violations,
        }
    }
}

impl std::fmt::Debug for ReceiptLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptLedger")
            .field("key_id", &self.key.key_id())
            .finish_non_exhaustive()
    }
}

fn recover_head(backend: &dyn ReceiptBackend) -> Result<ChainHead, ReceiptError> {
    let entries = backend.entries()?;
    match entries.last() {
        None => Ok(ChainHead {
            hash: GENESIS_HASH.to_string(),
            next_sequence: 0,
        }),
        Some(Ok(last)) => Ok(ChainHead {
            hash: last.content_hash()?,
            next_sequence: last.sequence_number + 1,
        }),
        // Appending after a corrupt tail would hide it behind a valid link.
        Some(Err(reason)) => Err(ReceiptError::Corrupt {
            index: entries.len() - 1,
            reason: reason.clone(),
        }),
    }
}
