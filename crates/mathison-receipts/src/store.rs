// store.rs - Storage backends for receipts.
//
// A backend only has to append and read back in order; it never updates or
// deletes. Chain bookkeeping lives in the ledger, so any backend that keeps
// field names intact preserves the chain invariant.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::ReceiptError;
use crate::receipt::Receipt;

/// One stored entry: a receipt, or the reason it could not be parsed.
pub type StoredEntry = Result<Receipt, String>;

/// Append-only receipt storage.
pub trait ReceiptBackend: Send {
    /// Durably append one receipt. Returning `Ok` means it is persisted.
    fn append(&mut self, receipt: &Receipt) -> Result<(), ReceiptError>;

    /// Every stored entry in append order, unparseable ones included.
    fn entries(&self) -> Result<Vec<StoredEntry>, ReceiptError>;

    /// Every stored receipt; fails on the first unparseable entry.
    fn read_all(&self) -> Result<Vec<Receipt>, ReceiptError> {
        self.entries()?
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.map_err(|reason| ReceiptError::Corrupt { index, reason }))
            .collect()
    }

    /// Short human-readable location for logs.
    fn describe(&self) -> String;
}

/// A JSONL file: one receipt per line.
///
/// Each append is one unbuffered `write_all` followed by `sync_data`. A
/// failed append truncates the file back to its length before the write, so
/// nothing from a failed append can land later.
pub struct JsonlBackend {
    file: File,
    path: PathBuf,
}

impl JsonlBackend {
    /// Open (or create) the ledger file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReceiptError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| ReceiptError::OpenFailed {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ReceiptError::OpenFailed {
                path: path.clone(),
                source,
            })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()
    }

    // Best effort: cut off whatever part of the failed line reached the file.
    fn rollback(&mut self, len: u64) {
        let result = self
            .file
            .set_len(len)
            .and_then(|()| self.file.sync_data());
        if let Err(err) = result {
            tracing::warn!(
                path = %self.path.display(),
                len,
                error = %err,
                "could not truncate receipt ledger after a failed append"
            );
        }
    }
}

impl ReceiptBackend for JsonlBackend {
    fn append(&mut self, receipt: &Receipt) -> Result<(), ReceiptError> {
        let mut line = serde_json::to_string(receipt)?;
        line.push('\n');
        let len_before = self.file.metadata()?.len();
        if let Err(err) = self.write_line(&line) {
            self.rollback(len_before);
            return Err(err.into());
        }
        Ok(())
    }

    fn entries(&self) -> Result<Vec<StoredEntry>, ReceiptError> {
        let file = File::open(&self.path).map_err(|source| ReceiptError::OpenFailed {
            path: self.path.clone(),
            source,
        })?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str::<Receipt>(&line).map_err(|e| e.to_string()));
        }
        Ok(entries)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process storage, for tests and ephemeral deployments.
///
/// Clones share the same entries, which lets a test keep a handle and
/// tamper with stored receipts behind the ledger's back.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<Vec<Receipt>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate a stored receipt directly, bypassing the ledger.
    pub fn tamper(&self, index: usize, edit: impl FnOnce(&mut Receipt)) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get_mut(index) {
            Some(receipt) => {
                edit(receipt);
                true
            }
            None => false,
        }
    }

    /// Swap two stored receipts.
    pub fn swap(&self, a: usize, b: usize) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if a < entries.len() && b < entries.len() {
            entries.swap(a, b);
        }
    }
}

impl ReceiptBackend for MemoryBackend {
    fn append(&mut self, receipt: &Receipt) -> Result<(), ReceiptError> {
        self.entries
            .lock()
            .map_err(|_| ReceiptError::LockPoisoned)?
            .push(receipt.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<StoredEntry>, ReceiptError> {
        let entries = self.entries.lock().map_err(|_| ReceiptError::LockPoisoned)?;
        Ok(entries.iter().cloned().map(Ok).collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
