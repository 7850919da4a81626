//! Append-only JSON-lines logs for payments and discoveries
//!
//! Every entry is one line, flushed and synced before `append` returns.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{PaymentResult, PurchaseIntent};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One line-delimited JSON file, opened lazily in append mode
pub struct JsonLinesWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonLinesWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    pub fn append<T: Serialize>(&self, entry: &T) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut guard = self.file.lock();
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| self.io_error(e))?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            file.write_all(&line).map_err(|e| self.io_error(e))?;
            file.sync_data().map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }
}

/// A settled (or failed) payment as written to the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub account: String,
    pub order_id: String,
    /// Nano, fee padding included
    pub amount: u64,
    pub currency: String,
    pub from_address: String,
    pub to_address: String,
    pub chain_tx_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub test_mode: bool,
}

impl PaymentAuditEntry {
    pub fn from_result(account: &str, currency: &str, result: &PaymentResult, test_mode: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            account: account.to_string(),
            order_id: result.memo.clone(),
            amount: result.amount,
            currency: currency.to_string(),
            from_address: result.source_address.clone(),
            to_address: result.destination_address.clone(),
            chain_tx_id: result.chain_tx_id.clone(),
            success: result.success,
            failure: result.failure.clone(),
            test_mode,
        }
    }
}

pub struct PaymentAuditLog {
    writer: JsonLinesWriter,
}

impl PaymentAuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            writer: JsonLinesWriter::new(path),
        }
    }

    pub fn record(&self, entry: &PaymentAuditEntry) -> Result<(), AuditError> {
        self.writer.append(entry)
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }
}

/// A discovered sub-item that passed the filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    /// Parent collection id
    pub id: u64,
    pub parent_title: String,
    pub character_id: u64,
    pub character_name: String,
    pub supply: u64,
    pub price_minor_units: u64,
    pub found_at: DateTime<Utc>,
    pub account: String,
}

impl From<&PurchaseIntent> for DiscoveryEntry {
    fn from(intent: &PurchaseIntent) -> Self {
        Self {
            id: intent.target.collection(),
            parent_title: intent.parent_title.clone(),
            character_id: intent.target.character(),
            character_name: intent.character_name.clone(),
            supply: intent.supply,
            price_minor_units: intent.price_nano,
            found_at: intent.detected_at,
            account: intent.account.clone(),
        }
    }
}

pub struct DiscoveryLog {
    writer: JsonLinesWriter,
}

impl DiscoveryLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            writer: JsonLinesWriter::new(path),
        }
    }

    pub fn record(&self, intent: &PurchaseIntent) -> Result<(), AuditError> {
        self.writer.append(&DiscoveryEntry::from(intent))
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }
}
