//! Persistent credential store
//!
//! Kept apart from the main configuration file so frequent token writes never
//! contend with (or corrupt) operator-edited settings.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed credential file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Last known bearer per account
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, account: &str) -> Option<String>;
    async fn set(&self, account: &str, value: &str) -> Result<(), StoreError>;
}

/// JSON file store: `{ "account": "bearer", ... }`
pub struct JsonFileStore {
    path: PathBuf,
    tokens: RwLock<HashMap<String, String>>,
    /// Serializes file rewrites
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store, reading existing tokens. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tokens = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Format {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::info!(path = %path.display(), accounts = tokens.len(), "Credential store loaded");

        Ok(Self {
            path,
            tokens: RwLock::new(tokens),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn get(&self, account: &str) -> Option<String> {
        self.tokens
            .read()
            .get(account)
            .filter(|t| !t.is_empty())
            .cloned()
    }

    async fn set(&self, account: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let serialized = {
            let mut tokens = self.tokens.write();
            tokens.insert(account.to_string(), value.to_string());
            serde_json::to_vec_pretty(&*tokens).map_err(|source| StoreError::Format {
                path: self.path.clone(),
                source,
            })?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        Ok(())
    }
}

/// Non-persistent store
#[derive(Default)]
pub struct MemoryStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, account: &str) -> Option<String> {
        self.tokens.read().get(account).cloned()
    }

    async fn set(&self, account: &str, value: &str) -> Result<(), StoreError> {
        self.tokens.write().insert(account.to_string(), value.to_string());
        Ok(())
    }
}
