//! Remote ledger service interface
//!
//! A ledger is an append-only table addressed by a tab name inside one
//! configured spreadsheet. Implementations must make a single [`LedgerService::append`]
//! call atomic per row so concurrent sessions never interleave partial rows;
//! no locking is done above this interface.
//!
//! # Header drift
//!
//! [`append_batch`] writes a header only when the tab is empty. When a tab
//! already has rows its header is assumed to match the batch columns and rows
//! are appended by position without checking. A ledger whose header was
//! written by an older column layout will silently misalign.

use crate::config::{LedgerBackend, LedgerConfig};
use crate::downloader::rows_to_csv;
use crate::error::{ConfigurationError, RemotePersistenceError};
use crate::loader::parse_csv;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A resolved tab inside the ledger spreadsheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHandle {
    pub name: String,
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Look up a tab by name without creating it
    async fn find(&self, name: &str) -> Result<Option<LedgerHandle>, RemotePersistenceError>;

    /// Create an empty tab
    async fn create(&self, name: &str) -> Result<LedgerHandle, RemotePersistenceError>;

    /// All rows of a tab, header included
    async fn read_all(&self, handle: &LedgerHandle)
    -> Result<Vec<Vec<String>>, RemotePersistenceError>;

    /// Append rows at the end of a tab
    async fn append(
        &self,
        handle: &LedgerHandle,
        rows: &[Vec<String>],
    ) -> Result<(), RemotePersistenceError>;

    async fn resolve_or_create(&self, name: &str) -> Result<LedgerHandle, RemotePersistenceError> {
        match self.find(name).await? {
            Some(handle) => Ok(handle),
            None => {
                log::info!("creating ledger tab '{}'", name);
                self.create(name).await
            }
        }
    }
}

/// Append a batch to a tab, writing `header` first if the tab is empty
///
/// Returns the number of data rows appended.
pub async fn append_batch(
    ledger: &dyn LedgerService,
    name: &str,
    header: &[String],
    rows: &[Vec<String>],
) -> Result<usize, RemotePersistenceError> {
    let handle = ledger.resolve_or_create(name).await?;
    let existing = ledger.read_all(&handle).await?;

    let mut payload = Vec::with_capacity(rows.len() + 1);
    if existing.iter().all(|row| row.iter().all(|c| c.is_empty())) {
        payload.push(header.to_vec());
    }
    payload.extend(rows.iter().cloned());

    ledger.append(&handle, &payload).await?;
    Ok(rows.len())
}

/// Build the ledger selected by configuration, `None` when disabled
pub fn build_ledger(
    config: &LedgerConfig,
) -> Result<Option<Arc<dyn LedgerService>>, ConfigurationError> {
    match config.backend {
        LedgerBackend::None => Ok(None),
        LedgerBackend::Workbook => Ok(Some(Arc::new(WorkbookLedger::new(&config.workbook_dir)))),
        LedgerBackend::GoogleSheets => {
            let sheets = crate::sheets::GoogleSheetsLedger::new(
                &config.api_base,
                &config.spreadsheet_id,
                &config.access_token,
            )
            .map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
            Ok(Some(Arc::new(sheets)))
        }
    }
}

/// In-process ledger, used by tests and as a stand-in when no spreadsheet is reachable
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tabs: Mutex<BTreeMap<String, Vec<Vec<String>>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tab_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn rows(&self, name: &str) -> Vec<Vec<String>> {
        self.lock().get(name).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<Vec<String>>>> {
        // A poisoned map still holds complete rows
        self.tabs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LedgerService for MemoryLedger {
    async fn find(&self, name: &str) -> Result<Option<LedgerHandle>, RemotePersistenceError> {
        Ok(self.lock().contains_key(name).then(|| LedgerHandle {
            name: name.to_string(),
        }))
    }

    async fn create(&self, name: &str) -> Result<LedgerHandle, RemotePersistenceError> {
        self.lock().entry(name.to_string()).or_default();
        Ok(LedgerHandle {
            name: name.to_string(),
        })
    }

    async fn read_all(
        &self,
        handle: &LedgerHandle,
    ) -> Result<Vec<Vec<String>>, RemotePersistenceError> {
        Ok(self.rows(&handle.name))
    }

    async fn append(
        &self,
        handle: &LedgerHandle,
        rows: &[Vec<String>],
    ) -> Result<(), RemotePersistenceError> {
        self.lock()
            .entry(handle.name.clone())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }
}

/// A directory of CSV files, one per tab
///
/// Useful on a single host where a shared spreadsheet is not available.
/// Appends from this process are serialized by an internal lock.
#[derive(Debug)]
pub struct WorkbookLedger {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl WorkbookLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        WorkbookLedger {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn tab_path(&self, name: &str) -> Result<PathBuf, RemotePersistenceError> {
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed.starts_with('.')
        {
            return Err(RemotePersistenceError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.csv", trimmed)))
    }
}

#[async_trait]
impl LedgerService for WorkbookLedger {
    async fn find(&self, name: &str) -> Result<Option<LedgerHandle>, RemotePersistenceError> {
        let path = self.tab_path(name)?;
        Ok(path.is_file().then(|| LedgerHandle {
            name: name.to_string(),
        }))
    }

    async fn create(&self, name: &str) -> Result<LedgerHandle, RemotePersistenceError> {
        let path = self.tab_path(name)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::create_dir_all(&self.dir)?;
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(LedgerHandle {
            name: name.to_string(),
        })
    }

    async fn read_all(
        &self,
        handle: &LedgerHandle,
    ) -> Result<Vec<Vec<String>>, RemotePersistenceError> {
        let path = self.tab_path(&handle.name)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(parse_csv(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn append(
        &self,
        handle: &LedgerHandle,
        rows: &[Vec<String>],
    ) -> Result<(), RemotePersistenceError> {
        let path = self.tab_path(&handle.name)?;
        let encoded = rows_to_csv(rows);
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(encoded.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
