use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, Metadata};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;
use tracing::debug;

const STORE_VERSION: u32 = 1;

/// Size and modification time of a file at admission.
///
/// Used to tell "the file we already admitted is still sitting there" apart
/// from "a new file arrived under a name we have seen before".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    pub modified_ms: Option<i64>,
}

impl Fingerprint {
    pub fn of(meta: &Metadata) -> Self {
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        Self {
            size: meta.len(),
            modified_ms,
        }
    }
}

/// One admitted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRecord {
    /// Name the file had when it was first observed
    pub original_name: String,
    /// Name the file carries after stabilization
    pub assigned_name: String,
    pub fingerprint: Fingerprint,
    pub admitted_at: DateTime<Utc>,
    /// The file has left the watched directory (archived, quarantined or
    /// removed), so its name is free for a new arrival
    #[serde(default)]
    pub relocated: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    files: BTreeMap<String, SeenRecord>,
}

/// Durable set of file names already admitted into the pipeline, keyed by
/// assigned name.
///
/// The whole document is read at start-up and rewritten after every `add`
/// through a temporary file that atomically replaces the store, so a crash
/// can lose at most the latest addition and never leaves a truncated store.
#[derive(Debug)]
pub struct SeenFileStore {
    path: PathBuf,
    doc: StoreDocument,
}

impl SeenFileStore {
    /// Load the store at `path`. A missing file is an empty store; an
    /// unreadable or corrupt one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => StoreDocument::default(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(StoreError::Io { path, source: e }),
        };
        debug!(path = %path.display(), entries = doc.files.len(), "seen-file store loaded");
        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has(&self, name: &str) -> bool {
        self.doc.files.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&SeenRecord> {
        self.doc.files.get(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &SeenRecord> {
        self.doc.files.values()
    }

    pub fn len(&self) -> usize {
        self.doc.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.files.is_empty()
    }

    /// Record an admission and persist before returning.
    ///
    /// If persisting fails the in-memory entry is rolled back, so memory never
    /// claims more than the disk does.
    pub fn add(&mut self, record: SeenRecord) -> Result<(), StoreError> {
        let name = record.assigned_name.clone();
        let previous = self.doc.files.insert(name.clone(), record);
        if let Err(e) = self.persist() {
            match previous {
                Some(prev) => {
                    self.doc.files.insert(name, prev);
                }
                None => {
                    self.doc.files.remove(&name);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Change an existing record in place and persist. Returns `false` when
    /// no record carries `name`.
    pub fn update<F>(&mut self, name: &str, change: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut SeenRecord),
    {
        let Some(record) = self.doc.files.get_mut(name) else {
            return Ok(false);
        };
        let previous = record.clone();
        change(record);
        if let Err(e) = self.persist() {
            self.doc.files.insert(name.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        self.doc.version = STORE_VERSION;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        let bytes = serde_json::to_vec_pretty(&self.doc)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
