use crate::config::Config;
use crate::constants::normalize_extension;
use crate::error::AdmissionError;
use crate::naming;
use crate::store::{Fingerprint, SeenFileStore, SeenRecord};
use chrono::{DateTime, Local, Utc};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A path reported by the event source, before admission.
#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub base_name: String,
    pub extension: Option<String>,
    pub first_observed: DateTime<Utc>,
    pub stabilized: bool,
}

impl WatchedFile {
    pub fn observe(path: &Path) -> Result<Self, AdmissionError> {
        let base_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AdmissionError::InvalidName(path.to_path_buf()))?
            .to_string();
        let extension = naming::extension_of(&base_name);
        Ok(Self {
            path: path.to_path_buf(),
            base_name,
            extension,
            first_observed: Utc::now(),
            stabilized: false,
        })
    }

    fn has_extension_in(&self, set: &HashSet<String>) -> bool {
        self.extension.as_ref().is_some_and(|e| set.contains(e))
    }
}

/// An admitted file: unique name, recorded in the seen-file store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StablePath {
    path: PathBuf,
    name: String,
    original_name: String,
}

impl StablePath {
    pub(crate) fn from_parts(path: PathBuf, name: String, original_name: String) -> Self {
        Self {
            path,
            name,
            original_name,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn was_renamed(&self) -> bool {
        self.name != self.original_name
    }
}

/// Result of offering one observed path to the stabilizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(StablePath),
    /// Still downloading; looked at again on a later cycle
    Deferred,
    /// Ignored extension, moved to the quarantine directory
    Quarantined(PathBuf),
    /// Same file as an earlier admission
    AlreadySeen,
    /// Not a regular file, vanished, or one of our own bookkeeping files
    Skipped,
}

impl Admission {
    pub fn into_stable(self) -> Option<StablePath> {
        match self {
            Admission::Admitted(stable) => Some(stable),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Admission::Admitted(_) => "admitted",
            Admission::Deferred => "deferred",
            Admission::Quarantined(_) => "quarantined",
            Admission::AlreadySeen => "already_seen",
            Admission::Skipped => "skipped",
        }
    }
}

/// Gives each new file a collision-free name and records it as seen.
pub struct FileStabilizer {
    store: SeenFileStore,
    in_progress: HashSet<String>,
    ignored: HashSet<String>,
    quarantine_dir: PathBuf,
}

impl FileStabilizer {
    pub fn new<I, J>(store: SeenFileStore, in_progress: I, ignored: J, quarantine_dir: PathBuf) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            store,
            in_progress: in_progress.into_iter().map(|e| normalize_extension(&e)).collect(),
            ignored: ignored.into_iter().map(|e| normalize_extension(&e)).collect(),
            quarantine_dir,
        }
    }

    pub fn from_config(config: &Config, store: SeenFileStore) -> Self {
        Self::new(
            store,
            config.watch.in_progress_extensions.clone(),
            config.watch.ignored_extensions.clone(),
            config.quarantine_dir(),
        )
    }

    pub fn store(&self) -> &SeenFileStore {
        &self.store
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn admit(&mut self, path: &Path) -> Result<Admission, AdmissionError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Admission::Skipped),
            Err(e) => {
                return Err(AdmissionError::Inspect {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        if !meta.is_file() || self.is_store_file(path) {
            return Ok(Admission::Skipped);
        }

        let mut file = WatchedFile::observe(path)?;

        if file.has_extension_in(&self.in_progress) {
            debug!(file = %file.base_name, "download still in progress, deferring");
            return Ok(Admission::Deferred);
        }

        let fingerprint = Fingerprint::of(&meta);

        if file.has_extension_in(&self.ignored) {
            let target = naming::move_into_dir(path, &self.quarantine_dir).map_err(|e| {
                AdmissionError::Move {
                    from: path.to_path_buf(),
                    to: self.quarantine_dir.clone(),
                    source: e,
                }
            })?;
            let assigned = target
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&file.base_name)
                .to_string();
            self.record(&file.base_name, &assigned, fingerprint, true)?;
            info!(file = %file.base_name, to = %target.display(), "ignored extension, quarantined");
            return Ok(Admission::Quarantined(target));
        }

        // A name whose file never left the directory is the same file, even
        // if it was edited since admission
        if let Some(seen) = self.store.get(&file.base_name) {
            if !seen.relocated {
                if seen.fingerprint != fingerprint {
                    self.store
                        .update(&file.base_name, |r| r.fingerprint = fingerprint)?;
                    debug!(file = %file.base_name, "seen file changed in place, still seen");
                }
                return Ok(Admission::AlreadySeen);
            }
        }

        let mut assigned = file.base_name.clone();
        let mut stable_path = file.path.clone();
        if self.store.has(&assigned) {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let store = &self.store;
            assigned = naming::unique_name(&file.base_name, Local::now(), |candidate| {
                store.has(candidate) || dir.join(candidate).exists()
            });
            stable_path = dir.join(&assigned);
            naming::move_file(path, &stable_path).map_err(|e| AdmissionError::Move {
                from: path.to_path_buf(),
                to: stable_path.clone(),
                source: e,
            })?;
            info!(from = %file.base_name, to = %assigned, "name already seen, renamed");
        }

        if let Err(e) = self.record(&file.base_name, &assigned, fingerprint, false) {
            warn!(file = %assigned, error = %e, "admission not recorded; will be observed again");
            return Err(e);
        }
        file.stabilized = true;
        debug!(file = %assigned, observed_at = %file.first_observed, "admitted");

        Ok(Admission::Admitted(StablePath::from_parts(
            stable_path,
            assigned,
            file.base_name,
        )))
    }

    /// Move an admitted file that keeps failing into quarantine.
    pub fn quarantine(&mut self, stable: &StablePath) -> Result<PathBuf, AdmissionError> {
        let target = naming::move_into_dir(stable.path(), &self.quarantine_dir).map_err(|e| AdmissionError::Move {
            from: stable.path().to_path_buf(),
            to: self.quarantine_dir.clone(),
            source: e,
        })?;
        if let Err(e) = self.mark_relocated(stable) {
            warn!(file = %stable.name(), error = %e, "quarantined file not marked as moved in store");
        }
        Ok(target)
    }

    /// Note that an admitted file has left the watched directory. Its name
    /// is then free for a new arrival, which gets a unique name.
    pub fn mark_relocated(&mut self, stable: &StablePath) -> Result<(), AdmissionError> {
        self.store.update(stable.name(), |r| r.relocated = true)?;
        Ok(())
    }

    /// Mark every resident record whose file is no longer in `dir`.
    ///
    /// Covers files moved away while the process was down, or by a handler
    /// that finished just before a crash. Returns how many records changed.
    pub fn reconcile(&mut self, dir: &Path) -> Result<usize, AdmissionError> {
        let gone: Vec<String> = self
            .store
            .records()
            .filter(|r| !r.relocated && !dir.join(&r.assigned_name).exists())
            .map(|r| r.assigned_name.clone())
            .collect();
        for name in &gone {
            self.store.update(name, |r| r.relocated = true)?;
        }
        Ok(gone.len())
    }

    fn record(
        &mut self,
        original: &str,
        assigned: &str,
        fingerprint: Fingerprint,
        relocated: bool,
    ) -> Result<(), AdmissionError> {
        self.store.add(SeenRecord {
            original_name: original.to_string(),
            assigned_name: assigned.to_string(),
            fingerprint,
            admitted_at: Utc::now(),
            relocated,
        })?;
        Ok(())
    }

    fn is_store_file(&self, path: &Path) -> bool {
        if path == self.store.path() {
            return true;
        }
        match (path.canonicalize(), self.store.path().canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
