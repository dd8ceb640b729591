use super::{Handler, MatchCriteria};
use crate::naming;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::info;

/// Files the input straight into its archive directory.
///
/// Useful for file types that only need to be collected, and as the
/// relocation step every other handler finishes with.
pub struct ArchiveHandler {
    name: String,
    criteria: MatchCriteria,
    archive_dir: PathBuf,
}

impl ArchiveHandler {
    pub fn new(name: impl Into<String>, criteria: MatchCriteria, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            criteria,
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }
}

impl Handler for ArchiveHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn criteria(&self) -> &MatchCriteria {
        &self.criteria
    }

    fn process(&self, path: &Path) -> anyhow::Result<()> {
        let target = naming::move_into_dir(path, &self.archive_dir)
            .with_context(|| format!("archiving {} into {}", path.display(), self.archive_dir.display()))?;
        info!(handler = %self.name, archived = %target.display(), "📦 archived");
        Ok(())
    }
}
