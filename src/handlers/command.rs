use super::{Handler, MatchCriteria};
use crate::naming;
use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

// Keep error messages readable when a script dumps a traceback
const STDERR_TAIL_CHARS: usize = 2_000;

/// Runs an external program on the file, then archives it.
///
/// The file path is appended as the last argument. Exit status zero is
/// success; anything else is a failure and the input stays where it is.
pub struct CommandHandler {
    name: String,
    criteria: MatchCriteria,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    archive_dir: PathBuf,
}

impl CommandHandler {
    pub fn new(
        name: impl Into<String>,
        criteria: MatchCriteria,
        program: impl Into<String>,
        args: Vec<String>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            criteria,
            program: program.into(),
            args,
            working_dir: None,
            archive_dir: archive_dir.into(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let start = text.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &text[start..]
}

impl Handler for CommandHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn criteria(&self) -> &MatchCriteria {
        &self.criteria
    }

    fn process(&self, path: &Path) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(path);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        debug!(handler = %self.name, program = %self.program, file = %path.display(), "running handler command");

        let output = cmd
            .output()
            .with_context(|| format!("failed to start '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            );
        }

        let target = naming::move_into_dir(path, &self.archive_dir)
            .with_context(|| format!("archiving {} into {}", path.display(), self.archive_dir.display()))?;
        info!(handler = %self.name, archived = %target.display(), "✅ command succeeded, archived");
        Ok(())
    }
}
