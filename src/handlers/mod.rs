//! The contract every content handler implements, plus the generic handlers
//! that ship with the binary.
//!
//! A handler decides from the file name alone whether it wants a file
//! (`matches`), and when chosen it owns the file completely (`process`):
//! it transforms it, writes its outputs and moves the input into its own
//! archive directory on success. The dispatcher never touches the filesystem
//! on a handler's behalf.

pub mod archive;
pub mod command;
pub mod factory;

pub use archive::ArchiveHandler;
pub use command::CommandHandler;
pub use factory::{create_handler, HandlerDefinition, HandlerKind};

use crate::constants::normalize_extension;
use crate::naming;
use std::fmt;
use std::path::Path;

/// Extension plus filename substrings a handler accepts.
///
/// A name matches iff its extension equals `extension` (case-insensitive, no
/// leading dot) and it contains at least one of `substrings` (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCriteria {
    extension: String,
    substrings: Vec<String>,
}

impl MatchCriteria {
    pub fn new<I, S>(extension: &str, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extension: normalize_extension(extension),
            substrings: substrings
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn substrings(&self) -> &[String] {
        &self.substrings
    }

    /// Criteria without an extension or without substrings match nothing.
    pub fn is_usable(&self) -> bool {
        !self.extension.is_empty() && !self.substrings.is_empty()
    }

    pub fn matches(&self, file_name: &str) -> bool {
        let ext_ok = naming::extension_of(file_name).is_some_and(|e| e == self.extension);
        ext_ok && self.substrings.iter().any(|s| file_name.contains(s.as_str()))
    }
}

impl fmt::Display for MatchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*.{} containing any of [{}]", self.extension, self.substrings.join(", "))
    }
}

/// Core trait that all content handlers must implement.
pub trait Handler: Send + Sync {
    /// Unique name; also the registry sort key.
    fn name(&self) -> &str;

    fn criteria(&self) -> &MatchCriteria;

    /// Pure check on the file name.
    fn matches(&self, file_name: &str) -> bool {
        self.criteria().matches(file_name)
    }

    /// Process the file at `path` and relocate it on success.
    fn process(&self, path: &Path) -> anyhow::Result<()>;

    /// Human-readable match criteria for start-up diagnostics.
    fn describe_match_criteria(&self) -> String {
        self.criteria().to_string()
    }
}
