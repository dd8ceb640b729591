use crate::constants::HANDLER_DEFINITION_EXTENSION;
use crate::error::LoadError;
use crate::handlers::{Handler, HandlerDefinition};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Ordered set of handlers available for dispatch.
///
/// Iteration is always lexicographic by handler name, independent of the
/// order handlers were registered or definition files were listed, so
/// first-match resolution is reproducible across restarts.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Names must be unique and criteria usable.
    pub fn register(&mut self, handler: Box<dyn Handler>) -> Result<(), LoadError> {
        let name = handler.name().to_string();
        if name.trim().is_empty() {
            return Err(LoadError::Invalid {
                name,
                reason: "name must not be empty".to_string(),
            });
        }
        if !handler.criteria().is_usable() {
            return Err(LoadError::Invalid {
                name,
                reason: "needs an extension and at least one non-empty substring".to_string(),
            });
        }
        if self.handlers.contains_key(&name) {
            return Err(LoadError::Duplicate(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Load every `*.toml` definition in `dir` through `factory`.
    ///
    /// Definitions that fail to read, parse, validate or register are logged,
    /// skipped and returned alongside the registry. Only an unreadable
    /// directory is an error here; use `ensure_not_empty` to reject an empty
    /// result.
    pub fn discover<F>(dir: &Path, factory: F) -> Result<(Self, Vec<LoadError>), LoadError>
    where
        F: Fn(&HandlerDefinition) -> Result<Box<dyn Handler>, LoadError>,
    {
        let entries = fs::read_dir(dir).map_err(|e| LoadError::Directory {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(HANDLER_DEFINITION_EXTENSION))
            })
            .collect();
        paths.sort();

        let mut registry = Self::new();
        let mut errors = Vec::new();
        for path in paths {
            let loaded = HandlerDefinition::from_file(&path)
                .and_then(|def| factory(&def))
                .and_then(|handler| registry.register(handler));
            if let Err(e) = loaded {
                warn!(definition = %path.display(), error = %e, "skipping handler that failed to load");
                errors.push(e);
            }
        }

        Ok((registry, errors))
    }

    pub fn ensure_not_empty(&self) -> Result<(), LoadError> {
        if self.handlers.is_empty() {
            return Err(LoadError::EmptyRegistry);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Handler> {
        self.handlers.values().map(|h| h.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }

    /// First handler, in registry order, whose predicate accepts `file_name`.
    pub fn first_match(&self, file_name: &str) -> Option<&dyn Handler> {
        self.iter().find(|h| h.matches(file_name))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Log each handler with its match criteria, in dispatch order.
    pub fn describe(&self) {
        for (position, handler) in self.iter().enumerate() {
            info!(
                position = position + 1,
                handler = %handler.name(),
                criteria = %handler.describe_match_criteria(),
                "registered handler"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{create_handler, ArchiveHandler, MatchCriteria};

    fn archive(name: &str, ext: &str, subs: &[&str]) -> Box<dyn Handler> {
        Box::new(ArchiveHandler::new(
            name,
            MatchCriteria::new(ext, subs.iter().copied()),
            format!("archive/{}", name),
        ))
    }

    #[test]
    fn iteration_is_sorted_by_name_regardless_of_registration_order() {
        let mut a = HandlerRegistry::new();
        a.register(archive("zeta", "csv", &["Z"])).unwrap();
        a.register(archive("alpha", "csv", &["A"])).unwrap();
        a.register(archive("mid", "csv", &["M"])).unwrap();

        let mut b = HandlerRegistry::new();
        b.register(archive("mid", "csv", &["M"])).unwrap();
        b.register(archive("alpha", "csv", &["A"])).unwrap();
        b.register(archive("zeta", "csv", &["Z"])).unwrap();

        assert_eq!(a.names(), vec!["alpha", "mid", "zeta"]);
        assert_eq!(a.names(), b.names());
    }

    #[test]
    fn overlapping_predicates_resolve_to_first_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(archive("b_commissions", "csv", &["ATMActivity"])).unwrap();
        registry.register(archive("a_commissions", "csv", &["ATMActivityReport"])).unwrap();

        for _ in 0..3 {
            let chosen = registry
                .first_match("ATMActivityReportforcommissions_2024-08-04.csv")
                .unwrap();
            assert_eq!(chosen.name(), "a_commissions");
        }
        assert!(registry.first_match("unrelated.csv").is_none());
    }

    #[test]
    fn duplicate_and_unusable_handlers_are_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(archive("one", "csv", &["x"])).unwrap();

        assert!(matches!(
            registry.register(archive("one", "csv", &["y"])),
            Err(LoadError::Duplicate(_))
        ));
        assert!(matches!(
            registry.register(archive("two", "csv", &[])),
            Err(LoadError::Invalid { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn discover_skips_broken_definitions() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(
            dir.join("20_deposits.toml"),
            "name = \"deposits\"\nextension = \"csv\"\nsubstrings = [\"Deposits\"]\n",
        )
        .unwrap();
        fs::write(
            dir.join("10_atm.toml"),
            "name = \"atm\"\nextension = \"csv\"\nsubstrings = [\"ATMActivity\"]\n",
        )
        .unwrap();
        fs::write(dir.join("30_broken.toml"), "name = ").unwrap();
        fs::write(
            dir.join("40_nocmd.toml"),
            "name = \"nocmd\"\nkind = \"command\"\nextension = \"csv\"\nsubstrings = [\"N\"]\n",
        )
        .unwrap();
        fs::write(dir.join("README.md"), "not a definition").unwrap();

        let archive_root = dir.join("archive");
        let (registry, errors) = HandlerRegistry::discover(dir, |def| create_handler(def, &archive_root)).unwrap();

        assert_eq!(registry.names(), vec!["atm", "deposits"]);
        assert_eq!(errors.len(), 2);
        assert!(registry.ensure_not_empty().is_ok());
    }

    #[test]
    fn empty_directory_yields_empty_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, errors) =
            HandlerRegistry::discover(tmp.path(), |def| create_handler(def, Path::new("archive"))).unwrap();

        assert!(errors.is_empty());
        assert!(matches!(registry.ensure_not_empty(), Err(LoadError::EmptyRegistry)));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = HandlerRegistry::discover(&tmp.path().join("nope"), |def| {
            create_handler(def, Path::new("archive"))
        });
        assert!(matches!(result, Err(LoadError::Directory { .. })));
    }
}
