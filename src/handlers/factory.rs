use super::{ArchiveHandler, CommandHandler, Handler, MatchCriteria};
use crate::error::LoadError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Which built-in implementation a definition file asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    #[default]
    Archive,
    Command,
}

/// One `handlers/*.toml` file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: HandlerKind,
    pub extension: String,
    pub substrings: Vec<String>,
    /// Relative paths are resolved under the configured archive root
    pub archive_dir: Option<PathBuf>,
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl HandlerDefinition {
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path).map_err(|e| LoadError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn resolve_archive_dir(&self, archive_root: &Path) -> PathBuf {
        match &self.archive_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => archive_root.join(dir),
            None => archive_root.join(&self.name),
        }
    }

    fn invalid(&self, reason: &str) -> LoadError {
        LoadError::Invalid {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Factory function to create a handler from its definition.
pub fn create_handler(def: &HandlerDefinition, archive_root: &Path) -> Result<Box<dyn Handler>, LoadError> {
    if def.name.trim().is_empty() {
        return Err(def.invalid("name must not be empty"));
    }
    let criteria = MatchCriteria::new(&def.extension, def.substrings.iter().cloned());
    if !criteria.is_usable() {
        return Err(def.invalid("needs an extension and at least one non-empty substring"));
    }
    let archive_dir = def.resolve_archive_dir(archive_root);

    match def.kind {
        HandlerKind::Archive => {
            if def.program.is_some() {
                return Err(def.invalid("'program' is only valid for kind = \"command\""));
            }
            Ok(Box::new(ArchiveHandler::new(&def.name, criteria, archive_dir)))
        }
        HandlerKind::Command => {
            let program = match def.program.as_deref().map(str::trim) {
                Some(p) if !p.is_empty() => p.to_string(),
                _ => return Err(def.invalid("kind = \"command\" requires 'program'")),
            };
            let mut handler = CommandHandler::new(&def.name, criteria, program, def.args.clone(), archive_dir);
            if let Some(dir) = &def.working_dir {
                handler = handler.with_working_dir(dir);
            }
            Ok(Box::new(handler))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> HandlerDefinition {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn archive_definition_defaults_archive_dir_to_name() {
        let def = parse(
            r#"
            name = "atm_commissions"
            extension = ".csv"
            substrings = ["ATMActivityReportforcommissions"]
            "#,
        );
        assert_eq!(def.kind, HandlerKind::Archive);
        assert_eq!(def.resolve_archive_dir(Path::new("/srv/archive")), PathBuf::from("/srv/archive/atm_commissions"));

        let handler = create_handler(&def, Path::new("/srv/archive")).unwrap();
        assert_eq!(handler.name(), "atm_commissions");
        assert!(handler.matches("ATMActivityReportforcommissions_2024-08-04.csv"));
    }

    #[test]
    fn command_definition_requires_program() {
        let def = parse(
            r#"
            name = "payroll"
            kind = "command"
            extension = "xlsx"
            substrings = ["Payroll"]
            "#,
        );
        let err = create_handler(&def, Path::new("archive")).err().unwrap();
        assert!(matches!(err, LoadError::Invalid { .. }));
    }

    #[test]
    fn command_definition_builds() {
        let def = parse(
            r#"
            name = "payroll"
            kind = "command"
            extension = "xlsx"
            substrings = ["Payroll"]
            archive_dir = "/data/payroll"
            program = "python3"
            args = ["scripts/payroll.py"]
            "#,
        );
        let handler = create_handler(&def, Path::new("archive")).unwrap();
        assert_eq!(handler.describe_match_criteria(), "*.xlsx containing any of [Payroll]");
    }

    #[test]
    fn empty_substrings_are_rejected() {
        let def = parse(
            r#"
            name = "anything"
            extension = "csv"
            substrings = []
            "#,
        );
        assert!(create_handler(&def, Path::new("archive")).is_err());
    }

    #[test]
    fn unknown_fields_fail_to_parse() {
        let result: Result<HandlerDefinition, _> = toml::from_str(
            r#"
            name = "typo"
            extension = "csv"
            substring = ["x"]
            "#,
        );
        assert!(result.is_err());
    }
}
