/// Defaults shared by the configuration layer and the CLI.
/// Every value here can be overridden from `dropwatch.toml`.

// Configuration file looked up when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "dropwatch.toml";

// Watched directory layout
pub const DEFAULT_WATCH_DIR: &str = "drop";
pub const QUARANTINE_DIR_NAME: &str = "quarantine";
pub const ARCHIVE_DIR_NAME: &str = "archive";
pub const SEEN_STORE_FILE_NAME: &str = ".dropwatch_seen.json";

// Handler definitions
pub const DEFAULT_HANDLERS_DIR: &str = "handlers";
pub const HANDLER_DEFINITION_EXTENSION: &str = "toml";

// Loop timing
pub const DEFAULT_POLL_DELAY_MS: u64 = 5_000;
pub const DEFAULT_DEDUPE_WINDOW_MS: u64 = 75;

// Logging
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const LOG_FILE_PREFIX: &str = "dropwatch.log";

/// Extensions written by browsers and download managers while a transfer is
/// still running.
pub fn default_in_progress_extensions() -> Vec<String> {
    ["part", "crdownload", "download", "partial", "tmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Artifacts that show up in drop folders but never carry business data.
pub fn default_ignored_extensions() -> Vec<String> {
    ["ini", "db", "ds_store", "lnk"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Normalize an extension for comparison: no leading dot, lowercase.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dot_and_case() {
        assert_eq!(normalize_extension(".CSV"), "csv");
        assert_eq!(normalize_extension("xlsx"), "xlsx");
        assert_eq!(normalize_extension(" .Part "), "part");
    }
}
