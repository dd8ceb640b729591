use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Split a file name into stem and extension at the last dot.
///
/// Unlike `Path::extension`, a leading-dot name such as `.DS_Store` yields the
/// extension `DS_Store`, so it can be matched against the ignore list.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Lowercased extension of a file name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    split_name(name).1.map(|e| e.to_ascii_lowercase())
}

/// `HHMMSSmmm` of the given instant.
pub fn timestamp_suffix(now: DateTime<Local>) -> String {
    now.format("%H%M%S%3f").to_string()
}

/// Insert `_<suffix>` between stem and extension.
pub fn suffixed_name(name: &str, suffix: &str) -> String {
    match split_name(name) {
        (stem, Some(ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, suffix, ext),
        _ => format!("{}_{}", name, suffix),
    }
}

/// Produce a name derived from `name` for which `is_taken` returns false.
///
/// The first candidate carries a timestamp suffix; if that is taken too (two
/// renames inside the same millisecond) a counter is appended to it.
pub fn unique_name<F>(name: &str, now: DateTime<Local>, is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let stamp = timestamp_suffix(now);
    let mut candidate = suffixed_name(name, &stamp);
    let mut n: u32 = 1;
    while is_taken(&candidate) {
        candidate = suffixed_name(name, &format!("{}-{}", stamp, n));
        n += 1;
    }
    candidate
}

/// Move a file without ever replacing an existing target.
///
/// Falls back to copy + remove when a plain rename is not possible (for
/// example across filesystems).
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("refusing to overwrite {}", to.display()),
        ));
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.is_file() {
                return Err(rename_err);
            }
            fs::copy(from, to).map_err(|_| rename_err)?;
            fs::remove_file(from)
        }
    }
}

/// Move `from` into `dir` under its own name, or a unique variant of it when
/// the name is already used there. Returns the final path.
pub fn move_into_dir(from: &Path, dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = from
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable file name: {}", from.display()),
            )
        })?;

    let mut target = dir.join(name);
    if target.exists() {
        let unique = unique_name(name, Local::now(), |candidate| dir.join(candidate).exists());
        target = dir.join(unique);
    }
    move_file(from, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 8, 4, 13, 5, 9).unwrap()
    }

    #[test]
    fn split_handles_dotfiles_and_multiple_dots() {
        assert_eq!(split_name("report.2024.csv"), ("report.2024", Some("csv")));
        assert_eq!(split_name(".DS_Store"), ("", Some("DS_Store")));
        assert_eq!(split_name("README"), ("README", None));
        assert_eq!(split_name("trailing."), ("trailing.", None));
        assert_eq!(extension_of("Report.CSV").as_deref(), Some("csv"));
    }

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(suffixed_name("report.csv", "130509000"), "report_130509000.csv");
        assert_eq!(suffixed_name("README", "1"), "README_1");
    }

    #[test]
    fn unique_name_skips_taken_candidates() {
        let taken: HashSet<String> = ["report_130509000.csv", "report_130509000-1.csv"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let name = unique_name("report.csv", fixed_time(), |c| taken.contains(c));
        assert_eq!(name, "report_130509000-2.csv");
    }

    #[test]
    fn move_into_dir_never_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("archive");
        fs::create_dir_all(&archive).unwrap();
        fs::write(archive.join("a.csv"), "old").unwrap();

        let incoming = tmp.path().join("a.csv");
        fs::write(&incoming, "new").unwrap();

        let target = move_into_dir(&incoming, &archive).unwrap();
        assert_ne!(target, archive.join("a.csv"));
        assert!(!incoming.exists());
        assert_eq!(fs::read_to_string(archive.join("a.csv")).unwrap(), "old");
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn move_file_refuses_existing_target() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.csv");
        let b = tmp.path().join("b.csv");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let err = move_file(&a, &b).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&b).unwrap(), "b");
    }
}
