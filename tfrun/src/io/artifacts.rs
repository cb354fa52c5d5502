//! Plain-text artifact files collected for one invocation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::{Rng, distributions::Alphanumeric};

/// Short lowercase suffix keeping artifact names unique within a directory.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .filter(char::is_ascii_alphabetic)
        .take(8)
        .collect::<String>()
        .to_lowercase()
}

/// Write `contents` to `{dir}/{stem}-{suffix}.txt` and return the path.
pub fn write_artifact(dir: &Path, stem: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    let path = dir.join(format!("{stem}-{}.txt", random_suffix()));
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Atomically write a file (temp file + rename), creating parent directories.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Contents of an optional artifact, or `None` when it is absent, unreadable or blank.
pub fn read_non_blank(path: Option<&Path>) -> Option<String> {
    let contents = fs::read_to_string(path?).ok()?;
    (!contents.trim().is_empty()).then_some(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_lowercase_letters() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn write_artifact_uses_stem_and_suffix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_artifact(&temp.path().join("nested"), "plan-1-plan-execution-log", "log")
            .expect("write");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("plan-1-plan-execution-log-"));
        assert!(name.ends_with(".txt"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "log");
    }

    #[test]
    fn read_non_blank_skips_missing_and_blank_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blank = temp.path().join("blank.txt");
        fs::write(&blank, " \n").expect("write");
        assert_eq!(read_non_blank(Some(&blank)), None);
        assert_eq!(read_non_blank(Some(&temp.path().join("missing.txt"))), None);
        assert_eq!(read_non_blank(None), None);

        let report = temp.path().join("report.md");
        write_atomic(&report, "ok\n").expect("write");
        assert_eq!(read_non_blank(Some(&report)).as_deref(), Some("ok\n"));
    }
}
