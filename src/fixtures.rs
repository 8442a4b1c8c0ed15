//! Fixture discovery.
//!
//! A suite directory holds one subdirectory per compiler id under
//! `languages/`, and every program file in a language directory is one test
//! case whose expected verdict is encoded in its filename: the leading word
//! is the verdict, an optional `-note` qualifies it (`AC.cc` -> `AC`,
//! `EE-tle.java` -> `EE` with note `tle`).

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use regex::Regex;

const VERDICT_FILENAME_PATTERN: &str = r"^(\w+)(?:-(.*))?\..*$";

/// Marker note: a case whose filename note contains this word is reported
/// but does not fail the run.
const ALLOW_FAILURE_NOTE: &str = "allowfail";

/// Extensions of harness by-products that never count as fixture programs.
const SKIPPED_EXTENSIONS: &[&str] = &["tgz", "tar", "yml", "toml"];

/// A single fixture program scheduled for submission.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub file_name: String,
    pub path: PathBuf,
    pub expected: String,
    pub allow_failure: bool,
}

/// Extract the expected verdict and optional note from a fixture filename.
pub fn verdict_from_filename(filename: &str) -> Result<(String, Option<String>)> {
    let pattern = Regex::new(VERDICT_FILENAME_PATTERN)
        .context("invalid verdict filename pattern")?;
    let Some(captures) = pattern.captures(filename) else {
        bail!("could not extract verdict from filename: {filename}");
    };
    let verdict = captures[1].to_string();
    let note = captures.get(2).map(|m| m.as_str().to_string());
    Ok((verdict, note))
}

/// All fixture programs in a language directory.
///
/// Files starting with `_` and harness by-products are skipped, as are
/// subdirectories.
pub fn cases_in_dir(langdir: &Path) -> Result<Vec<TestCase>> {
    let mut cases = Vec::new();
    let entries = fs::read_dir(langdir)
        .with_context(|| format!("failed to read language directory {}", langdir.display()))?;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", langdir.display()))?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('_') || file_name.starts_with('.') {
            continue;
        }
        if let Some(ext) = Path::new(&file_name).extension().and_then(|e| e.to_str()) {
            if SKIPPED_EXTENSIONS.contains(&ext) {
                continue;
            }
        }
        let (expected, note) = verdict_from_filename(&file_name)?;
        let allow_failure = note.as_deref().is_some_and(|n| n.contains(ALLOW_FAILURE_NOTE));
        cases.push(TestCase {
            path: entry.path(),
            file_name,
            expected,
            allow_failure,
        });
    }
    cases.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(cases)
}

/// Compiler ids of a suite: the subdirectories of `languages/`, sorted.
pub fn language_dirs(suite_dir: &Path) -> Result<Vec<PathBuf>> {
    let languages_root = suite_dir.join("languages");
    if !languages_root.is_dir() {
        bail!(
            "suite {} has no languages directory",
            suite_dir.display()
        );
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(&languages_root)
        .with_context(|| format!("failed to read {}", languages_root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// The compiler id a language directory stands for (its directory name).
pub fn language_name(langdir: &Path) -> String {
    langdir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn verdict_is_the_leading_word() {
        assert_eq!(
            verdict_from_filename("AC.cc").unwrap(),
            ("AC".to_string(), None)
        );
        assert_eq!(
            verdict_from_filename("EE-tle.java").unwrap(),
            ("EE".to_string(), Some("tle".to_string()))
        );
        assert_eq!(
            verdict_from_filename("WA-off-by-one.py").unwrap(),
            ("WA".to_string(), Some("off-by-one".to_string()))
        );
    }

    #[test]
    fn filename_without_verdict_is_an_error() {
        assert!(verdict_from_filename("no_extension").is_err());
        assert!(verdict_from_filename(".hidden").is_err());
    }

    #[test]
    fn discovery_skips_underscored_files_and_by_products() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("AC.cc"), "").unwrap();
        fs::write(dir.path().join("EE-tle.cc"), "").unwrap();
        fs::write(dir.path().join("_helper.cc"), "").unwrap();
        fs::write(dir.path().join("driver.tgz"), "").unwrap();
        fs::write(dir.path().join("image.yml"), "").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let cases = cases_in_dir(dir.path()).unwrap();
        let names: Vec<_> = cases.iter().map(|c| c.file_name.as_str()).collect();
        assert_eq!(names, vec!["AC.cc", "EE-tle.cc"]);
        assert_eq!(cases[0].expected, "AC");
        assert_eq!(cases[1].expected, "EE");
        assert!(!cases[1].allow_failure);
    }

    #[test]
    fn allowfail_note_marks_soft_cases() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("EE-tle-allowfail.cc"), "").unwrap();
        let cases = cases_in_dir(dir.path()).unwrap();
        assert!(cases[0].allow_failure);
    }

    #[test]
    fn languages_are_the_subdirectories() {
        let dir = TempDir::new().unwrap();
        let suite = dir.path();
        fs::create_dir_all(suite.join("languages").join("G++")).unwrap();
        fs::create_dir_all(suite.join("languages").join("JDK")).unwrap();
        fs::write(suite.join("languages").join("notes.txt"), "").unwrap();

        let langs: Vec<_> = language_dirs(suite)
            .unwrap()
            .iter()
            .map(|d| language_name(d))
            .collect();
        assert_eq!(langs, vec!["G++", "JDK"]);
    }
}
