//! Driving the external judge.
//!
//! The judge is a containerized command: it takes `task.tar` on stdin and
//! writes `correction.tgz` to stdout. The authoritative verdict lives in
//! `correction.yml` inside that archive; older judge images only announce it
//! with a marker line on stderr, which is kept as a fallback. The field and
//! marker spell `veredict` — that spelling is part of the wire format.

use std::{
    fs::{self, File},
    path::Path,
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;

use crate::{archive, submission};

pub const CORRECTION_FILE: &str = "correction.tgz";
pub const STDERR_FILE: &str = "submit.stderr.txt";

const VERDICT_MARKER_PATTERN: &str = r"<<<< end with veredict (.*) >>>>";

#[derive(Debug, Deserialize)]
struct CorrectionFile {
    #[serde(rename = "veredict")]
    verdict: Option<String>,
}

/// Submit the `task.tar` in `work_dir` to the judge and return the verdict.
///
/// Runs `<runner> <image> <task_name>`, captures stdout into
/// `correction.tgz` and stderr into [`STDERR_FILE`]. The run fails only when
/// no verdict can be extracted from either source.
pub fn submit_task(runner: &str, image: &str, task_name: &str, work_dir: &Path) -> Result<String> {
    let task_tar = work_dir.join(submission::TASK_FILE);
    if !task_tar.exists() {
        bail!("no {} in {}", submission::TASK_FILE, work_dir.display());
    }
    let correction_tgz = work_dir.join(CORRECTION_FILE);

    let task_file = File::open(&task_tar)
        .with_context(|| format!("failed to open {}", task_tar.display()))?;
    let correction_file = File::create(&correction_tgz)
        .with_context(|| format!("failed to create {}", correction_tgz.display()))?;

    let child = Command::new(runner)
        .arg(image)
        .arg(task_name)
        .current_dir(work_dir)
        .stdin(Stdio::from(task_file))
        .stdout(Stdio::from(correction_file))
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run judge runner {runner}"))?;
    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for judge runner {runner}"))?;

    let stderr_text = String::from_utf8_lossy(&output.stderr).into_owned();
    fs::write(work_dir.join(STDERR_FILE), &stderr_text)
        .with_context(|| format!("failed to write {STDERR_FILE}"))?;

    if let Some(verdict) = verdict_from_correction(&correction_tgz, work_dir)? {
        return Ok(verdict);
    }
    if let Some(verdict) = verdict_from_marker(&stderr_text)? {
        return Ok(verdict);
    }
    bail!(
        "judge produced no verdict (exit {:?}); stderr tail: {}",
        output.status.code(),
        stderr_tail(&stderr_text)
    );
}

/// Unpack `correction.tgz` and read the verdict from `correction.yml`.
/// An unreadable archive or a correction without a verdict yields `None`
/// so the caller can fall back to the stderr marker.
fn verdict_from_correction(correction_tgz: &Path, work_dir: &Path) -> Result<Option<String>> {
    let correction_dir = work_dir.join("correction");
    if archive::extract_tar_gz(correction_tgz, &correction_dir).is_err() {
        return Ok(None);
    }
    let correction_yml = correction_dir.join("correction.yml");
    let Ok(text) = fs::read_to_string(&correction_yml) else {
        return Ok(None);
    };
    let correction: CorrectionFile = match serde_yaml::from_str(&text) {
        Ok(correction) => correction,
        Err(_) => return Ok(None),
    };
    Ok(correction.verdict)
}

/// Scan judge output for the verdict marker line.
pub fn verdict_from_marker(output: &str) -> Result<Option<String>> {
    let pattern =
        Regex::new(VERDICT_MARKER_PATTERN).context("invalid verdict marker pattern")?;
    Ok(pattern
        .captures(output)
        .map(|captures| captures[1].to_string()))
}

fn stderr_tail(stderr: &str) -> String {
    const TAIL_LINES: usize = 10;
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_runner(dir: &Path, body: &str) -> String {
        let path = dir.join("stub-runner.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn work_dir_with_task(root: &Path) -> std::path::PathBuf {
        let work_dir = root.join("work");
        fs::create_dir_all(&work_dir).unwrap();
        fs::write(work_dir.join(submission::TASK_FILE), b"ignored by stub").unwrap();
        work_dir
    }

    #[test]
    fn verdict_comes_from_the_correction_archive() {
        let dir = TempDir::new().unwrap();
        let correction = dir.path().join("prebuilt-correction.tgz");
        archive::create_tar_gz(
            &correction,
            &[("correction.yml".to_string(), b"veredict: WA\n".to_vec())],
        )
        .unwrap();

        // marker disagrees on purpose: the archive wins
        let runner = write_runner(
            dir.path(),
            &format!(
                "cat > /dev/null\ncat \"{}\"\necho '<<<< end with veredict EE >>>>' >&2",
                correction.display()
            ),
        );
        let work_dir = work_dir_with_task(dir.path());

        let verdict = submit_task(&runner, "cpp", "fork", &work_dir).unwrap();
        assert_eq!(verdict, "WA");
        assert!(work_dir.join(STDERR_FILE).exists());
    }

    #[test]
    fn marker_is_the_fallback_when_the_archive_is_useless() {
        let dir = TempDir::new().unwrap();
        let runner = write_runner(
            dir.path(),
            "cat > /dev/null\necho '<<<< end with veredict AC >>>>' >&2",
        );
        let work_dir = work_dir_with_task(dir.path());

        let verdict = submit_task(&runner, "cpp", "hello", &work_dir).unwrap();
        assert_eq!(verdict, "AC");
    }

    #[test]
    fn silent_judge_is_an_error_with_the_stderr_tail() {
        let dir = TempDir::new().unwrap();
        let runner = write_runner(
            dir.path(),
            "cat > /dev/null\necho 'image not found' >&2\nexit 3",
        );
        let work_dir = work_dir_with_task(dir.path());

        let err = submit_task(&runner, "cpp", "hello", &work_dir).unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("no verdict"), "got: {message}");
        assert!(message.contains("image not found"), "got: {message}");
    }

    #[test]
    fn missing_runner_fails_to_spawn() {
        let dir = TempDir::new().unwrap();
        let work_dir = work_dir_with_task(dir.path());
        assert!(submit_task("/nonexistent/jutge-run", "cpp", "hello", &work_dir).is_err());
    }

    #[test]
    fn marker_scan_finds_the_first_verdict() {
        let output = "compiling\n<<<< end with veredict IE >>>>\n";
        assert_eq!(
            verdict_from_marker(output).unwrap(),
            Some("IE".to_string())
        );
        assert_eq!(verdict_from_marker("no marker here").unwrap(), None);
    }
}
