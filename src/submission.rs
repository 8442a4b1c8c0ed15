//! Packaging submissions into the judge's task format.
//!
//! A task is a plain tar with exactly three members: `driver.tgz`,
//! `problem.tgz` and `submission.tgz`. The submission archive holds the
//! program under the name `program` with its original extension, plus a
//! `submission.yml` naming the compiler id.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::archive;

pub const TASK_FILE: &str = "task.tar";
const TASK_MEMBERS: &[&str] = &["driver.tgz", "problem.tgz", "submission.tgz"];

#[derive(Serialize)]
struct SubmissionDetails<'a> {
    compiler_id: &'a str,
}

/// Build `driver.tgz` and `problem.tgz` inside the suite directory from its
/// `driver/` and `problem/` subdirectories.
pub fn make_part_archives(suite_dir: &Path) -> Result<()> {
    for part in ["driver", "problem"] {
        let source = suite_dir.join(part);
        if !source.is_dir() {
            bail!(
                "suite {} is missing its {part} directory",
                suite_dir.display()
            );
        }
        archive::create_tar_gz_from_dir(&source, &suite_dir.join(format!("{part}.tgz")))?;
    }
    Ok(())
}

/// Remove the part archives created by [`make_part_archives`]; missing files
/// are not an error.
pub fn remove_part_archives(suite_dir: &Path) {
    for part in ["driver.tgz", "problem.tgz"] {
        let _ = fs::remove_file(suite_dir.join(part));
    }
}

/// The entry name a program gets inside `submission.tgz`: `program` with the
/// original extension preserved.
fn program_entry_name(program_path: &Path) -> String {
    match program_path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("program.{ext}"),
        None => "program".to_string(),
    }
}

/// In-memory contents of `submission.tgz` for a program and compiler id.
fn submission_files(program_path: &Path, compiler_id: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let program = fs::read(program_path)
        .with_context(|| format!("failed to read program {}", program_path.display()))?;
    let details = serde_yaml::to_string(&SubmissionDetails { compiler_id })
        .context("failed to encode submission.yml")?;
    Ok(vec![
        (program_entry_name(program_path), program),
        ("submission.yml".to_string(), details.into_bytes()),
    ])
}

/// Assemble `task.tar` for one fixture in `work_dir`: the suite's pre-built
/// `driver.tgz`/`problem.tgz` plus a fresh `submission.tgz` for the program.
pub fn build_case_task(
    suite_dir: &Path,
    compiler_id: &str,
    program_path: &Path,
    work_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(work_dir)
        .with_context(|| format!("failed to create work directory {}", work_dir.display()))?;
    for part in ["driver.tgz", "problem.tgz"] {
        fs::copy(suite_dir.join(part), work_dir.join(part)).with_context(|| {
            format!("failed to copy {part} from suite {}", suite_dir.display())
        })?;
    }
    archive::create_tar_gz(
        &work_dir.join("submission.tgz"),
        &submission_files(program_path, compiler_id)?,
    )?;
    archive::create_tar(&work_dir.join(TASK_FILE), work_dir, TASK_MEMBERS)?;
    Ok(())
}

/// Locate the accepted (`AC.*`) fixture of a language directory.
pub fn find_accepted_program(suite_dir: &Path, language: &str) -> Result<PathBuf> {
    let langdir = suite_dir.join("languages").join(language);
    let entries = fs::read_dir(&langdir)
        .with_context(|| format!("failed to read language directory {}", langdir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && name.starts_with("AC.") {
            return Ok(entry.path());
        }
    }
    bail!(
        "no accepted program found for {} in {language}",
        suite_dir.display()
    );
}

/// Build a standalone `submission.tar` for a suite/language pair, ready to
/// be sent to the queue. The driver payload comes from
/// `<drivers>/<driver>/<driver>/`.
pub fn pack_submission_tar(
    tests_dir: &Path,
    drivers_dir: &Path,
    suite: &str,
    language: &str,
    driver: &str,
    output: &Path,
) -> Result<()> {
    let suite_dir = tests_dir.join(suite);
    let program = find_accepted_program(&suite_dir, language)?;
    let driver_dir = drivers_dir.join(driver).join(driver);
    if !driver_dir.is_dir() {
        bail!("no driver payload at {}", driver_dir.display());
    }

    let scratch = tempfile::tempdir().context("failed to create scratch directory")?;
    archive::create_tar_gz_from_dir(&suite_dir.join("problem"), &scratch.path().join("problem.tgz"))?;
    archive::create_tar_gz_from_dir(&driver_dir, &scratch.path().join("driver.tgz"))?;
    archive::create_tar_gz(
        &scratch.path().join("submission.tgz"),
        &submission_files(&program, language)?,
    )?;
    archive::create_tar(
        output,
        scratch.path(),
        &["problem.tgz", "driver.tgz", "submission.tgz"],
    )?;
    Ok(())
}
