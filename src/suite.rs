//! Running a fixture suite against the judge.
//!
//! A run builds the suite's part archives once, submits every fixture of
//! every language, and compares the judge's verdict with the one encoded in
//! the fixture filename. Work directories of failing cases are kept for
//! inspection; passing ones are cleaned up.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::{
    fixtures::{self, TestCase},
    judge,
    settings::Settings,
    submission,
};

#[derive(Debug, Deserialize)]
pub struct SuiteManifest {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Judge image the suite runs under. Required to run.
    pub image: Option<String>,
    /// Task name handed to the judge; defaults to the suite directory name.
    pub task_name: Option<String>,
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
}

impl Default for SuiteManifest {
    fn default() -> Self {
        SuiteManifest {
            name: None,
            description: None,
            image: None,
            task_name: None,
            default_timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    600
}

#[derive(Debug, Serialize)]
struct CaseDetail {
    language: String,
    case: String,
    expected: String,
    reported: Option<String>,
    status: String,
    duration_ms: u128,
    allow_failure: bool,
    log_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    suite: String,
    image: String,
    description: Option<String>,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
    total: usize,
    passed: usize,
    failed: usize,
    soft_failed: usize,
    log_file: PathBuf,
    error_log: Option<PathBuf>,
    case_logs_root: PathBuf,
    cases: Vec<CaseDetail>,
}

#[derive(Debug)]
enum CaseStatus {
    Passed,
    Failed,
    SoftFailed,
}

impl CaseStatus {
    fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Passed => "passed",
            CaseStatus::Failed => "failed",
            CaseStatus::SoftFailed => "soft_failed",
        }
    }
}

/// Load `suite.toml` from a suite directory. A missing manifest yields the
/// defaults; the image check happens at run time.
pub fn load_manifest(suite_dir: &Path) -> Result<SuiteManifest> {
    let path = suite_dir.join("suite.toml");
    if !path.exists() {
        return Ok(SuiteManifest::default());
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse manifest {}", path.display()))
}

/// Run every fixture of a suite and write logs plus a JSON summary under
/// `runs/<suite>/`. Fails when any non-soft case fails.
pub fn run_suite(suite_name: &str, workspace: &Path, settings: &Settings) -> Result<()> {
    let suite_dir = workspace.join(&settings.dirs.tests).join(suite_name);
    if !suite_dir.is_dir() {
        bail!("no suite directory at {}", suite_dir.display());
    }

    let manifest = load_manifest(&suite_dir)?;
    let Some(image) = manifest.image.clone() else {
        bail!(
            "no image name found in {}",
            suite_dir.join("suite.toml").display()
        );
    };
    let task_name = manifest
        .task_name
        .clone()
        .unwrap_or_else(|| suite_name.to_string());
    let suite_label = manifest
        .name
        .clone()
        .unwrap_or_else(|| suite_name.to_string());

    let mut cases = Vec::new();
    for langdir in fixtures::language_dirs(&suite_dir)? {
        let language = fixtures::language_name(&langdir);
        for case in fixtures::cases_in_dir(&langdir)? {
            cases.push((language.clone(), case));
        }
    }
    if cases.is_empty() {
        bail!(
            "suite {suite_label} has no cases - add fixture programs under {}",
            suite_dir.join("languages").display()
        );
    }

    let runs_root = workspace.join("runs").join(suite_name);
    let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let run_dir = runs_root.join(&timestamp);
    let case_logs_root = run_dir.join("cases");
    fs::create_dir_all(&case_logs_root)?;
    let run_log_path = run_dir.join("suite.log");
    let mut run_log = File::create(&run_log_path)?;
    let start = Local::now();

    writeln!(
        run_log,
        "[suite] {} ({}) - {}",
        suite_label,
        image,
        manifest
            .description
            .as_deref()
            .unwrap_or("no description provided")
    )?;
    writeln!(
        run_log,
        "[suite] timeout budget: {}s per case",
        manifest.default_timeout_secs
    )?;
    println!("{} ({} cases)", suite_label.bold(), cases.len());

    submission::make_part_archives(&suite_dir)?;
    let outcome = run_cases(
        &cases,
        &suite_dir,
        &image,
        &task_name,
        settings,
        workspace,
        &run_dir,
        &case_logs_root,
        &mut run_log,
    );
    submission::remove_part_archives(&suite_dir);
    let case_details = outcome?;

    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut soft_failed = 0usize;
    for detail in &case_details {
        match detail.status.as_str() {
            "passed" => passed += 1,
            "soft_failed" => soft_failed += 1,
            _ => failed += 1,
        }
    }

    let end = Local::now();
    let error_log_path = run_dir.join("error.log");
    let mut error_log = None;
    if failed > 0 {
        let message = format!(
            "{} cases failed. See {} for details.",
            failed,
            rel_path(&run_log_path, workspace).display()
        );
        fs::write(&error_log_path, message)?;
        error_log = Some(rel_path(&error_log_path, workspace));
    }

    let summary = RunSummary {
        suite: suite_label.clone(),
        image,
        description: manifest.description.clone(),
        started_at: start,
        finished_at: end,
        total: case_details.len(),
        passed,
        failed,
        soft_failed,
        log_file: rel_path(&run_log_path, workspace),
        error_log,
        case_logs_root: rel_path(&case_logs_root, workspace),
        cases: case_details,
    };
    let summary_path = runs_root.join("last_run.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;

    println!(
        "{} completed: {}/{} passed ({} soft failures). Log: {}",
        suite_label,
        passed,
        summary.total,
        soft_failed,
        summary.log_file.display()
    );

    if failed > 0 {
        bail!("{suite_label} failed. Consult {}", summary.log_file.display());
    }
    Ok(())
}

fn run_cases(
    cases: &[(String, TestCase)],
    suite_dir: &Path,
    image: &str,
    task_name: &str,
    settings: &Settings,
    workspace: &Path,
    run_dir: &Path,
    case_logs_root: &Path,
    run_log: &mut File,
) -> Result<Vec<CaseDetail>> {
    let mut details = Vec::new();
    for (language, case) in cases {
        let slug = sanitize_case_name(&format!("{language}-{}", case.file_name));
        let case_log_path = case_logs_root.join(format!("{slug}.log"));
        let work_dir = run_dir.join(&slug);

        writeln!(
            run_log,
            "[case] starting {language}/{} -> {}",
            case.file_name,
            rel_path(&case_log_path, workspace).display()
        )?;
        let mut case_log = File::create(&case_log_path)?;
        writeln!(case_log, "[case] {language}/{}", case.file_name)?;
        writeln!(case_log, "[case] expected verdict: {}", case.expected)?;
        writeln!(
            case_log,
            "[case] command: {} {image} {task_name} < {}",
            settings.judge.runner,
            submission::TASK_FILE
        )?;

        let start = Instant::now();
        let submitted = submission::build_case_task(suite_dir, language, &case.path, &work_dir)
            .and_then(|()| {
                judge::submit_task(&settings.judge.runner, image, task_name, &work_dir)
            });
        let duration_ms = start.elapsed().as_millis();

        let (status, reported) = match submitted {
            Ok(verdict) => {
                writeln!(case_log, "[case] reported verdict: {verdict}")?;
                if verdict == case.expected {
                    (CaseStatus::Passed, Some(verdict))
                } else if case.allow_failure {
                    (CaseStatus::SoftFailed, Some(verdict))
                } else {
                    (CaseStatus::Failed, Some(verdict))
                }
            }
            Err(err) => {
                writeln!(case_log, "[case] error: {err:#}")?;
                let status = if case.allow_failure {
                    CaseStatus::SoftFailed
                } else {
                    CaseStatus::Failed
                };
                (status, None)
            }
        };
        writeln!(
            run_log,
            "[case] {language}/{} finished in {duration_ms} ms ({})",
            case.file_name,
            status.as_str()
        )?;
        print_case_line(language, case, &status, reported.as_deref(), duration_ms);

        if matches!(status, CaseStatus::Passed) {
            // keep directories for failed cases only
            let _ = fs::remove_dir_all(&work_dir);
        }

        details.push(CaseDetail {
            language: language.clone(),
            case: case.file_name.clone(),
            expected: case.expected.clone(),
            reported,
            status: status.as_str().to_string(),
            duration_ms,
            allow_failure: case.allow_failure,
            log_path: rel_path(&case_log_path, workspace),
        });
    }
    Ok(details)
}

fn print_case_line(
    language: &str,
    case: &TestCase,
    status: &CaseStatus,
    reported: Option<&str>,
    duration_ms: u128,
) {
    let verdict = reported.unwrap_or("-");
    let line = format!(
        "  {language}/{} expected {} got {verdict} ({duration_ms} ms)",
        case.file_name, case.expected
    );
    match status {
        CaseStatus::Passed => println!("{} {line}", "ok".green()),
        CaseStatus::SoftFailed => println!("{} {line}", "soft".yellow()),
        CaseStatus::Failed => println!("{} {line}", "FAIL".red()),
    }
}

fn rel_path(path: &Path, workspace: &Path) -> PathBuf {
    path.strip_prefix(workspace).unwrap_or(path).to_path_buf()
}

fn sanitize_case_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}
