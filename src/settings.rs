//! Layered harness settings.
//!
//! Effective settings are merged from, lowest to highest precedence:
//! built-in defaults, `~/.jutge.yml`, `./jutge.yml`, and `JUTGE_`-prefixed
//! environment variables. In variable names a single `_` separates hierarchy
//! levels and a double `__` stands for a literal underscore, so
//! `JUTGE_QUEUE_BASEURL` maps to `queue.baseurl`.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

const ENV_PREFIX: &str = "JUTGE_";
const LOCAL_SETTINGS_FILE: &str = "jutge.yml";
const GLOBAL_SETTINGS_FILE: &str = ".jutge.yml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dirs: DirSettings,
    pub database: DatabaseSettings,
    pub queue: QueueSettings,
    pub judge: JudgeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirSettings {
    /// Data directory of the queue host, where task inputs and outputs land.
    pub dat: String,
    /// Directory with the fixture suites, relative to the workspace.
    pub tests: String,
    /// Directory with the judge drivers, relative to the workspace.
    pub drivers: String,
}

impl Default for DirSettings {
    fn default() -> Self {
        Self {
            dat: "/home/jutge/dat".into(),
            tests: "tests".into(),
            drivers: "drivers".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// The SQLite database file of the queue.
    pub file: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            file: "/home/jutge/queue/queue.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub baseurl: String,
    pub worker: WorkerSettings,
    pub username: String,
    pub password: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            baseurl: "http://localhost:8000/v1".into(),
            worker: WorkerSettings::default(),
            username: "admin".into(),
            password: "changeme".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub uri: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            uri: "localhost".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeSettings {
    /// Command that runs the judge image. Invoked as
    /// `<runner> <image> <task-name>` with `task.tar` on stdin.
    pub runner: String,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            runner: "jutge-run".into(),
        }
    }
}

/// Read the effective settings from the process environment, `./jutge.yml`
/// and `$HOME/.jutge.yml`.
pub fn read() -> Result<Settings> {
    let global = dirs::home_dir().map(|home| home.join(GLOBAL_SETTINGS_FILE));
    read_settings(
        std::env::vars(),
        Path::new(LOCAL_SETTINGS_FILE),
        global.as_deref(),
    )
}

/// Merge defaults, the global file, the local file and the environment, in
/// that order, and validate the result against the settings schema.
pub fn read_settings(
    env_vars: impl IntoIterator<Item = (String, String)>,
    local_path: &Path,
    global_path: Option<&Path>,
) -> Result<Settings> {
    let mut merged =
        serde_yaml::to_value(Settings::default()).context("failed to encode default settings")?;
    if let Some(global) = global_path {
        if let Some(value) = read_file_as_yaml(global) {
            merge(&mut merged, value);
        }
    }
    if let Some(value) = read_file_as_yaml(local_path) {
        merge(&mut merged, value);
    }
    merge(&mut merged, env_overlay(env_vars));
    serde_yaml::from_value(merged).context("invalid settings")
}

/// Parse a settings file, returning `None` when it is absent or malformed.
/// A malformed file is warned about and ignored, never fatal.
fn read_file_as_yaml(path: &Path) -> Option<Value> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_yaml::from_str(&text) {
        Ok(value) => {
            eprintln!("{}", format!("Using file '{}' for settings.", path.display()).dimmed());
            Some(value)
        }
        Err(err) => {
            eprintln!(
                "{}",
                format!(
                    "Warning: Syntax error in file '{}': {err}. Ignoring it.",
                    path.display()
                )
                .yellow()
            );
            None
        }
    }
}

/// Recursively merge `overlay` into `base`; scalars in `overlay` win.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}

/// Build a settings overlay from `JUTGE_`-prefixed environment variables.
fn env_overlay(env_vars: impl IntoIterator<Item = (String, String)>) -> Value {
    let mut root = Mapping::new();
    for (key, value) in env_vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path = stripped.replace('_', ".").replace("..", "_").to_lowercase();
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        insert_path(&mut root, &segments, convert(&value));
    }
    Value::Mapping(root)
}

fn insert_path(map: &mut Mapping, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    let key = Value::String((*head).to_string());
    if rest.is_empty() {
        map.insert(key, value);
        return;
    }
    let slot = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !slot.is_mapping() {
        *slot = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(child) = slot {
        insert_path(child, rest, value);
    }
}

/// `true`/`false` become booleans, numbers become numbers, everything else
/// stays a string.
fn convert(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(int) = raw.parse::<i64>() {
                Value::Number(int.into())
            } else if let Ok(float) = raw.parse::<f64>() {
                Value::Number(serde_yaml::Number::from(float))
            } else {
                Value::String(raw.to_string())
            }
        }
    }
}

/// Print the effective settings, passwords masked.
pub fn show(settings: &Settings) {
    println!("{}", "settings:".bold());
    match serde_yaml::to_value(settings) {
        Ok(value) => print_mapping("    ", &value),
        Err(err) => eprintln!("{}", format!("could not render settings: {err}").yellow()),
    }
}

fn print_mapping(prefix: &str, value: &Value) {
    let Value::Mapping(map) = value else {
        return;
    };
    for (key, val) in map {
        let key_str = key.as_str().unwrap_or("?");
        match val {
            Value::Mapping(_) => {
                println!("{prefix}{}:", key_str.yellow());
                print_mapping(&format!("{prefix}    "), val);
            }
            _ => {
                let rendered = if key_str == "password" {
                    "**********".dimmed().to_string()
                } else {
                    render_scalar(val)
                };
                println!("{prefix}{}: {rendered}", key_str.yellow());
            }
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{}{}{}", "\"".dimmed(), s.blue(), "\"".dimmed()),
        Value::Bool(true) => "true".green().to_string(),
        Value::Bool(false) => "false".red().to_string(),
        Value::Number(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let dir = TempDir::new().unwrap();
        let settings = read_settings(no_env(), &dir.path().join("jutge.yml"), None).unwrap();
        assert_eq!(settings.queue.baseurl, "http://localhost:8000/v1");
        assert_eq!(settings.queue.username, "admin");
        assert_eq!(settings.dirs.tests, "tests");
        assert_eq!(settings.judge.runner, "jutge-run");
    }

    #[test]
    fn local_file_overrides_global_file() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global.yml");
        let local = dir.path().join("local.yml");
        fs::write(&global, "queue:\n  username: global-user\n  password: g\n").unwrap();
        fs::write(&local, "queue:\n  username: local-user\n").unwrap();

        let settings = read_settings(no_env(), &local, Some(&global)).unwrap();
        assert_eq!(settings.queue.username, "local-user");
        // untouched keys from the lower layers survive the merge
        assert_eq!(settings.queue.password, "g");
        assert_eq!(settings.queue.baseurl, "http://localhost:8000/v1");
    }

    #[test]
    fn environment_wins_over_files() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local.yml");
        fs::write(&local, "judge:\n  runner: from-file\n").unwrap();

        let env = vec![
            ("JUTGE_JUDGE_RUNNER".to_string(), "/opt/stub".to_string()),
            ("JUTGE_QUEUE_WORKER_URI".to_string(), "worker-9".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ];
        let settings = read_settings(env, &local, None).unwrap();
        assert_eq!(settings.judge.runner, "/opt/stub");
        assert_eq!(settings.queue.worker.uri, "worker-9");
    }

    #[test]
    fn malformed_settings_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local.yml");
        fs::write(&local, "queue: [unterminated\n").unwrap();

        let settings = read_settings(no_env(), &local, None).unwrap();
        assert_eq!(settings.queue.baseurl, "http://localhost:8000/v1");
    }

    #[test]
    fn env_values_convert_to_their_natural_type() {
        let env = vec![("JUTGE_DIRS_DAT".to_string(), "/srv/dat".to_string())];
        let dir = TempDir::new().unwrap();
        let settings = read_settings(env, &dir.path().join("none.yml"), None).unwrap();
        assert_eq!(settings.dirs.dat, "/srv/dat");

        // a value that parses as a number no longer fits a string field
        let env = vec![("JUTGE_DIRS_DAT".to_string(), "42".to_string())];
        assert!(read_settings(env, &dir.path().join("none.yml"), None).is_err());
    }
}
