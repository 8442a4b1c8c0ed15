//! Client side of the task queue.
//!
//! The queue itself is an external service; this module covers what the
//! queue tests need from it: a liveness ping, submitting a task tar over
//! HTTP, and direct access to the queue's SQLite `workers` table to stage a
//! worker and watch its assignment change.

use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, multipart};
use rusqlite::Connection;
use serde::Deserialize;

use crate::settings::Settings;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The queue's answer to an accepted task.
#[derive(Debug, Deserialize)]
pub struct TaskReceipt {
    pub id: i64,
    pub name: String,
}

pub struct QueueClient {
    base_url: String,
    username: String,
    password: String,
    http: Client,
}

impl QueueClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            http: Client::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.queue.baseurl,
            &settings.queue.username,
            &settings.queue.password,
        )
    }

    /// Check that the queue answers its ping endpoint.
    pub fn ping(&self) -> Result<()> {
        let url = format!("{}/misc/ping", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("the queue at {url} is not reachable"))?;
        if !response.status().is_success() {
            bail!(
                "the queue at {} is not responding (status {})",
                self.base_url,
                response.status()
            );
        }
        Ok(())
    }

    /// Upload a task tar. The queue answers with the task id it assigned.
    pub fn send_task(&self, name: &str, image_id: &str, file: &Path) -> Result<TaskReceipt> {
        let form = multipart::Form::new()
            .text("name", name.to_string())
            .text("image_id", image_id.to_string())
            .file("file", file)
            .with_context(|| format!("failed to attach task file {}", file.display()))?;
        let response = self
            .http
            .put(format!("{}/tasks", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .multipart(form)
            .send()
            .with_context(|| format!("failed to send task {name} to the queue"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("the queue rejected task {name}: {status} {body}");
        }
        response
            .json::<TaskReceipt>()
            .with_context(|| format!("could not decode the queue's answer for task {name}"))
    }
}

/// Clear the `workers` table and register a single enabled worker with no
/// task assigned.
pub fn reset_workers(db_file: &Path, name: &str, ssh_uri: &str) -> Result<()> {
    let conn = open_db(db_file)?;
    conn.execute("DELETE FROM workers", [])
        .context("failed to clear the workers table")?;
    conn.execute(
        "INSERT INTO workers (id, name, ssh_uri, enabled, task_id) VALUES (1, ?1, ?2, 1, NULL)",
        rusqlite::params![name, ssh_uri],
    )
    .context("failed to register the worker")?;
    Ok(())
}

/// The task currently assigned to a worker, if any.
pub fn worker_task_id(db_file: &Path, name: &str) -> Result<Option<i64>> {
    let conn = open_db(db_file)?;
    conn.query_row(
        "SELECT task_id FROM workers WHERE name = ?1",
        [name],
        |row| row.get(0),
    )
    .with_context(|| format!("no worker named {name} in {}", db_file.display()))
}

/// Poll the workers table until the assignment of `name` changes, returning
/// the new assignment. Errors when it stays put for the whole timeout.
pub fn wait_worker_task_change(
    db_file: &Path,
    name: &str,
    timeout: Duration,
) -> Result<Option<i64>> {
    let initial = worker_task_id(db_file, name)?;
    let deadline = Instant::now() + timeout;
    loop {
        thread::sleep(POLL_INTERVAL.min(timeout));
        let current = worker_task_id(db_file, name)?;
        if current != initial {
            return Ok(current);
        }
        if Instant::now() >= deadline {
            bail!("worker {name} kept task {initial:?} for {timeout:?}");
        }
    }
}

/// Poll until a file appears, erroring on timeout. Used for the queue's
/// `<dat>/tasks/<id>.output.tar.gz` products.
pub fn wait_for_file(path: &Path, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if path.exists() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("file {} did not appear within {timeout:?}", path.display());
        }
        thread::sleep(POLL_INTERVAL.min(timeout));
    }
}

fn open_db(db_file: &Path) -> Result<Connection> {
    Connection::open(db_file)
        .with_context(|| format!("failed to open queue database {}", db_file.display()))
}
