use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jutge_harness::{queue::QueueClient, settings, submission, suite};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = settings::read()?;

    match cli.command {
        Command::Run { suite } => {
            let workspace = resolve_workspace(&cli.workspace)?;
            suite::run_suite(&suite, &workspace, &settings)
        }
        Command::Pack {
            suite,
            language,
            driver,
            output,
        } => {
            let workspace = resolve_workspace(&cli.workspace)?;
            submission::pack_submission_tar(
                &workspace.join(&settings.dirs.tests),
                &workspace.join(&settings.dirs.drivers),
                &suite,
                &language,
                &driver,
                &output,
            )?;
            println!("wrote {}", output.display());
            Ok(())
        }
        Command::Send { file, name, image } => {
            let client = QueueClient::from_settings(&settings);
            client.ping()?;
            let receipt = client.send_task(&name, &image, &file)?;
            println!("task {} accepted as #{}", receipt.name, receipt.id);
            Ok(())
        }
        Command::Settings => {
            settings::show(&settings);
            Ok(())
        }
    }
}

fn resolve_workspace(workspace: &PathBuf) -> Result<PathBuf> {
    fs::canonicalize(workspace)
        .with_context(|| format!("failed to resolve workspace {}", workspace.display()))
}

#[derive(Parser, Debug)]
#[command(
    name = "jutge-harness",
    version,
    about = "Rust harness for jutge judge test suites"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every fixture of a suite against the judge
    Run {
        /// Suite directory name under the tests directory
        suite: String,
    },
    /// Build a standalone submission.tar for a suite/language pair
    Pack {
        suite: String,
        language: String,
        #[arg(long, default_value = "std")]
        driver: String,
        #[arg(long, default_value = "submission.tar")]
        output: PathBuf,
    },
    /// Send a task tar to the queue
    Send {
        /// Tar file to submit, as produced by `pack`
        file: PathBuf,
        #[arg(long, default_value = "test-task")]
        name: String,
        #[arg(long, default_value = "cpp")]
        image: String,
    },
    /// Show the effective settings
    Settings,
}
