//! Armature CLI entry point.
//!
//! Thin front-end over the library: queries go through the privileged
//! helper, profile listings read the policy directories directly, and
//! `logs` drives the batched ingestion pipeline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use armature::caller::{Checkpoint, CommandCaller};
use armature::config::Config;
use armature::logs::{IngestPipeline, LogReader, LogRecord, LogSink, LogStore, StatusDisplay};
use armature::profile::{apply_live_modes, ProfileMode};
use armature::status::{parse_unconfined, StatusReport};

/// Armature: inspect and manage AppArmor confinement.
#[derive(Parser)]
#[command(name = "armature", version, about)]
struct Cli {
    /// Config file (default: `$ARMATURE_CONFIG` or `~/.config/armature/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Also write JSON logs to this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Show loaded profiles and confined processes.
    Status,
    /// List running processes and their confinement.
    Unconfined,
    /// Print audit log entries.
    Logs {
        /// Ingest a `journalctl -o json` export instead of querying the helper.
        #[arg(long)]
        journal: Option<PathBuf>,
        /// Only fetch entries newer than this checkpoint.
        #[arg(long)]
        since: Option<String>,
    },
    /// List profiles found in the policy directories.
    Profiles,
    /// List available abstractions.
    Abstractions,
    /// Print the file path of a profile.
    Locate {
        /// Profile file name.
        name: String,
    },
    /// Switch a profile between enforce, complain and disable.
    SetMode {
        /// Profile name.
        profile: String,
        /// Current mode.
        old: ProfileMode,
        /// Requested mode.
        new: ProfileMode,
    },
    /// Load a profile file in enforce mode.
    Load {
        /// Profile file.
        path: PathBuf,
    },
    /// Disable a profile.
    Disable {
        /// Profile name.
        name: String,
    },
}

/// Reports ingestion progress on stderr through tracing.
struct ProgressLog;

impl StatusDisplay for ProgressLog {
    fn set_status_label(&mut self, visible: usize, suffix: &str) {
        info!(visible, "{visible} {suffix}");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _logging_guard = match &cli.log_dir {
        Some(dir) => Some(armature::logging::init_production(dir)?),
        None => {
            armature::logging::init_cli();
            None
        }
    };

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    debug!(helper = %config.helper.program, "configuration loaded");

    let caller = CommandCaller::new(config.helper.command())
        .with_profile_dirs(config.paths.profile_dirs.clone())
        .with_abstractions_dir(config.paths.abstractions_dir.clone());

    match cli.command {
        Command::Status => handle_status(&caller).await,
        Command::Unconfined => handle_unconfined(&caller).await,
        Command::Logs { journal, since } => match journal {
            Some(path) => handle_journal(&path, config.ingest.batch_size).await,
            None => handle_logs(caller, &config, since).await,
        },
        Command::Profiles => handle_profiles(&caller).await,
        Command::Abstractions => {
            for name in caller.get_abstractions() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Locate { name } => {
            let path = caller.locate_profile(&name)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::SetMode { profile, old, new } => {
            print_output(&caller.execute_change(&profile, old, new).await?);
            Ok(())
        }
        Command::Load { path } => {
            print_output(&caller.load_profile(&path).await?);
            Ok(())
        }
        Command::Disable { name } => {
            print_output(&caller.disable_profile(&name).await?);
            Ok(())
        }
    }
}

async fn handle_status(caller: &CommandCaller) -> anyhow::Result<()> {
    let output = caller.get_status().await;
    let Ok(report) = StatusReport::parse(&output) else {
        print_output(&output);
        return Ok(());
    };

    for (name, mode) in &report.profiles {
        println!("{mode}\t{name}");
    }
    for process in &report.processes {
        println!(
            "{}\t{}\t{}\t{}",
            process.pid, process.mode, process.profile, process.executable
        );
    }
    Ok(())
}

async fn handle_unconfined(caller: &CommandCaller) -> anyhow::Result<()> {
    let output = caller.get_unconfined().await;
    let entries = parse_unconfined(&output);
    if entries.is_empty() {
        print_output(&output);
        return Ok(());
    }
    for entry in entries {
        let profile = entry.profile.as_deref().unwrap_or("-");
        let mode = entry.mode.map_or("-", ProfileMode::as_str);
        println!("{}\t{mode}\t{profile}\t{}", entry.pid, entry.executable);
    }
    Ok(())
}

async fn handle_profiles(caller: &CommandCaller) -> anyhow::Result<()> {
    let mut profiles = caller.get_profiles();
    if let Ok(report) = StatusReport::parse(&caller.get_status().await) {
        apply_live_modes(&mut profiles, &report.profiles);
    }
    for (name, parsed) in &profiles {
        println!(
            "{}\t{name}\t{}",
            parsed.profile.mode,
            parsed.profile.path.display()
        );
    }
    Ok(())
}

async fn handle_logs(
    caller: CommandCaller,
    config: &Config,
    since: Option<String>,
) -> anyhow::Result<()> {
    let checkpoint = since.map_or_else(Checkpoint::empty, Checkpoint::new);
    let mut reader =
        LogReader::open(Arc::new(caller), &config.paths.log_sources).with_checkpoint(checkpoint);
    let records = reader.read_logs().await?;

    let mut store = LogStore::new();
    for record in records {
        store.put_row(record);
    }
    for record in store.visible_rows() {
        print_record(record);
    }
    if !reader.checkpoint().is_empty() {
        eprintln!("checkpoint: {}", reader.checkpoint());
    }
    Ok(())
}

async fn handle_journal(path: &Path, batch_size: usize) -> anyhow::Result<()> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut pipeline = IngestPipeline::new(LogStore::new(), ProgressLog).with_batch_size(batch_size);
    pipeline.submit(data);
    let batches = pipeline
        .run()
        .await
        .with_context(|| format!("failed to ingest {}", path.display()))?;
    debug!(batches, "journal ingested");

    for record in pipeline.sink().visible_rows() {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &LogRecord) {
    let time = record
        .time()
        .map_or_else(|| record.timestamp().to_string(), |t| t.to_rfc3339());
    println!(
        "{time}\t{}\t{}\t{}\t{}\t{}",
        record.kind(),
        record.pid(),
        record.operation(),
        record.subject(),
        record.status()
    );
}

fn print_output(output: &str) {
    if output.ends_with('\n') || output.is_empty() {
        print!("{output}");
    } else {
        println!("{output}");
    }
}
