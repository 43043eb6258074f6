//! Noise Reducer Batch - command-line entry point
//!
//! Handles:
//! - Configuration loading and command-line overrides
//! - Application-level logging initialization
//! - Queueing files and draining the orchestrator's event channel
//! - Ctrl-C, which aborts the batch and removes its outputs
//! - Summary output and exit status

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use nrb_core::audio::IdentityTransform;
use nrb_core::config::{ConfigManager, ConfigSection};
use nrb_core::jobs::{display_name, JobSnapshot, JobStatus};
use nrb_core::logging::init_tracing_with_file;
use nrb_core::orchestrator::{JobEvent, JobOrchestrator};

mod cli;

use cli::Args;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config_manager = ConfigManager::new(&args.config);
    if let Err(e) = config_manager.load_or_create() {
        eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
    }
    args.apply_overrides(config_manager.settings_mut());

    let logs_dir = config_manager.logs_folder();
    let level = args.log_level(config_manager.settings().logging.level);
    let _log_guard = init_tracing_with_file(level, &logs_dir);

    tracing::info!("Noise Reducer starting");
    tracing::info!("Config: {}", args.config.display());
    tracing::info!("Core version: {}", nrb_core::version());

    if let Err(e) = config_manager.ensure_dirs_exist() {
        tracing::error!("Failed to create directories: {}", e);
        eprintln!("Warning: Failed to create directories: {}", e);
    }

    if args.save {
        save_overrides(&mut config_manager)?;
        tracing::info!("Saved overrides to {}", args.config.display());
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            tracing::warn!("Interrupt received, stopping batch");
            stop.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let mut builder =
        JobOrchestrator::builder(config_manager.settings().clone()).log_dir(&logs_dir);
    if args.identity {
        builder = builder.transform(Arc::new(IdentityTransform));
    }
    let (orchestrator, events) = builder.build();

    for file in &args.files {
        if !orchestrator.add_job(file.clone()) {
            eprintln!("Skipping duplicate {}", file.display());
        }
    }

    let started = orchestrator.start_all();
    tracing::info!("Processing {} file(s)", started);
    if started > 0 {
        // JSON output must be the only thing on stdout.
        let step = (!args.json).then(|| config_manager.settings().logging.progress_step.max(1));
        drain_events(&orchestrator, &events, step, &stop);
    }

    let jobs = orchestrator.jobs();
    if args.json {
        let json = serde_json::to_string_pretty(&jobs).context("Failed to serialize jobs")?;
        println!("{}", json);
    } else {
        print_summary(&jobs);
    }

    if stop.load(Ordering::SeqCst) {
        return Ok(ExitCode::from(130));
    }
    let failed = jobs.iter().any(|j| j.status == JobStatus::Error);
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Write the tables the command line can override back to the settings file.
fn save_overrides(config_manager: &mut ConfigManager) -> Result<()> {
    for section in [ConfigSection::Paths, ConfigSection::Processing] {
        config_manager
            .update_section(section)
            .with_context(|| format!("Failed to save [{}]", section.table_name()))?;
    }
    Ok(())
}

/// Single consumer of job events; returns when the batch is over or
/// after `stop` is raised and the batch has been aborted.
///
/// Status and progress lines are printed every `step` percent; `None`
/// drains silently.
fn drain_events(
    orchestrator: &JobOrchestrator,
    events: &Receiver<JobEvent>,
    step: Option<u32>,
    stop: &AtomicBool,
) {
    let mut last_step: HashMap<PathBuf, u32> = HashMap::new();

    loop {
        if stop.load(Ordering::SeqCst) {
            let report = orchestrator.abort_all();
            eprintln!(
                "Aborted: {} output(s) removed, {} could not be removed",
                report.deleted.len(),
                report.failed.len()
            );
            return;
        }

        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(JobEvent::Status {
                path,
                status,
                message,
            }) => {
                if step.is_none() {
                    continue;
                }
                let name = display_name(&path);
                match message {
                    Some(message) => println!("[{:>10}] {}: {}", status, name, message),
                    None => println!("[{:>10}] {}", status, name),
                }
            }
            Ok(JobEvent::Progress { path, progress }) => {
                let Some(step) = step else {
                    continue;
                };
                let percent = (progress * 100.0).round() as u32;
                let bucket = percent / step;
                if last_step.get(&path) != Some(&bucket) {
                    last_step.insert(path.clone(), bucket);
                    println!("[{:>9}%] {}", percent, display_name(&path));
                }
            }
            Ok(JobEvent::BatchFinished {
                done,
                cancelled,
                failed,
            }) => {
                tracing::debug!("Batch finished ({}/{}/{})", done, cancelled, failed);
                return;
            }
            Ok(JobEvent::Aborted { deleted, .. }) => {
                tracing::warn!("Aborted, {} output(s) removed", deleted);
                return;
            }
            Ok(JobEvent::Added { .. } | JobEvent::Removed { .. }) => {}
            Err(RecvTimeoutError::Timeout) => {
                if !orchestrator.is_any_processing() && orchestrator.wait_idle(Duration::ZERO) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn print_summary(jobs: &[JobSnapshot]) {
    let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

    println!();
    for job in jobs {
        match (&job.output_path, job.status) {
            (Some(output), JobStatus::Done) => {
                println!("  {} -> {}", job.name, output.display())
            }
            _ => println!("  {} ({})", job.name, job.status),
        }
    }
    println!(
        "Done: {}, cancelled: {}, failed: {}",
        count(JobStatus::Done),
        count(JobStatus::Cancelled),
        count(JobStatus::Error)
    );
}
