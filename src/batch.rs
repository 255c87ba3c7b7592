// SPDX-License-Identifier: PMPL-1.0-or-later

//! Batch: run one lifecycle operation across many techniques
//!
//! A fixed number of workers drain a shared queue of techniques. Each
//! worker builds its own runner per technique and drives it to completion
//! before taking the next one. One failure never stops the batch.

use crate::runner::{LifecycleError, Runner};
use crate::technique::Technique;
use crate::types::TechniqueState;
use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};

pub const DEFAULT_WORKER_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    WarmUp,
    /// Detonate, optionally followed by a cleanup whose error is coalesced
    Detonate { cleanup: bool },
    Revert,
    /// Clean up; with `skip_cold`, COLD techniques are skipped instead of refused
    CleanUp { skip_cold: bool },
}

impl Operation {
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::WarmUp => "warm up",
            Operation::Detonate { .. } => "detonate",
            Operation::Revert => "revert",
            Operation::CleanUp { .. } => "clean up",
        }
    }
}

/// Builds a runner for one technique. Shared by every worker.
pub trait RunnerFactory: Sync {
    fn build(&self, technique: Arc<Technique>, force: bool) -> Result<Runner, LifecycleError>;
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub worker_count: usize,
    pub force: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum BatchStatus {
    Succeeded,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub technique_id: String,
    #[serde(flatten)]
    pub status: BatchStatus,
    /// In-memory state of the runner once the operation returned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TechniqueState>,
    /// The failure was a process-level precondition such as authentication
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
}

impl BatchOutcome {
    fn new(technique_id: &str, status: BatchStatus, state: Option<TechniqueState>) -> Self {
        Self {
            technique_id: technique_id.to_string(),
            status,
            state,
            fatal: false,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, BatchStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub created_at: String,
    pub operation: Operation,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// One entry per submitted technique, in submission order
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn had_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn had_fatal(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.fatal)
    }
}

/// Runs `operation` on every technique with at most `worker_count` in flight.
pub fn run(
    techniques: &[Arc<Technique>],
    operation: Operation,
    config: &BatchConfig,
    factory: &dyn RunnerFactory,
) -> Result<BatchReport> {
    let workers = config.worker_count.max(1).min(techniques.len().max(1));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("ambush-worker-{}", index))
        .build()
        .context("building worker pool")?;

    let (work_tx, work_rx) = mpsc::channel::<(usize, Arc<Technique>)>();
    for (index, technique) in techniques.iter().enumerate() {
        work_tx
            .send((index, technique.clone()))
            .context("queueing technique")?;
    }
    // Closed after the last submission; workers stop once the queue is drained.
    drop(work_tx);

    let work_rx = Mutex::new(work_rx);
    let (result_tx, result_rx) = mpsc::channel::<(usize, BatchOutcome)>();
    let force = config.force;

    pool.scope(|scope| {
        for _ in 0..workers {
            let result_tx = result_tx.clone();
            let work_rx = &work_rx;
            scope.spawn(move |_| loop {
                let next = match work_rx.lock() {
                    Ok(queue) => queue.recv(),
                    Err(_) => break,
                };
                let Ok((index, technique)) = next else {
                    break;
                };
                let outcome = execute(technique, operation, force, factory);
                if result_tx.send((index, outcome)).is_err() {
                    break;
                }
            });
        }
    });
    drop(result_tx);

    let mut indexed: Vec<(usize, BatchOutcome)> = result_rx.into_iter().collect();
    indexed.sort_by_key(|(index, _)| *index);
    let outcomes: Vec<BatchOutcome> = indexed.into_iter().map(|(_, outcome)| outcome).collect();

    let count = |wanted: fn(&BatchStatus) -> bool| {
        outcomes
            .iter()
            .filter(|outcome| wanted(&outcome.status))
            .count()
    };
    let succeeded = count(|status| matches!(status, BatchStatus::Succeeded));
    let skipped = count(|status| matches!(status, BatchStatus::Skipped(_)));
    let failed = count(|status| matches!(status, BatchStatus::Failed(_)));

    Ok(BatchReport {
        created_at: chrono::Utc::now().to_rfc3339(),
        operation,
        succeeded,
        skipped,
        failed,
        outcomes,
    })
}

fn execute(
    technique: Arc<Technique>,
    operation: Operation,
    force: bool,
    factory: &dyn RunnerFactory,
) -> BatchOutcome {
    let id = technique.id.clone();

    if operation == Operation::Revert && !technique.is_revertible() {
        log::warn!("{} has no revert function and cannot be reverted", id);
        return BatchOutcome::new(
            &id,
            BatchStatus::Skipped("no revert function".to_string()),
            None,
        );
    }

    let mut runner = match factory.build(technique, force) {
        Ok(runner) => runner,
        Err(err) => return failure(&id, err, None),
    };

    let result = match operation {
        Operation::WarmUp => runner.warm_up().map(|_| ()),
        Operation::Detonate { cleanup } => {
            let detonated = runner.detonate();
            if cleanup {
                let cleaned = runner.clean_up().map(|_| ());
                // The detonation error wins when both failed.
                detonated.and(cleaned)
            } else {
                detonated
            }
        }
        Operation::Revert => runner.revert(),
        Operation::CleanUp { skip_cold } => {
            if skip_cold && runner.state() == TechniqueState::Cold {
                return BatchOutcome::new(
                    &id,
                    BatchStatus::Skipped("already COLD".to_string()),
                    Some(runner.state()),
                );
            }
            runner.clean_up().map(|_| ())
        }
    };

    match result {
        Ok(()) => BatchOutcome::new(&id, BatchStatus::Succeeded, Some(runner.state())),
        Err(err) => failure(&id, err, Some(runner.state())),
    }
}

fn failure(id: &str, err: LifecycleError, state: Option<TechniqueState>) -> BatchOutcome {
    log::error!("{}", err);
    let mut outcome = BatchOutcome::new(id, BatchStatus::Failed(err.to_string()), state);
    outcome.fatal = err.is_fatal();
    outcome
}

/// Print a summary table to the terminal
pub fn print_summary(report: &BatchReport, quiet: bool) {
    if quiet {
        return;
    }

    println!(
        "\n{} {}: {} succeeded, {} skipped, {} failed",
        "BATCH".bold().cyan(),
        report.operation.verb(),
        report.succeeded,
        report.skipped,
        report.failed
    );

    for outcome in &report.outcomes {
        match &outcome.status {
            BatchStatus::Succeeded => {
                println!("  {:<50} {}", outcome.technique_id, "OK".green())
            }
            BatchStatus::Skipped(reason) => println!(
                "  {:<50} {} ({})",
                outcome.technique_id,
                "SKIPPED".yellow(),
                reason
            ),
            BatchStatus::Failed(message) => println!(
                "  {:<50} {} {}",
                outcome.technique_id,
                "FAILED".red(),
                message
            ),
        }
    }
    println!();
}

/// Write batch report as JSON
pub fn write_report(report: &BatchReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
