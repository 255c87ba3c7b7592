// SPDX-License-Identifier: PMPL-1.0-or-later

//! cloud-ambush: detonate attack techniques against live cloud accounts
//!
//! Warm up prerequisite infrastructure, detonate, revert and clean up
//! techniques, keeping per-technique state on disk between invocations.

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use cloud_ambush::auth::{Authenticator, EnvironmentAuthenticator};
use cloud_ambush::batch::{self, BatchConfig, Operation, RunnerFactory};
use cloud_ambush::catalog;
use cloud_ambush::config::Config;
use cloud_ambush::logging;
use cloud_ambush::registry::{Registry, TechniqueFilter};
use cloud_ambush::report;
use cloud_ambush::runner::{LifecycleError, Runner};
use cloud_ambush::state::FileSystemStateManager;
use cloud_ambush::technique::Technique;
use cloud_ambush::terraform::TerraformManager;
use cloud_ambush::types::{Platform, Tactic};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cloud-ambush")]
#[command(version)]
#[command(about = "Detonate attack techniques against live cloud accounts")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (.yaml, .yml or .json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Technique catalog to load, in addition to those in the config
    #[arg(long = "catalog", global = true, value_name = "FILE")]
    catalogs: Vec<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only report warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attack techniques
    List {
        /// Filter on a platform (aws, azure, gcp, kubernetes, eks, entra-id)
        #[arg(long)]
        platform: Option<String>,

        /// Filter on a MITRE ATT&CK tactic, e.g. persistence
        #[arg(long = "mitre-attack-tactic", alias = "tactic")]
        tactic: Option<String>,
    },

    /// Display details of attack techniques
    Show {
        #[arg(value_name = "TECHNIQUE", required = true)]
        techniques: Vec<String>,
    },

    /// Display the lifecycle state of techniques (all when none given)
    Status {
        #[arg(value_name = "TECHNIQUE")]
        techniques: Vec<String>,
    },

    /// Spin up the prerequisite infrastructure of techniques
    Warmup {
        #[arg(value_name = "TECHNIQUE", required = true)]
        techniques: Vec<String>,

        /// Re-apply prerequisites even when already WARM
        #[arg(short, long)]
        force: bool,

        /// Write the batch report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Detonate techniques, warming them up first when needed
    Detonate {
        #[arg(value_name = "TECHNIQUE", required = true)]
        techniques: Vec<String>,

        /// Detonate again even if not idempotent and already detonated
        #[arg(short, long)]
        force: bool,

        /// Clean up the prerequisites after detonating
        #[arg(long)]
        cleanup: bool,

        /// Write the batch report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Revert the detonation of techniques
    Revert {
        #[arg(value_name = "TECHNIQUE", required = true)]
        techniques: Vec<String>,

        /// Revert even if the technique is not DETONATED
        #[arg(short, long)]
        force: bool,

        /// Write the batch report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Clean up leftover infrastructure and state of techniques
    #[command(alias = "clean")]
    Cleanup {
        #[arg(value_name = "TECHNIQUE")]
        techniques: Vec<String>,

        /// Clean up every technique that is not COLD
        #[arg(long, conflicts_with = "techniques")]
        all: bool,

        /// Clean up even if the technique is already COLD
        #[arg(short, long)]
        force: bool,

        /// Write the batch report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
}

/// Builds one runner per technique with its own Terraform correlation ID.
struct RunnerContext {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
}

impl RunnerContext {
    fn terraform(&self) -> TerraformManager {
        let user_agent = format!(
            "cloud-ambush/{}_{}",
            env!("CARGO_PKG_VERSION"),
            uuid::Uuid::new_v4()
        );
        TerraformManager::new(self.config.terraform_binary_path(), user_agent)
            .with_version(self.config.terraform_version.clone())
            .with_timeout(self.config.provisioning_timeout())
    }

    /// Bootstrap preconditions: credentials per platform and, when anything
    /// needs provisioning, the Terraform binary. Failing either ends the process.
    fn ensure_ready(&self, techniques: &[Arc<Technique>]) {
        let platforms: HashSet<Platform> = techniques.iter().map(|t| t.platform).collect();
        for platform in platforms {
            if !self.authenticator.is_authenticated(platform) {
                fatal(&self.authenticator.hint(platform));
            }
        }

        if techniques.iter().any(|t| t.has_prerequisites()) {
            if let Err(err) = self.terraform().initialize() {
                fatal(&format!("error installing Terraform: {}", err));
            }
        }
    }
}

impl RunnerFactory for RunnerContext {
    fn build(&self, technique: Arc<Technique>, force: bool) -> Result<Runner, LifecycleError> {
        let state = FileSystemStateManager::new(
            &self.config.state_root,
            technique.id.clone(),
            technique.prerequisites_code.clone(),
        );
        Runner::new(
            technique,
            force,
            Box::new(state),
            Arc::new(self.terraform()),
            self.authenticator.clone(),
        )
    }
}

fn fatal(message: &str) -> ! {
    log::error!("{}", message);
    process::exit(1);
}

fn build_registry(config: &Config, extra_catalogs: &[PathBuf]) -> Result<Registry> {
    let mut registry = Registry::new();
    for path in config.catalogs.iter().chain(extra_catalogs) {
        catalog::load_into(&mut registry, path)?;
    }
    Ok(registry)
}

fn run_batch(
    context: &RunnerContext,
    techniques: &[Arc<Technique>],
    operation: Operation,
    force: bool,
    report_path: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    context.ensure_ready(techniques);

    let batch_config = BatchConfig {
        worker_count: context.config.worker_count,
        force,
    };
    let batch_report = batch::run(techniques, operation, &batch_config, context)?;

    if batch_report.had_fatal() {
        fatal("aborting: a precondition failed while running the batch");
    }

    batch::print_summary(&batch_report, quiet);
    report::print_status(&report::collect_status(
        &context.config.state_root,
        techniques,
    ));

    if let Some(path) = report_path {
        batch::write_report(&batch_report, path)?;
        println!("Report saved to: {}", path.display());
    }

    if batch_report.had_failures() {
        Err(anyhow!(
            "{} of {} techniques failed to {}",
            batch_report.failed,
            techniques.len(),
            operation.verb()
        ))
    } else {
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::level_from_flags(cli.verbose, cli.quiet));

    let config = Config::discover(cli.config.as_deref())?;
    let registry = build_registry(&config, &cli.catalogs)?;
    let context = RunnerContext {
        config,
        authenticator: Arc::new(EnvironmentAuthenticator),
    };

    match cli.command {
        Commands::List { platform, tactic } => {
            let mut filter = TechniqueFilter::default();
            if let Some(name) = platform {
                filter.platform = Some(
                    Platform::parse(&name).ok_or_else(|| anyhow!("unknown platform: {}", name))?,
                );
            }
            if let Some(name) = tactic {
                filter.tactic = Some(
                    Tactic::parse(&name)
                        .ok_or_else(|| anyhow!("unknown MITRE ATT&CK tactic: {}", name))?,
                );
            }
            report::print_list(&registry.list(&filter));
        }

        Commands::Show { techniques } => {
            for technique in registry.resolve(&techniques)? {
                report::print_technique(&technique);
            }
        }

        Commands::Status { techniques } => {
            let selected = if techniques.is_empty() {
                registry.all().to_vec()
            } else {
                registry.resolve(&techniques)?
            };
            report::print_status(&report::collect_status(
                &context.config.state_root,
                &selected,
            ));
        }

        Commands::Warmup {
            techniques,
            force,
            report,
        } => {
            let selected = registry.resolve(&techniques)?;
            run_batch(
                &context,
                &selected,
                Operation::WarmUp,
                force,
                report.as_deref(),
                cli.quiet,
            )?;
        }

        Commands::Detonate {
            techniques,
            force,
            cleanup,
            report,
        } => {
            let selected = registry.resolve(&techniques)?;
            run_batch(
                &context,
                &selected,
                Operation::Detonate { cleanup },
                force,
                report.as_deref(),
                cli.quiet,
            )?;
        }

        Commands::Revert {
            techniques,
            force,
            report,
        } => {
            let selected = registry.resolve(&techniques)?;
            run_batch(
                &context,
                &selected,
                Operation::Revert,
                force,
                report.as_deref(),
                cli.quiet,
            )?;
        }

        Commands::Cleanup {
            techniques,
            all,
            force,
            report,
        } => {
            let (selected, operation) = if all {
                log::info!("Cleaning up all techniques that have been warmed up or detonated");
                (
                    registry.all().to_vec(),
                    Operation::CleanUp { skip_cold: true },
                )
            } else if techniques.is_empty() {
                bail!("pass the ID of the technique to clean up, or --all");
            } else {
                (
                    registry.resolve(&techniques)?,
                    Operation::CleanUp { skip_cold: false },
                )
            };
            run_batch(
                &context,
                &selected,
                operation,
                force,
                report.as_deref(),
                cli.quiet,
            )?;
        }
    }

    Ok(())
}
