use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use assessor_harvest::app::{App, ProgressSinkKind};
use assessor_harvest::config::{ConfigLoader, ResolvedConfig};
use assessor_harvest::domain::{Partition, TraversalOrder};
use assessor_harvest::error::HarvestError;
use assessor_harvest::output::{self, ConsoleProgress, JsonOutput, OutputMode};
use assessor_harvest::session::AutomationSession;
use assessor_harvest::webdriver::WebDriverSession;

#[derive(Parser)]
#[command(name = "assessor-harvest")]
#[command(about = "Resumable harvester for paginated assessor search results")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./harvest.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the partitions a harvest would visit")]
    Plan(OrderArgs),
    #[command(about = "Download every partition not harvested yet")]
    Harvest(OrderArgs),
    #[command(about = "Merge shards into one deduplicated dataset")]
    Consolidate,
    #[command(about = "Score the merged dataset and write quality subsets")]
    Score,
    #[command(about = "Harvest, consolidate and score in one go")]
    Run(OrderArgs),
    #[command(about = "Remove stray browser downloads")]
    Clean,
}

#[derive(Args, Clone, Copy)]
struct OrderArgs {
    /// Walk the partition list back to front
    #[arg(long, conflicts_with = "forward")]
    reverse: bool,

    #[arg(long)]
    forward: bool,
}

impl OrderArgs {
    fn resolve(self, configured: TraversalOrder) -> TraversalOrder {
        if self.reverse {
            TraversalOrder::Reversed
        } else if self.forward {
            TraversalOrder::Forward
        } else {
            configured
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_)
        | HarvestError::InvalidOrder(_)
        | HarvestError::InvalidPartition(_)
        | HarvestError::Enumeration(_)
        | HarvestError::NoPartitions
        | HarvestError::DatasetNotFound(_) => 2,
        HarvestError::Session(_)
        | HarvestError::Timeout(_)
        | HarvestError::WebDriverHttp(_)
        | HarvestError::WebDriverStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Plan(args) => {
            let order = args.resolve(config.order);
            let mut app = App::new(config.clone(), connect(&config)?);
            let sink = ConsoleProgress::new(ProgressSinkKind::Plan);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.plan(order, &JsonOutput)?;
                    JsonOutput::print_plan(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let result = app.plan(order, &sink)?;
                    output::print_plan_summary(&result);
                    Ok(())
                }
            }
        }
        Commands::Harvest(args) => {
            let order = args.resolve(config.order);
            let mut app = App::new(config.clone(), connect(&config)?);
            let sink = ConsoleProgress::new(ProgressSinkKind::Harvest);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.harvest(order, &JsonOutput)?;
                    JsonOutput::print_harvest(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let result = app.harvest(order, &sink)?;
                    output::print_harvest_summary(&result);
                    Ok(())
                }
            }
        }
        Commands::Run(args) => {
            let order = args.resolve(config.order);
            let mut app = App::new(config.clone(), connect(&config)?);
            let sink = ConsoleProgress::new(ProgressSinkKind::Harvest);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.run(order, &JsonOutput)?;
                    JsonOutput::print_run(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let result = app.run(order, &sink)?;
                    output::print_harvest_summary(&result.harvest);
                    output::print_consolidate_summary(&result.consolidate);
                    output::print_score_summary(&result.score);
                    Ok(())
                }
            }
        }
        Commands::Consolidate => {
            let app = App::new(config, NopSession);
            let sink = ConsoleProgress::new(ProgressSinkKind::Consolidate);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.consolidate(&JsonOutput)?;
                    JsonOutput::print_consolidate(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let result = app.consolidate(&sink)?;
                    output::print_consolidate_summary(&result);
                    Ok(())
                }
            }
        }
        Commands::Score => {
            let app = App::new(config, NopSession);
            let sink = ConsoleProgress::new(ProgressSinkKind::Score);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.score(&JsonOutput)?;
                    JsonOutput::print_score(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let result = app.score(&sink)?;
                    output::print_score_summary(&result);
                    Ok(())
                }
            }
        }
        Commands::Clean => {
            let app = App::new(config, NopSession);
            let sink = ConsoleProgress::new(ProgressSinkKind::Clean);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.clean(&JsonOutput)?;
                    JsonOutput::print_clean(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let result = app.clean(&sink)?;
                    output::print_clean_summary(&result);
                    Ok(())
                }
            }
        }
    }
}

fn connect(config: &ResolvedConfig) -> Result<WebDriverSession, HarvestError> {
    WebDriverSession::connect(
        &config.source,
        config.selectors.clone(),
        config.timeouts,
        &config.paths.download_dir,
    )
}

/// Stand-in for commands that work on files only.
struct NopSession;

impl AutomationSession for NopSession {
    fn enumerate_partitions(&mut self) -> Result<Vec<String>, HarvestError> {
        Err(HarvestError::Session("no browser session".to_string()))
    }

    fn select_partition(&mut self, _partition: &Partition) -> Result<(), HarvestError> {
        Err(HarvestError::Session("no browser session".to_string()))
    }

    fn submit_search(&mut self) -> Result<(), HarvestError> {
        Err(HarvestError::Session("no browser session".to_string()))
    }

    fn is_paginated(&mut self) -> Result<bool, HarvestError> {
        Err(HarvestError::Session("no browser session".to_string()))
    }

    fn download_current_page(&mut self) -> Result<Vec<u8>, HarvestError> {
        Err(HarvestError::Session("no browser session".to_string()))
    }

    fn advance_to_next_page(&mut self) -> Result<bool, HarvestError> {
        Err(HarvestError::Session("no browser session".to_string()))
    }

    fn reset_session(&mut self) -> Result<(), HarvestError> {
        Ok(())
    }
}
