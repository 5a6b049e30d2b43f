//! Savannah CLI
//!
//! Batch transfers against a directory-backed file catalog

mod console;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use console::{ConsoleDelegate, Policy};
use savannah::ledger::TransferState;
use savannah::session::{ListFilter, SessionOption};
use savannah::{
    ui_channel, BatchOp, Config, HistoryLog, LocalCatalog, RemoteSession, SharedSession,
    TransferOrchestrator,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Savannah - exchange files with a catalog
#[derive(Parser)]
#[command(name = "savannah")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/savannah/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Catalog root directory
    #[arg(long, env = "SAVANNAH_CATALOG")]
    catalog: PathBuf,

    /// Filetype (catalog section) to work in
    #[arg(short = 't', long, env = "SAVANNAH_FILETYPE")]
    filetype: String,

    /// History file (default: ~/.local/share/savannah/history.lst)
    #[arg(long)]
    history: Option<PathBuf>,

    /// How to answer conflict prompts
    #[arg(long, value_enum, default_value_t = Policy::Ask)]
    policy: Policy,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the filetype in the catalog
    Init,

    /// Upload new files
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Upload files over existing catalog entries
    Replace {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Download files
    Get {
        #[arg(required = true)]
        names: Vec<String>,

        /// Destination directory (default: the configured directory)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },

    /// Delete catalog entries
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Rename a catalog entry
    Rename { from: String, to: String },

    /// Attach a comment to catalog entries
    Comment {
        #[arg(short = 'm', long)]
        text: String,

        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List catalog entries
    List {
        /// Glob pattern on the entry name
        #[arg(short, long)]
        pattern: Option<String>,

        /// Only entries modified at or after this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Only entries modified at or before this RFC 3339 time
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let mut catalog = LocalCatalog::new(&cli.catalog, &config.transfer.default_directory)
        .with_context(|| format!("Failed to open catalog {}", cli.catalog.display()))?;
    for option in SessionOption::ALL {
        catalog.set_option(option, config.session.get(option));
    }

    let (op, items) = match cli.command {
        Commands::Init => {
            catalog
                .create_filetype(&cli.filetype)
                .with_context(|| format!("Failed to create filetype '{}'", cli.filetype))?;
            println!("Created filetype '{}'", cli.filetype.bold());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::List {
            pattern,
            since,
            until,
            json,
        } => {
            let pattern = pattern
                .map(|p| glob::Pattern::new(&p))
                .transpose()
                .context("Invalid pattern")?;
            let filter = ListFilter {
                pattern,
                since,
                until,
            };
            return list(catalog, &cli.filetype, &filter, json);
        }
        Commands::Add { files } => (BatchOp::Add, paths(files)),
        Commands::Replace { files } => (BatchOp::Replace, paths(files)),
        Commands::Get { names, dest } => (BatchOp::Get { destination: dest }, names),
        Commands::Delete { names } => (BatchOp::Delete, names),
        Commands::Rename { from, to } => (BatchOp::Rename { new_names: vec![to] }, vec![from]),
        Commands::Comment { text, names } => (BatchOp::Comment { text }, names),
    };

    let history_path = match cli.history {
        Some(path) => path,
        None => HistoryLog::default_path()?,
    };
    let history = HistoryLog::open(&history_path)
        .with_context(|| format!("Failed to open history {}", history_path.display()))?;

    let (ui, dispatcher) = ui_channel();
    let orchestrator =
        TransferOrchestrator::new(SharedSession::new(catalog), ui, Arc::new(history), config);
    let handle = orchestrator.submit(&cli.filetype, op, items)?;
    // The dispatcher runs until the last handle is gone
    drop(orchestrator);

    let Some(handle) = handle else {
        println!("Nothing to do");
        return Ok(ExitCode::SUCCESS);
    };

    let mut delegate = ConsoleDelegate::new(cli.policy);
    let ledger = dispatcher.run(&mut delegate);
    let summary = handle.join()?;
    delegate.finish();

    for record in ledger.iter() {
        let state = match record.state {
            TransferState::Complete => "complete".green(),
            TransferState::Aborted => "skipped".yellow(),
            TransferState::Error => "error".red(),
            TransferState::Pending | TransferState::Transferring => "pending".normal(),
        };
        let size = record
            .size
            .map(|s| format!("{} bytes", s))
            .unwrap_or_default();
        println!("{:>8}  {:<6} {} {}", state, record.direction, record.name, size.dimmed());
    }
    println!(
        "{} complete, {} unchanged, {} skipped, {} failed{}",
        summary.completed,
        summary.identical,
        summary.aborted,
        summary.failed,
        if summary.cancelled {
            format!(", {} not attempted", summary.unprocessed)
        } else {
            String::new()
        }
    );

    if summary.failed > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn paths(files: Vec<PathBuf>) -> Vec<String> {
    files
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}

fn list(
    mut catalog: LocalCatalog,
    filetype: &str,
    filter: &ListFilter,
    json: bool,
) -> Result<ExitCode> {
    catalog
        .open(filetype)
        .with_context(|| format!("Failed to open filetype '{}'", filetype))?;
    let entries = catalog.list(filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(ExitCode::SUCCESS);
    }
    if entries.is_empty() {
        println!("No entries in '{}'", filetype);
    }
    for entry in &entries {
        println!(
            "{:<32} {:>10}  {}  {}",
            entry.name,
            entry.size,
            entry.modified.format("%Y-%m-%d %H:%M"),
            entry.comment.as_deref().unwrap_or("").dimmed()
        );
    }
    Ok(ExitCode::SUCCESS)
}
