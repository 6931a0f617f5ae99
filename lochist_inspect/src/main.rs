use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use lochist::{
    Cancellation, ChangeRecordStore, ChangeSet, ChangeSetId, HistoryConfig, LocalHistory,
    LogNotifier, OpenOutcome,
};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Inspect and maintain a local history store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// RON file with a HistoryConfig
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory, overrides the one from the config
    #[arg(short, long)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One line per change-set, newest first
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print one change-set as RON
    Show { id: i64 },

    /// Print every change-set as RON, newest first
    Dump,

    /// Drop change-sets older than the retention period
    Purge {
        /// Active days to keep
        #[arg(long)]
        days: Option<i64>,

        /// Pauses longer than this are not counted
        #[arg(long)]
        gap_hours: Option<i64>,
    },
}

fn main() -> Result<()> {
    let printer = tracing_subscriber::fmt::Layer::new().with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(printer)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => HistoryConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HistoryConfig::default(),
    };
    if let Some(path) = cli.path {
        config.path = path;
    }
    if let Command::Purge { days, gap_hours } = &cli.command {
        if let Some(days) = days {
            config.retention_days = *days;
        }
        if let Some(gap_hours) = gap_hours {
            config.day_gap_hours = *gap_hours;
        }
    }

    config.validate().context("invalid settings")?;

    let session = ChangeRecordStore::stored_session(&config)?
        .ok_or_else(|| anyhow!("no history store at {}", config.path.display()))?;
    let history = LocalHistory::open(config, session, Arc::new(LogNotifier))?;
    if let OpenOutcome::Recovered(cause) = history.open_outcome() {
        return Err(anyhow!("store was unreadable and has been rebuilt: {cause}"));
    }

    match cli.command {
        Command::List { limit } => {
            for change_set in history.change_sets().take(limit.unwrap_or(usize::MAX)) {
                println!("{}", summary(&change_set));
            }
        }
        Command::Show { id } => {
            let change_set = history
                .find_change_set(ChangeSetId(id))
                .ok_or_else(|| anyhow!("no change-set {}", ChangeSetId(id)))?;
            println!("{}", change_set.to_ron_pretty()?);
        }
        Command::Dump => {
            for change_set in history.change_sets() {
                println!("{}", change_set.to_ron_pretty()?);
            }
        }
        Command::Purge { .. } => {
            let purged = history.purge_obsolete(&Cancellation::new());
            info!("purge finished");
            println!("{purged} change-sets removed");
        }
    }
    history.close();
    Ok(())
}

fn summary(change_set: &ChangeSet) -> String {
    let paths = change_set.affected_paths();
    let shown = match paths.len() {
        0 => String::new(),
        1 => paths[0].clone(),
        n => format!("{} (+{})", paths[0], n - 1),
    };
    format!(
        "{:>6}  {}  {:<24}  {:>3} changes  {}",
        change_set.id().to_string(),
        change_set.timestamp(),
        change_set.display_name().unwrap_or("-"),
        change_set.changes().len(),
        shown
    )
}
