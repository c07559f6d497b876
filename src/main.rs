//! Warehouse locator CLI
//!
//! Replays recorded bus traffic through the localization pipeline and answers
//! destination and route queries against the configured warehouse.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use warehouse_locator::api::{ChannelNotifier, FanOutNotifier, LogNotifier, PositionNotifier};
use warehouse_locator::storage::InMemoryRepository;
use warehouse_locator::{LocatorService, MessageOutcome, PathRequest, Position, SystemConfig};

/// Warehouse indoor localization and route planning
#[derive(Parser, Debug)]
#[command(name = "warehouse-locator")]
#[command(about = "Localize warehouse tags from anchor ranges and plan routes", long_about = None)]
struct Args {
    /// JSON configuration file (defaults to the reference warehouse)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON snapshot with anchors, destinations and tags
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Write the snapshot back here when the command finishes
    #[arg(long)]
    save_data: Option<PathBuf>,

    /// Verbose output (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed `<topic> <payload>` lines through ingestion, printing each
    /// position update as a JSON line
    Replay {
        /// Recorded bus traffic, one message per line
        input: PathBuf,

        /// Route query answered after the replay, as TAG=DESTINATION
        #[arg(long = "path", value_parser = parse_path_query)]
        paths: Vec<(String, String)>,
    },
    /// List destinations by name
    Destinations,
    /// Plan a route from a position to a destination
    Plan {
        /// Start position as x,y
        #[arg(long, value_parser = parse_position, allow_hyphen_values = true)]
        from: Position,

        /// Destination name
        #[arg(long)]
        to: String,
    },
}

fn parse_position(value: &str) -> Result<Position, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected x,y, got '{value}'"))?;
    let x: f64 = x.trim().parse().map_err(|_| format!("invalid x coordinate '{x}'"))?;
    let y: f64 = y.trim().parse().map_err(|_| format!("invalid y coordinate '{y}'"))?;
    let position = Position::new(x, y);
    if !position.is_finite() {
        return Err(format!("coordinates must be finite, got '{value}'"));
    }
    Ok(position)
}

fn parse_path_query(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((tag, dest)) if !tag.is_empty() && !dest.is_empty() => Ok((tag.to_string(), dest.to_string())),
        _ => Err(format!("expected TAG=DESTINATION, got '{value}'")),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => SystemConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SystemConfig::default(),
    };
    let repository = Arc::new(match &args.data {
        Some(path) => InMemoryRepository::from_file(path)?,
        None => InMemoryRepository::reference(),
    });

    let (channel, updates) = ChannelNotifier::channel();
    let notifier: Arc<dyn PositionNotifier> = Arc::new(FanOutNotifier::new(vec![
        Arc::new(LogNotifier),
        Arc::new(channel),
    ]));
    let service = LocatorService::bootstrap(&config, repository.clone(), notifier)
        .context("failed to start locator service")?;

    match args.command {
        Command::Replay { input, paths } => {
            let traffic = fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;

            let (mut applied, mut rejected) = (0usize, 0usize);
            for line in traffic.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((topic, payload)) = line.split_once(char::is_whitespace) else {
                    tracing::warn!(line, "skipping line without payload");
                    rejected += 1;
                    continue;
                };
                match service.handle_message(topic, payload.trim().as_bytes()) {
                    MessageOutcome::Rejected(_) => rejected += 1,
                    _ => applied += 1,
                }
                for update in updates.try_iter() {
                    println!("{}", serde_json::to_string(&update)?);
                }
            }
            info!(applied, rejected, "replay finished");

            for (tag_id, dest_name) in paths {
                let response = service.get_path(&PathRequest::new(tag_id, dest_name))?;
                println!("{}", serde_json::to_string(&response)?);
            }
        }
        Command::Destinations => {
            for destination in service.list_destinations()? {
                println!("{}", serde_json::to_string(&destination)?);
            }
        }
        Command::Plan { from, to } => {
            let outcome = service.plan_from(from, &to)?;
            let Some(path) = outcome.path() else {
                bail!("no route from ({}, {}) to '{}': {:?}", from.x, from.y, to, outcome);
            };
            info!(waypoints = path.nodes.len(), length = path.length, "route found");
            println!("{}", serde_json::to_string(&path.waypoints())?);
        }
    }

    if let Some(path) = &args.save_data {
        repository.save_to_file(path)?;
        info!(path = %path.display(), "saved snapshot");
    }

    Ok(())
}
