//! price_collector_rust - scheduled card price collection and bulk imports

pub mod bulk;
pub mod collector;
pub mod config;
pub mod sources;

pub use collector::{load_dump, PriceCollector};
pub use config::CollectorConfig;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "price_collector_rust")]
#[command(author, version, about = "Card price collection and bulk imports", long_about = None)]
pub struct Cli {
    /// Subcommand to execute (defaults to `cycle`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Cycle)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// One collection cycle over the catalog slice
    Cycle,

    /// Import a JSONL dump for one source through the staging table
    Bulk {
        /// Source id (tcgplayer, cardmarket, scryfall)
        #[arg(value_parser = parse_source_id)]
        source: String,

        /// Path to the `.jsonl` dump
        path: PathBuf,
    },

    /// Create tables and indexes
    Schema,
}

fn parse_source_id(raw: &str) -> Result<String, String> {
    let id = raw.trim().to_lowercase();
    if config::ALL_SOURCES.contains(&id.as_str()) {
        Ok(id)
    } else {
        Err(format!("unknown source '{}' (known: {})", raw, config::ALL_SOURCES.join(", ")))
    }
}
