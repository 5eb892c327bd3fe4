//! Configuration for chronas-core
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand};

use crate::aggregate::{AggregatorConfig, Dimension};
use crate::bulk::BulkConfig;

/// Chronas core - revision ledger, link graph and timeline aggregation
#[derive(Parser, Debug, Clone)]
#[command(name = "chronas-core")]
#[command(about = "Maintenance jobs for the Chronas geo-historical data store")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "chronas")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Bulk edits spanning fewer years than this wait for re-aggregation
    #[arg(long, env = "BLOCKING_YEAR_SPAN", default_value = "11")]
    pub blocking_year_span: i32,

    /// Year of the closing entry written for still-active dimension values
    #[arg(long, env = "CHECKPOINT_YEAR", default_value = "2000")]
    pub checkpoint_year: i32,

    /// Enable development mode (falls back to an in-memory store)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Rebuild every province change log and influence series
    Aggregate,

    /// Rebuild the influence series of one dimension
    AggregateDimension {
        /// ruler, culture, religion or religionGeneral
        dimension: Dimension,
    },

    /// Toggle a revision
    Revert {
        revision_id: String,
        /// User performing the revert
        #[arg(long)]
        user: String,
    },

    /// List the revisions of an entity, newest first
    History { entity_id: String },

    /// Replace one dimension value with another across a year range
    ReplaceAll {
        #[arg(long)]
        dimension: Dimension,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        start: i32,
        #[arg(long)]
        end: i32,
        #[arg(long)]
        user: String,
    },

    /// Report half-edges in the link graph
    AuditLinks {
        /// Add the missing mirror of every half-edge found
        #[arg(long, requires = "user")]
        repair: bool,
        /// User the repairs are recorded for
        #[arg(long)]
        user: Option<String>,
    },
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.blocking_year_span < 1 {
            return Err("BLOCKING_YEAR_SPAN must be at least 1".to_string());
        }

        match &self.command {
            Command::ReplaceAll { start, end, .. } if start > end => {
                Err("--start must be less than or equal to --end".to_string())
            }
            Command::ReplaceAll {
                dimension: Dimension::ReligionGeneral,
                ..
            } => Err("religionGeneral is derived and cannot be replaced".to_string()),
            _ => Ok(()),
        }
    }

    pub fn bulk_config(&self) -> BulkConfig {
        BulkConfig {
            blocking_year_span: self.blocking_year_span,
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            checkpoint_year: self.checkpoint_year,
            ..Default::default()
        }
    }
}
