//! Chronas core - maintenance jobs over the geo-historical store

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chronas_core::{
    config::{Args, Command},
    db::{MongoClient, MongoReputation, MongoStore},
    reputation::{RecordingReputation, ReputationSink},
    AreaEditor, Aggregator, ChronasError, DocumentStore, InMemoryStore, InitCache, LinkGraph, Reaggregation,
    RevisionLedger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("chronas_core={},info", log_level).into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate().map_err(ChronasError::Config) {
        error!(kind = e.kind(), "{}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Chronas core");
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} / {}", args.mongodb_uri, args.mongodb_db);
    info!("Blocking year span: {}", args.blocking_year_span);
    info!("Checkpoint year: {}", args.checkpoint_year);
    info!("======================================");

    // In-memory store only in dev mode
    let (store, reputation): (Arc<dyn DocumentStore>, Arc<dyn ReputationSink>) =
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                info!("MongoDB connected successfully");
                let store: Arc<dyn DocumentStore> = Arc::new(MongoStore::new(client.clone()).await?);
                let reputation: Arc<dyn ReputationSink> = Arc::new(MongoReputation::new(client));
                (store, reputation)
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
                    let reputation: Arc<dyn ReputationSink> = Arc::new(RecordingReputation::new());
                    (store, reputation)
                } else {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        };

    let cache = Arc::new(InitCache::with_defaults());
    let ledger = Arc::new(RevisionLedger::new(store.clone(), reputation).with_cache(cache));
    let aggregator = Arc::new(Aggregator::with_config(store, args.aggregator_config()));

    match args.command.clone() {
        Command::Aggregate => {
            let report = aggregator.run_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::AggregateDimension { dimension } => {
            let summary = aggregator.aggregate_dimension(dimension).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Revert { revision_id, user } => {
            let revision = ledger.revert(&user, &revision_id).await?;
            println!("{}", serde_json::to_string_pretty(&revision)?);
        }
        Command::History { entity_id } => {
            let revisions = ledger.history(&entity_id).await?;
            println!("{}", serde_json::to_string_pretty(&revisions)?);
        }
        Command::ReplaceAll {
            dimension,
            from,
            to,
            start,
            end,
            user,
        } => {
            let editor = AreaEditor::new(ledger.clone(), aggregator.clone(), args.bulk_config());
            let outcome = editor
                .replace_all(&user, start..=end, dimension, &from, &to)
                .await?;
            info!(
                revision_id = %outcome.edit.revision.id,
                years = outcome.edit.years.len(),
                "Replacement recorded"
            );
            // Deferred aggregation is awaited before exit
            let report = match outcome.aggregation {
                Reaggregation::Completed(report) => report,
                Reaggregation::Deferred(handle) => handle.await??,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::AuditLinks { repair, user } => {
            let graph = LinkGraph::new(ledger.clone());
            let broken = graph.audit_symmetry().await?;
            println!("{}", serde_json::to_string_pretty(&broken)?);

            if let (true, Some(user)) = (repair, user) {
                let changes = graph.repair_asymmetric(&user).await?;
                info!(repaired = changes.len(), "Link graph repaired");
            }
        }
    }

    Ok(())
}
