//! db-cluster - command-line client for a SQL master and its read replicas.
//!
//! Opens the cluster through the activator chain, runs one subcommand and prints the result
//! as JSON on stdout.

use db_cluster::config::{Command, Config};
use db_cluster::db::{
    Activator, AdapterRegistry, Context, LogicalDatabase, Repository, Scope, open,
};
use db_cluster::error::DbResult;
use db_cluster::models::Param;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries the command output
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn activator_for(config: &Config) -> Result<Activator, String> {
    let mut activator = Activator::new().pool(config.pool_options()?);
    if let Some(interval) = config.heartbeat_interval() {
        activator = activator.heartbeat(interval);
    }
    if config.profile {
        activator = activator.profile(Some(config.slow_query_threshold()));
    }
    if let Command::Lock { name, timeout, .. } = &config.command {
        activator = activator.exclusive(name.clone(), Duration::from_secs(*timeout));
    }
    Ok(activator)
}

async fn run(
    command: &Command,
    db: &Arc<dyn LogicalDatabase>,
    ctx: &Context,
) -> DbResult<serde_json::Value> {
    let params: Vec<Param> = command.params();

    match command {
        Command::Ping => {
            db.ping(ctx).await?;
            Ok(json!({ "status": "ok", "nodes": db.database().node_count() }))
        }
        Command::Exec { sql, .. } => {
            let repository = Repository::new(Arc::clone(db));
            let result = repository
                .transaction(ctx, |ctx, scope| {
                    let params = &params;
                    async move { scope.exec(&ctx, sql, params).await }
                })
                .await?;
            Ok(json!(result))
        }
        Command::Query { sql, .. } => {
            let records = db.query(ctx, sql, &params).await?;
            Ok(json!(records))
        }
        Command::Lock { name, hold, .. } => {
            info!(lock = %name, hold_secs = hold, "Holding lock");
            tokio::time::sleep(Duration::from_secs(*hold)).await;
            Ok(json!({ "lock": name, "held_secs": hold }))
        }
        Command::Stats => {
            db.ping(ctx).await?;
            let database = db.database();
            Ok(json!({
                "cluster_id": database.cluster_id(),
                "driver": database.adapter().name(),
                "metrics": database.metrics().snapshot(),
                "pools": database.pool_status(),
            }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(
        nodes = config.nodes.len(),
        "Starting db-cluster v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = AdapterRegistry::with_defaults();
    let cluster = config.cluster()?;
    let activator = activator_for(&config)?;
    let db = open(&registry, &cluster, Some(&activator)).await?;

    let ctx = Context::new().with_timeout(config.query_timeout_duration());
    let result = run(&config.command, &db, &ctx).await;
    let closed = db.close().await;

    match result {
        Ok(output) => println!("{}", serde_json::to_string_pretty(&output)?),
        Err(e) => {
            error!(error = %e, "Command failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {suggestion}");
            }
            return Err(e.into());
        }
    }
    closed?;
    Ok(())
}
