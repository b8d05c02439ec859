//! Integration tests for operations that fan out to every node.

use db_cluster::config::PoolOptions;
use db_cluster::db::adapter::SqliteAdapter;
use db_cluster::db::{Context, Database, DbPool};
use db_cluster::error::DbError;
use db_cluster::models::DatabaseType;
use std::sync::Arc;
use tempfile::TempDir;

async fn file_pools(dir: &TempDir, count: usize) -> Vec<DbPool> {
    let mut pools = Vec::new();
    for node in 0..count {
        let url = format!("sqlite:{}", dir.path().join(format!("node-{node}.db")).display());
        pools.push(
            DbPool::connect(DatabaseType::SQLite, &url, &PoolOptions::default())
                .await
                .unwrap(),
        );
    }
    pools
}

#[tokio::test]
async fn test_ping_reports_failed_node_after_trying_all() {
    let dir = tempfile::tempdir().unwrap();
    let pools = file_pools(&dir, 3).await;
    pools[2].close().await;

    let db = Database::from_pools(1, Arc::new(SqliteAdapter), pools).unwrap();
    let result = db.ping(&Context::new()).await;
    assert!(matches!(result, Err(DbError::Connection { .. })));

    // the healthy nodes were still reached
    db.nodes()[0].ping().await.unwrap();
    db.nodes()[1].ping().await.unwrap();
    assert!(!db.nodes()[0].is_closed());
}

#[tokio::test]
async fn test_ping_healthy_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::from_pools(1, Arc::new(SqliteAdapter), file_pools(&dir, 3).await).unwrap();
    db.ping(&Context::new()).await.unwrap();
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_close_reaches_every_node() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::from_pools(1, Arc::new(SqliteAdapter), file_pools(&dir, 3).await).unwrap();

    let status = db.pool_status();
    assert_eq!(status.len(), 3);
    assert!(status.iter().all(|s| s.size >= 1 && !s.closed));

    db.close().await.unwrap();
    assert!(db.is_closed());
    assert!(db.pool_status().iter().all(|s| s.closed));
    assert!(db.nodes().iter().all(DbPool::is_closed));
}

#[tokio::test]
async fn test_open_closes_opened_nodes_when_one_fails() {
    use db_cluster::db::AdapterRegistry;
    use db_cluster::models::{Cluster, ClusterId, DataSource};

    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.db");
    // a directory cannot be opened as a database file
    let bad = dir.path().to_path_buf();
    let cluster = Cluster::new(
        ClusterId(1),
        "sqlite",
        vec![
            DataSource::sqlite(good.to_string_lossy()),
            DataSource::sqlite(bad.to_string_lossy()),
        ],
    )
    .unwrap();

    let result = Database::open(
        &AdapterRegistry::with_defaults(),
        &cluster,
        &PoolOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(DbError::Connection { .. })));
}

#[tokio::test]
async fn test_unknown_driver_is_rejected() {
    use db_cluster::db::AdapterRegistry;
    use db_cluster::models::{Cluster, ClusterId, DataSource};

    let cluster = Cluster::new(ClusterId(1), "oracle", vec![DataSource::new("db", "x")]).unwrap();
    let result = Database::open(
        &AdapterRegistry::with_defaults(),
        &cluster,
        &PoolOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(DbError::UnknownDriver { driver }) if driver == "oracle"));
}
