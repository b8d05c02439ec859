//! Integration tests for the deadlock-retry runner.
//!
//! Deadlocks are simulated by returning SQLite's SQLITE_BUSY from the unit of work after it
//! has written, so each failed attempt also checks that its writes were rolled back.

use db_cluster::db::{
    AdapterRegistry, Context, LogicalDatabase, MAX_TRANSACTION_ATTEMPTS, Repository, Scope, open,
};
use db_cluster::error::DbError;
use db_cluster::models::{Cluster, ClusterId, DataSource, Param};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

async fn open_db(dir: &TempDir) -> Arc<dyn LogicalDatabase> {
    let path = dir.path().join("repo.db");
    let cluster = Cluster::new(
        ClusterId(1),
        "sqlite",
        vec![DataSource::sqlite(path.to_string_lossy())],
    )
    .unwrap();
    let db = open(&AdapterRegistry::with_defaults(), &cluster, None)
        .await
        .unwrap();
    db.exec(&Context::new(), "CREATE TABLE jobs (attempt INTEGER)", &[])
        .await
        .unwrap();
    db
}

fn busy() -> DbError {
    DbError::database("database is locked", Some("5".to_string()), "Retry later")
}

async fn job_count(db: &Arc<dyn LogicalDatabase>) -> i64 {
    db.query_row(&Context::new(), "SELECT COUNT(*) AS n FROM jobs", &[])
        .await
        .unwrap()
        .unwrap()
        .get_i64("n")
        .unwrap()
}

#[tokio::test]
async fn test_retries_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let repo = Repository::new(Arc::clone(&db));

    for deadlocks in [0usize, 1, 4] {
        db.exec(&Context::new(), "DELETE FROM jobs", &[]).await.unwrap();
        let attempts = AtomicUsize::new(0);
        let attempts = &attempts;

        let value = repo
            .transaction(&Context::new(), |ctx, scope| async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                scope
                    .exec(
                        &ctx,
                        "INSERT INTO jobs (attempt) VALUES (?)",
                        &[Param::from(attempt as i64)],
                    )
                    .await?;
                if attempt <= deadlocks {
                    return Err(busy());
                }
                Ok::<_, DbError>(attempt)
            })
            .await
            .unwrap();

        assert_eq!(value, deadlocks + 1);
        assert_eq!(attempts.load(Ordering::SeqCst), deadlocks + 1);
        assert_eq!(job_count(&db).await, 1, "failed attempts must be rolled back");
    }
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_other_errors_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let repo = Repository::new(Arc::clone(&db));
    let attempts = AtomicUsize::new(0);
    let attempts = &attempts;

    let result = repo
        .transaction(&Context::new(), |ctx, scope| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            scope
                .exec(&ctx, "INSERT INTO jobs (attempt) VALUES (1)", &[])
                .await?;
            scope.exec(&ctx, "INSERT INTO missing VALUES (1)", &[]).await
        })
        .await;

    assert!(matches!(result, Err(DbError::Database { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(job_count(&db).await, 0);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_return_last_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let repo = Repository::new(Arc::clone(&db)).with_max_attempts(3);
    let attempts = AtomicUsize::new(0);
    let attempts = &attempts;

    let result = repo
        .transaction(&Context::new(), |_ctx, _scope| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(busy())
        })
        .await;

    match result {
        Err(err) => assert_eq!(err.sql_state(), Some("5")),
        Ok(()) => panic!("expected the deadlock to surface"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_default_attempt_limit() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let repo = Repository::new(Arc::clone(&db));
    let attempts = AtomicUsize::new(0);
    let attempts = &attempts;

    let result = repo
        .transaction(&Context::new(), |_ctx, _scope| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(busy())
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), MAX_TRANSACTION_ATTEMPTS);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_expired_deadline_stops_retries() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let repo = Repository::new(Arc::clone(&db));
    let attempts = AtomicUsize::new(0);
    let attempts = &attempts;

    let ctx = Context::new().with_timeout(Duration::from_millis(100));
    let result = repo
        .transaction(&ctx, |_ctx, _scope| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<(), _>(busy())
        })
        .await;

    assert!(result.is_err());
    let made = attempts.load(Ordering::SeqCst);
    assert!((1..MAX_TRANSACTION_ATTEMPTS).contains(&made), "made {made} attempts");
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_nested_deadlock_is_retried_by_the_outermost_runner() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let repo = Repository::new(Arc::clone(&db));
    let repo = &repo;
    let inner_attempts = AtomicUsize::new(0);
    let inner_attempts = &inner_attempts;

    repo.transaction(&Context::new(), |ctx, scope| async move {
        scope
            .exec(&ctx, "INSERT INTO jobs (attempt) VALUES (0)", &[])
            .await?;
        repo.transaction(&ctx, |_ctx, _scope| async move {
            if inner_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(busy());
            }
            Ok::<_, DbError>(())
        })
        .await
    })
    .await
    .unwrap();

    // the nested runner gave up immediately; the outer one replayed everything
    assert_eq!(inner_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(job_count(&db).await, 1);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_panicking_unit_is_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;

    let repo = Repository::new(Arc::clone(&db));
    let task = tokio::spawn(async move {
        repo.transaction(&Context::new(), |ctx, scope| async move {
            scope
                .exec(&ctx, "INSERT INTO jobs (attempt) VALUES (1)", &[])
                .await?;
            if scope.cluster_id() == ClusterId(1) {
                panic!("unit of work failed");
            }
            Ok::<_, DbError>(())
        })
        .await
    });
    assert!(task.await.unwrap_err().is_panic());

    // the guard's rollback runs on a spawned task; only an explicit rollback records a
    // transaction sample, a driver-side discard does not
    let mut finished = db.metrics().snapshot().transaction_count;
    for _ in 0..50 {
        if finished == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        finished = db.metrics().snapshot().transaction_count;
    }
    assert_eq!(finished, 1);
    assert_eq!(job_count(&db).await, 0);
    db.close().await.unwrap();
}
