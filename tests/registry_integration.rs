//! Integration tests for the SQLite registry
//!
//! Exercises the registry through the `Registry` port against real
//! database files.

use domain_proxy::{
    BackendSpec, BackendUpdate, Registry, RegistryError, Scheme, SqliteRegistry, ValidationError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn open_in(dir: &TempDir) -> SqliteRegistry {
    let path = dir.path().join("proxy.db");
    SqliteRegistry::open(path.to_str().unwrap()).unwrap()
}

/// Test the full lifecycle of one mapping survives a restart
#[tokio::test]
async fn test_lifecycle_survives_restart() {
    let dir = TempDir::new().unwrap();

    let created = {
        let registry = open_in(&dir);
        let created = registry
            .insert(BackendSpec::new("app.test", "10.0.0.1", 443).with_scheme(Scheme::Https))
            .await
            .unwrap();
        registry
            .update("app.test", BackendUpdate::new("10.0.0.2", 8443, None))
            .await
            .unwrap()
            .unwrap();
        registry.close().unwrap();
        created
    };

    let registry = open_in(&dir);
    let record = registry.lookup("app.test").await.unwrap().unwrap();
    assert_eq!(record.address, "10.0.0.2");
    assert_eq!(record.port, 8443);
    assert_eq!(record.scheme, Scheme::Https);
    assert_eq!(record.created_at, created.created_at);
    assert!(record.updated_at >= created.updated_at);

    registry.delete("app.test").await.unwrap();
    registry.close().unwrap();

    let registry = open_in(&dir);
    assert!(registry.lookup("app.test").await.unwrap().is_none());
    assert!(matches!(
        registry.delete("app.test").await,
        Err(RegistryError::NotFound(_))
    ));
}

/// Test a failed bulk insert leaves nothing behind on disk
#[tokio::test]
async fn test_bulk_insert_is_atomic_on_disk() {
    let dir = TempDir::new().unwrap();

    {
        let registry = open_in(&dir);
        registry
            .insert(BackendSpec::new("taken.test", "10.0.0.1", 80))
            .await
            .unwrap();

        let result = registry
            .bulk_insert(vec![
                BackendSpec::new("new-1.test", "10.0.0.2", 80),
                BackendSpec::new("new-2.test", "10.0.0.3", 80),
                BackendSpec::new("taken.test", "10.0.0.4", 80),
            ])
            .await;
        assert!(matches!(result, Err(RegistryError::DuplicateKey(d)) if d == "taken.test"));
        registry.close().unwrap();
    }

    let registry = open_in(&dir);
    let domains: Vec<String> = registry
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.domain)
        .collect();
    assert_eq!(domains, vec!["taken.test"]);
}

/// Test bulk validation names the offending entry
#[tokio::test]
async fn test_bulk_validation_reports_index() {
    let registry = SqliteRegistry::in_memory().unwrap();

    let err = registry
        .bulk_insert(vec![
            BackendSpec::new("ok.test", "10.0.0.1", 80),
            BackendSpec::new("ok-2.test", "10.0.0.2", 80),
            BackendSpec::new("bad.test", "", 80),
        ])
        .await
        .unwrap_err();

    match err {
        RegistryError::Validation(ValidationError::AtIndex { index, .. }) => assert_eq!(index, 2),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(registry.list_all().await.unwrap().is_empty());
}

/// Test concurrent writers and readers share one registry safely
#[tokio::test]
async fn test_concurrent_writers_and_readers() {
    let dir = TempDir::new().unwrap();
    let registry: Arc<dyn Registry> = Arc::new(open_in(&dir));

    let writers = (0..16).map(|i| {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .insert(BackendSpec::new(
                    format!("d{i:02}.test"),
                    format!("10.0.1.{i}"),
                    8000 + i as u16,
                ))
                .await
        })
    });
    let readers = (0..16).map(|i| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.lookup(&format!("d{i:02}.test")).await })
    });

    let writers: Vec<_> = writers.collect();
    let readers: Vec<_> = readers.collect();

    for writer in writers {
        writer.await.unwrap().unwrap();
    }
    for reader in readers {
        // Each read sees either nothing or the complete record.
        if let Some(record) = reader.await.unwrap().unwrap() {
            assert!(record.address.starts_with("10.0.1."));
        }
    }

    let all = registry.list_all().await.unwrap();
    assert_eq!(all.len(), 16);
    for (i, record) in all.iter().enumerate() {
        assert_eq!(record.domain, format!("d{i:02}.test"));
        assert_eq!(record.port, 8000 + i as u16);
    }
}

/// Test duplicate racing inserts admit exactly one winner
#[tokio::test]
async fn test_racing_duplicate_inserts() {
    let registry: Arc<dyn Registry> = Arc::new(SqliteRegistry::in_memory().unwrap());

    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .insert(BackendSpec::new("race.test", format!("10.0.2.{i}"), 80))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => created += 1,
            Err(RegistryError::DuplicateKey(_)) => duplicates += 1,
            Err(other) => panic!("unexpected: {other:?}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
}

fn batch(prefix: &str, len: usize) -> Vec<BackendSpec> {
    (0..len)
        .map(|i| BackendSpec::new(format!("{prefix}-{i:04}.test"), "10.0.3.1", 80))
        .collect()
}

/// Test readers racing bulk inserts see a whole batch or none of it
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulk_insert_visible_all_or_nothing() {
    const BATCH: usize = 500;

    let dir = TempDir::new().unwrap();
    let registry: Arc<dyn Registry> = Arc::new(open_in(&dir));
    registry
        .insert(BackendSpec::new("taken.test", "10.0.0.1", 80))
        .await
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut rounds = 0;
                while !done.load(Ordering::SeqCst) {
                    // Last entry first: once it shows up, the first must too.
                    let last = registry.lookup("ok-0499.test").await.unwrap();
                    let first = registry.lookup("ok-0000.test").await.unwrap();
                    assert!(last.is_none() || first.is_some());

                    assert!(registry.lookup("fail-0000.test").await.unwrap().is_none());
                    assert!(registry.lookup("fail-0498.test").await.unwrap().is_none());

                    let visible = registry
                        .list_all()
                        .await
                        .unwrap()
                        .iter()
                        .filter(|r| r.domain.starts_with("ok-"))
                        .count();
                    assert!(visible == 0 || visible == BATCH, "partial batch: {visible}");

                    rounds += 1;
                    tokio::task::yield_now().await;
                }
                rounds
            })
        })
        .collect();

    for _ in 0..5 {
        let mut failing = batch("fail", BATCH - 1);
        failing.push(BackendSpec::new("taken.test", "10.0.0.2", 80));
        let result = registry.bulk_insert(failing).await;
        assert!(matches!(result, Err(RegistryError::DuplicateKey(d)) if d == "taken.test"));
    }

    let created = registry.bulk_insert(batch("ok", BATCH)).await.unwrap();
    assert_eq!(created.len(), BATCH);

    // Let the readers observe the committed batch before stopping them.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }

    let all = registry.list_all().await.unwrap();
    assert_eq!(all.len(), BATCH + 1);
    assert!(all.iter().all(|r| !r.domain.starts_with("fail-")));
}
