//! End-to-end backup and restore over the filesystem collection store.

use bytes::Bytes;
use registra_backup::{
    ArchiveStatus, BackupConfig, BackupError, BackupOrchestrator, Frequency, RetentionPolicy,
};
use registra_store::{CollectionStore, LocalCollectionStore, StagedRestore};
use std::sync::Arc;
use tempfile::TempDir;

const COLLECTIONS: [&str; 3] = ["users", "students", "courses"];

async fn seed(store: &LocalCollectionStore, datasets: &[(&str, &[&[u8]])]) {
    let mut staging = store.begin_staging().await.unwrap();
    for (name, records) in datasets {
        let records: Vec<Bytes> = records.iter().map(|r| Bytes::copy_from_slice(r)).collect();
        staging.stage_collection(name, records).await.unwrap();
    }
    staging.commit().await.unwrap();
}

fn config(root: &TempDir) -> BackupConfig {
    BackupConfig {
        backup_dir: root.path().join("backups"),
        collections: COLLECTIONS.iter().map(|c| c.to_string()).collect(),
        retention: RetentionPolicy {
            max_count: Some(5),
            max_age_days: None,
        },
        schedule: Frequency::Daily,
        ..BackupConfig::default()
    }
}

async fn read_all(store: &LocalCollectionStore) -> Vec<(String, Vec<Bytes>)> {
    let mut out = Vec::new();
    for name in COLLECTIONS {
        out.push((name.to_string(), store.read_collection(name).await.unwrap()));
    }
    out
}

#[tokio::test]
async fn full_backup_and_restore_round_trip() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(LocalCollectionStore::open(root.path().join("data")).await.unwrap());
    seed(
        &store,
        &[
            ("users", &[b"alice".as_slice(), b"bob"]),
            ("students", &[b"s-1001".as_slice()]),
            ("courses", &[b"algebra".as_slice(), b"greek", b"rhetoric"]),
        ],
    )
    .await;
    let before = read_all(&store).await;

    let orchestrator = BackupOrchestrator::new(store.clone(), config(&root)).await.unwrap();
    let id = orchestrator.perform_full_backup().await.unwrap();

    let archives = orchestrator.list_backups().await;
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].id, id);
    assert_eq!(archives[0].status, ArchiveStatus::Complete);
    assert_eq!(archives[0].record_counts.get("courses"), Some(&3));

    // Overwrite the live dataset, then roll back.
    seed(&store, &[("users", &[b"mallory".as_slice()])]).await;
    assert_eq!(store.read_collection("users").await.unwrap().len(), 1);

    orchestrator.restore_from_backup(&id).await.unwrap();
    assert_eq!(read_all(&store).await, before);

    // Immediate re-run lands in the same state.
    orchestrator.restore_from_backup(&id).await.unwrap();
    assert_eq!(read_all(&store).await, before);
}

#[tokio::test]
async fn catalog_rebuilds_from_archive_files_after_index_loss() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(LocalCollectionStore::open(root.path().join("data")).await.unwrap());
    seed(&store, &[("users", &[b"alice".as_slice()])]).await;

    let first;
    let second;
    {
        let orchestrator = BackupOrchestrator::new(store.clone(), config(&root)).await.unwrap();
        first = orchestrator.perform_full_backup().await.unwrap();
        second = orchestrator.perform_full_backup().await.unwrap();
    }

    // Lose the index; the archive files are self-describing.
    tokio::fs::remove_file(root.path().join("backups").join("catalog.json"))
        .await
        .unwrap();

    let orchestrator = BackupOrchestrator::new(store.clone(), config(&root)).await.unwrap();
    let ids: Vec<_> = orchestrator
        .list_backups()
        .await
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec![second.clone(), first]);

    // A rebuilt catalog still restores.
    orchestrator.restore_from_backup(&second).await.unwrap();
}

#[tokio::test]
async fn restore_of_unknown_archive_fails_not_found() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(LocalCollectionStore::open(root.path().join("data")).await.unwrap());
    let orchestrator = BackupOrchestrator::new(store, config(&root)).await.unwrap();

    match orchestrator.restore_from_backup("backup-20200101000000000000").await {
        Err(BackupError::NotFound(id)) => assert_eq!(id, "backup-20200101000000000000"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn tampered_archive_is_refused_and_live_data_kept() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(LocalCollectionStore::open(root.path().join("data")).await.unwrap());
    seed(&store, &[("users", &[b"alice".as_slice(), b"bob"])]).await;

    let orchestrator = BackupOrchestrator::new(store.clone(), config(&root)).await.unwrap();
    let id = orchestrator.perform_full_backup().await.unwrap();

    let path = root.path().join("backups").join(format!("{id}.rga"));
    let mut raw = tokio::fs::read(&path).await.unwrap();
    let mid = raw.len() / 2;
    raw[mid] ^= 0x80;
    tokio::fs::write(&path, raw).await.unwrap();

    assert!(matches!(
        orchestrator.restore_from_backup(&id).await,
        Err(BackupError::Corrupt(_))
    ));
    assert_eq!(store.read_collection("users").await.unwrap().len(), 2);
    assert_eq!(
        orchestrator.list_backups().await[0].status,
        ArchiveStatus::Corrupt
    );
}

#[tokio::test]
async fn scheduler_start_and_stop() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(LocalCollectionStore::open(root.path().join("data")).await.unwrap());
    let orchestrator = BackupOrchestrator::new(store, config(&root)).await.unwrap();

    orchestrator.start_scheduler().await.unwrap();
    // The orchestrator owns one scheduler; a second start is rejected.
    assert!(orchestrator.start_scheduler().await.is_err());

    orchestrator.stop_scheduler().await;
}
