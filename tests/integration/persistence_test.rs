//! Integration tests for snapshot persistence and configuration.

use std::sync::Arc;

use fitsync::gateway::memory::GatewayOp;
use fitsync::gateway::InMemoryGateway;
use fitsync::storage::config::{load_config_from, save_config_to, AppConfig, PersistenceBackend};
use fitsync::storage::snapshot::{FileSnapshotStore, SnapshotStore, WORKOUTS_KEY};
use fitsync::storage::open_snapshot_store;
use fitsync::workouts::{ExerciseDraft, WorkoutDraft};
use fitsync::WorkoutStore;

use crate::support::{settings, workout_store};

#[tokio::test]
async fn test_snapshot_written_after_each_transition() {
    let (gateway, snapshots, store) = workout_store();
    assert_eq!(snapshots.write_count(), 0);

    let workout = store.create_workout(WorkoutDraft::new("u1", "Push")).await.unwrap();
    assert_eq!(snapshots.write_count(), 1);

    store
        .create_exercise(ExerciseDraft::new(workout.id, "Dips"))
        .await
        .unwrap();
    assert_eq!(snapshots.write_count(), 2);

    gateway.fail_next(GatewayOp::Delete);
    assert!(store.delete_workout_db(workout.id).await.is_err());
    assert_eq!(snapshots.write_count(), 2);

    let saved = snapshots.get(WORKOUTS_KEY).unwrap();
    assert!(saved.contains("Dips"));
    assert!(!saved.contains("is_loading"));
}

#[tokio::test]
async fn test_new_store_restores_file_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(InMemoryGateway::new());
    let snapshots: Arc<dyn SnapshotStore> =
        Arc::new(FileSnapshotStore::new(dir.path().join("state")));

    let store = WorkoutStore::new(Arc::clone(&gateway), Arc::clone(&snapshots), &settings());
    let workout = store.create_workout(WorkoutDraft::new("u1", "Legs")).await.unwrap();
    store.select_workout(Some(workout.clone()));
    drop(store);

    let restored = WorkoutStore::new(gateway, snapshots, &settings());
    assert_eq!(restored.workouts(), vec![workout.clone()]);
    assert_eq!(restored.selected_workout(), Some(workout));
    assert!(restored.error().is_none());
    assert!(!restored.is_loading());
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = Arc::new(FileSnapshotStore::new(dir.path().to_path_buf()));
    snapshots.save(WORKOUTS_KEY, "{ not json").unwrap();

    let store = WorkoutStore::new(Arc::new(InMemoryGateway::new()), snapshots, &settings());
    assert!(store.workouts().is_empty());
}

#[tokio::test]
async fn test_configured_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut app_config = AppConfig::default();
    app_config.persistence.backend = PersistenceBackend::File;
    save_config_to(&app_config, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    let snapshots = open_snapshot_store(&loaded.persistence, loaded.data_dir.clone());
    let store = WorkoutStore::new(Arc::new(InMemoryGateway::new()), snapshots, &loaded.sync);
    store.create_workout(WorkoutDraft::new("u1", "Row")).await.unwrap();

    let written = dir.path().join("state").join(format!("{}.json", WORKOUTS_KEY));
    assert!(written.exists());
}
