//! Integration tests for cover uploads.

use std::time::Duration;

use fitsync::gateway::memory::GatewayOp;
use fitsync::gateway::{Bucket, Collection};
use fitsync::workouts::{ExerciseDraft, WorkoutDraft};
use fitsync::StoreError;

use crate::support::{image_file, workout_store};

#[tokio::test]
async fn test_create_then_cover() {
    let (gateway, _snapshots, store) = workout_store();
    let dir = tempfile::tempdir().unwrap();

    let workout = store.create_workout(WorkoutDraft::new("u1", "Leg Day")).await.unwrap();
    assert!(workout.id > 0);
    assert!(workout.cover.is_none());

    let url = store
        .upload_workout_cover(workout.id, &image_file(&dir, "legs.jpg"), "image/jpeg")
        .await
        .unwrap();

    let cached = store.get_workout_by_id(workout.id).unwrap();
    assert_eq!(cached.cover.as_deref(), Some(url.as_str()));

    let paths = gateway.object_paths(Bucket::Workouts);
    assert_eq!(paths.len(), 1);
    assert!(paths[0].starts_with(&format!("workouts/{}-", workout.id)));
    assert!(paths[0].ends_with(".jpeg"));
    assert!(url.ends_with(&paths[0]));

    let row = &gateway.rows(Collection::Workouts)[0];
    assert_eq!(row["cover"], url.as_str());
}

#[tokio::test]
async fn test_failed_upload_binds_nothing() {
    let (gateway, _snapshots, store) = workout_store();
    let dir = tempfile::tempdir().unwrap();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Arms")).await.unwrap();

    gateway.fail_next(GatewayOp::Upload);
    let url = store
        .upload_workout_cover(workout.id, &image_file(&dir, "arms.png"), "image/png")
        .await;

    assert!(url.is_none());
    assert!(store.get_workout_by_id(workout.id).unwrap().cover.is_none());
    assert!(store.error().unwrap().starts_with("Upload failed"));
    assert_eq!(gateway.call_count(GatewayOp::Update), 0);
}

#[tokio::test]
async fn test_missing_file_binds_nothing() {
    let (gateway, _snapshots, store) = workout_store();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Back")).await.unwrap();

    let result = store
        .try_upload_workout_cover(workout.id, "file:///no/such/image.jpg", "image/jpeg")
        .await;

    assert!(matches!(result, Err(StoreError::Upload(_))));
    assert_eq!(gateway.call_count(GatewayOp::Upload), 0);
    assert!(store.get_workout_by_id(workout.id).unwrap().cover.is_none());
}

#[tokio::test]
async fn test_failed_binding_removes_orphan() {
    let (gateway, _snapshots, store) = workout_store();
    let dir = tempfile::tempdir().unwrap();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Chest")).await.unwrap();

    gateway.fail_next(GatewayOp::Update);
    let result = store
        .try_upload_workout_cover(workout.id, &image_file(&dir, "chest.jpg"), "image/jpeg")
        .await;

    assert!(matches!(result, Err(StoreError::Upload(_))));
    assert!(store.get_workout_by_id(workout.id).unwrap().cover.is_none());
    assert_eq!(gateway.call_count(GatewayOp::Remove), 1);
    assert!(gateway.object_paths(Bucket::Workouts).is_empty());
    assert!(!store.is_loading());
}

#[tokio::test]
async fn test_failed_compensation_is_not_surfaced() {
    let (gateway, _snapshots, store) = workout_store();
    let dir = tempfile::tempdir().unwrap();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Core")).await.unwrap();

    gateway.fail_next(GatewayOp::Update);
    gateway.fail_next(GatewayOp::Remove);
    let result = store
        .try_upload_workout_cover(workout.id, &image_file(&dir, "core.jpg"), "image/jpeg")
        .await;

    assert!(matches!(result, Err(StoreError::Upload(ref msg)) if msg.contains("Mutation failed")));
    assert_eq!(gateway.object_paths(Bucket::Workouts).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bind_timeout_keeps_object_the_row_may_reference() {
    let (gateway, _snapshots, store) = workout_store();
    let dir = tempfile::tempdir().unwrap();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Glutes")).await.unwrap();

    // The backend applies the patch but answers after the request timeout.
    gateway.stall_after_commit(GatewayOp::Update, Some(Duration::from_secs(5)));
    let result = store
        .try_upload_workout_cover(workout.id, &image_file(&dir, "glutes.jpg"), "image/jpeg")
        .await;

    assert!(matches!(result, Err(StoreError::Upload(ref msg)) if msg.contains("timed out")));
    assert_eq!(gateway.call_count(GatewayOp::Remove), 0);

    let paths = gateway.object_paths(Bucket::Workouts);
    assert_eq!(paths.len(), 1);
    let row = &gateway.rows(Collection::Workouts)[0];
    assert!(row["cover"].as_str().unwrap().ends_with(&paths[0]));
    assert!(!store.is_loading());
}

#[tokio::test]
async fn test_repeated_uploads_use_distinct_paths() {
    let (gateway, _snapshots, store) = workout_store();
    let dir = tempfile::tempdir().unwrap();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Full Body")).await.unwrap();
    let uri = image_file(&dir, "body.jpg");

    let first = store.upload_workout_cover(workout.id, &uri, "image/jpeg").await.unwrap();
    let second = store.upload_workout_cover(workout.id, &uri, "image/jpeg").await.unwrap();

    assert_ne!(first, second);
    assert_eq!(gateway.object_paths(Bucket::Workouts).len(), 2);
    assert_eq!(
        store.get_workout_by_id(workout.id).unwrap().cover.as_deref(),
        Some(second.as_str())
    );
}

#[tokio::test]
async fn test_exercise_cover_and_delete() {
    let (gateway, _snapshots, store) = workout_store();
    let dir = tempfile::tempdir().unwrap();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Pull")).await.unwrap();
    let exercise = store
        .create_exercise(ExerciseDraft::new(workout.id, "Chin-up"))
        .await
        .unwrap();

    let url = store
        .upload_exercise_cover(exercise.id, &image_file(&dir, "chin.webp"), "image/webp")
        .await
        .unwrap();

    let cached = store.get_exercises_by_workout_id(workout.id);
    assert_eq!(cached[0].cover.as_deref(), Some(url.as_str()));
    assert!(gateway.object_paths(Bucket::Exercises)[0].starts_with("exercises/"));

    store.delete_exercise_cover(&url).await.unwrap();
    assert!(gateway.object_paths(Bucket::Exercises).is_empty());
}
