//! Integration tests for the workout store.

use std::time::Duration;

use fitsync::gateway::memory::GatewayOp;
use fitsync::gateway::{Collection, Gateway, RowId};
use fitsync::workouts::{ExerciseDraft, ExercisePatch, WorkoutDraft, WorkoutPatch};
use fitsync::StoreError;
use serde_json::json;

use crate::support::workout_store;

#[tokio::test]
async fn test_fetch_replaces_wholesale() {
    let (gateway, _snapshots, store) = workout_store();
    let older = gateway
        .seed(
            Collection::Workouts,
            json!({"user_id": "u1", "name": "Older", "cover": "uninitialized"}),
        )
        .unwrap();
    let newer = gateway
        .seed(
            Collection::Workouts,
            json!({"user_id": "u1", "name": "Newer", "cover": "uninitialized"}),
        )
        .unwrap();
    gateway
        .seed(Collection::Workouts, json!({"user_id": "someone-else", "name": "Theirs"}))
        .unwrap();
    gateway
        .seed(Collection::Exercises, json!({"workout_id": older["id"], "name": "Squat"}))
        .unwrap();

    // Stale local entry that the backend no longer has.
    let stale = store.create_workout(WorkoutDraft::new("u1", "Stale")).await.unwrap();
    gateway
        .delete(Collection::Workouts, &RowId::from(stale.id))
        .await
        .unwrap();

    let fetched = store.fetch_workouts("u1").await.unwrap();

    let ids: Vec<i64> = store.workouts().iter().map(|w| w.id).collect();
    assert_eq!(ids, vec![newer["id"].as_i64().unwrap(), older["id"].as_i64().unwrap()]);
    assert_eq!(fetched, store.workouts());
    assert_eq!(store.workouts()[1].exercises.len(), 1);
    assert!(store.workouts().iter().all(|w| w.cover.is_none()));
}

#[tokio::test]
async fn test_failed_update_leaves_cache_identical() {
    let (gateway, _snapshots, store) = workout_store();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Push")).await.unwrap();
    store
        .create_exercise(ExerciseDraft::new(workout.id, "Bench"))
        .await
        .unwrap();
    let before = store.snapshot();

    gateway.fail_next(GatewayOp::Update);
    let result = store
        .update_workout_db(workout.id, WorkoutPatch::name("Push Day"))
        .await;

    assert!(matches!(result, Err(StoreError::Mutation(_))));
    assert_eq!(store.workouts(), before.workouts);
    assert_eq!(store.selected_workout(), before.selected_workout);
    assert!(store.error().is_some());
    assert!(!store.is_loading());
}

#[tokio::test]
async fn test_update_reconciles_list_and_selected() {
    let (_gateway, _snapshots, store) = workout_store();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Push")).await.unwrap();
    store
        .create_exercise(ExerciseDraft::new(workout.id, "Bench"))
        .await
        .unwrap();
    store.fetch_workout_by_id(workout.id).await.unwrap();

    let updated = store
        .update_workout_db(workout.id, WorkoutPatch::name("Push Day"))
        .await
        .unwrap();

    assert_eq!(updated.name, "Push Day");
    assert_eq!(updated.exercises.len(), 1);
    let selected = store.selected_workout().unwrap();
    assert_eq!(selected.name, "Push Day");
    assert_eq!(selected.exercises.len(), 1);
}

#[tokio::test]
async fn test_fetch_by_id_only_fills_selected_slot() {
    let (gateway, _snapshots, store) = workout_store();
    let row = gateway
        .seed(Collection::Workouts, json!({"user_id": "u2", "name": "Shared"}))
        .unwrap();
    let id = row["id"].as_i64().unwrap();

    let workout = store.fetch_workout_by_id(id).await.unwrap();

    assert_eq!(workout.name, "Shared");
    assert_eq!(store.selected_workout().map(|w| w.id), Some(id));
    assert!(store.workouts().is_empty());
    assert!(store.get_workout_by_id(id).is_none());
}

#[tokio::test]
async fn test_delete_removes_nested_data() {
    let (gateway, _snapshots, store) = workout_store();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Legs")).await.unwrap();
    for name in ["Squat", "Lunge"] {
        store
            .create_exercise(ExerciseDraft::new(workout.id, name))
            .await
            .unwrap();
    }
    store.select_workout(store.get_workout_by_id(workout.id));
    assert_eq!(store.get_exercises_by_workout_id(workout.id).len(), 2);

    store.delete_workout_db(workout.id).await.unwrap();

    assert!(store.get_workout_by_id(workout.id).is_none());
    assert!(store.get_exercises_by_workout_id(workout.id).is_empty());
    assert!(store.selected_workout().is_none());
    assert!(gateway.rows(Collection::Exercises).is_empty());
}

#[tokio::test]
async fn test_exercise_lifecycle() {
    let (_gateway, _snapshots, store) = workout_store();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Pull")).await.unwrap();

    let row = store
        .create_exercise(ExerciseDraft::new(workout.id, "Row"))
        .await
        .unwrap();
    let curl = store
        .create_exercise(ExerciseDraft::new(workout.id, "Curl"))
        .await
        .unwrap();

    let renamed = store
        .update_exercise_db(row.id, ExercisePatch::name("Barbell Row"))
        .await
        .unwrap();
    assert_eq!(renamed.name, "Barbell Row");

    store.delete_exercise_db(curl.id).await.unwrap();

    let names: Vec<String> = store
        .get_exercises_by_workout_id(workout.id)
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["Barbell Row".to_string()]);

    let fetched = store.fetch_exercises(workout.id).await.unwrap();
    assert_eq!(fetched.len(), 1);
}

#[tokio::test]
async fn test_exercise_move_keeps_back_references() {
    let (_gateway, _snapshots, store) = workout_store();
    let from = store.create_workout(WorkoutDraft::new("u1", "A")).await.unwrap();
    let to = store.create_workout(WorkoutDraft::new("u1", "B")).await.unwrap();
    let exercise = store
        .create_exercise(ExerciseDraft::new(from.id, "Plank"))
        .await
        .unwrap();

    let patch = ExercisePatch {
        workout_id: Some(to.id),
        ..Default::default()
    };
    store.update_exercise_db(exercise.id, patch).await.unwrap();

    assert!(store.get_exercises_by_workout_id(from.id).is_empty());
    assert_eq!(store.get_exercises_by_workout_id(to.id).len(), 1);
    for workout in store.workouts() {
        assert!(workout.exercises.iter().all(|e| e.workout_id == workout.id));
    }
}

#[tokio::test]
async fn test_create_exercise_for_uncached_workout() {
    let (gateway, _snapshots, store) = workout_store();
    let row = gateway
        .seed(Collection::Workouts, json!({"user_id": "u1", "name": "Remote only"}))
        .unwrap();

    let exercise = store
        .create_exercise(ExerciseDraft::new(row["id"].as_i64().unwrap(), "Dip"))
        .await
        .unwrap();

    assert_eq!(exercise.name, "Dip");
    assert!(store.workouts().is_empty());
    assert_eq!(gateway.rows(Collection::Exercises).len(), 1);
}

#[tokio::test]
async fn test_concurrent_creates_are_not_deduplicated() {
    let (_gateway, _snapshots, store) = workout_store();

    let (a, b) = tokio::join!(
        store.create_workout(WorkoutDraft::new("u1", "Same")),
        store.create_workout(WorkoutDraft::new("u1", "Same")),
    );

    assert_ne!(a.unwrap().id, b.unwrap().id);
    assert_eq!(store.workouts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_loading_flag_tracks_in_flight_calls() {
    let (gateway, _snapshots, store) = workout_store();
    gateway.set_latency(Some(Duration::from_millis(100)));

    let (result, loading_midway) = tokio::join!(store.fetch_workouts("u1"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.is_loading()
    });

    result.unwrap();
    assert!(loading_midway);
    assert!(!store.is_loading());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_resets_loading_and_surfaces_error() {
    let (gateway, _snapshots, store) = workout_store();
    store.create_workout(WorkoutDraft::new("u1", "Cached")).await.unwrap();
    gateway.set_latency(Some(Duration::from_secs(5)));

    let result = store.fetch_workouts("u1").await;

    assert!(matches!(result, Err(StoreError::Query(ref msg)) if msg.contains("timed out")));
    assert!(!store.is_loading());
    assert!(store.error().is_some());
    assert_eq!(store.workouts().len(), 1);
}

#[tokio::test]
async fn test_local_actions() {
    let (_gateway, _snapshots, store) = workout_store();
    let workout = store.create_workout(WorkoutDraft::new("u1", "Core")).await.unwrap();

    store.set_workouts(vec![workout.clone(), workout.clone()]);
    assert_eq!(store.workouts().len(), 2);

    store.select_workout(Some(workout));
    store.clear_workouts();
    assert!(store.workouts().is_empty());
    assert!(store.selected_workout().is_none());
}
