//! Integration tests for exports.

use std::sync::Arc;

use fitsync::export::{ExportClient, ExportDocument, ExportError, DAILY_REPORT_PROCEDURE};
use fitsync::gateway::memory::GatewayOp;
use fitsync::gateway::InMemoryGateway;
use fitsync::workouts::{ExerciseDraft, WorkoutDraft};
use serde_json::json;

use crate::support::{settings, workout_store};

#[tokio::test]
async fn test_local_document_matches_cache() {
    let (_gateway, _snapshots, store) = workout_store();
    let push = store.create_workout(WorkoutDraft::new("u1", "Push")).await.unwrap();
    store.create_workout(WorkoutDraft::new("u1", "Pull")).await.unwrap();
    for name in ["Bench", "Dips", "Press"] {
        store
            .create_exercise(ExerciseDraft::new(push.id, name))
            .await
            .unwrap();
    }

    let workouts = store.fetch_workouts("u1").await.unwrap();
    let document = ExportDocument::from_workouts("u1", &workouts);

    assert_eq!(document.total_workouts, 2);
    assert_eq!(document.total_exercises, 3);
    assert_eq!(document.workouts[0].name, "Pull");
    assert_eq!(document.workouts[1].exercises_count, 3);

    let parsed: ExportDocument = serde_json::from_str(&document.to_json_pretty().unwrap()).unwrap();
    assert_eq!(parsed, document);
}

#[tokio::test]
async fn test_daily_report() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.register_procedure(
        DAILY_REPORT_PROCEDURE,
        json!({
            "success": true,
            "date": "2025-03-01T23:59:00.000Z",
            "workouts_created": 4,
            "exercises_created": 11,
            "message": "Daily report: 4 workouts, 11 exercises"
        }),
    );
    let client = ExportClient::new(gateway, &settings());

    let report = client.daily_report().await.unwrap();
    assert_eq!(report.workouts_created, 4);
    assert_eq!(report.exercises_created, 11);
    assert!(report.success);
}

#[tokio::test]
async fn test_export_failure_tracked() {
    let gateway = Arc::new(InMemoryGateway::new());
    let client = ExportClient::new(Arc::clone(&gateway), &settings());

    let err = client.export_workouts(None).await.unwrap_err();
    assert!(matches!(err, ExportError::Remote(_)));
    assert!(client.export_error().is_some());
    assert!(!client.is_exporting());

    gateway.fail_next(GatewayOp::Invoke);
    assert!(client.export_workouts(Some(1)).await.is_err());
    assert_eq!(gateway.call_count(GatewayOp::Invoke), 2);
}
