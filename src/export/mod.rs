//! Workout export.
//!
//! [`ExportClient`] asks the backend to build and host an export file. The
//! same document can also be produced locally from cached workouts with
//! [`ExportDocument::from_workouts`].

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::gateway::{decode_row, with_timeout, Gateway, GatewayError};
use crate::loading::LoadingCounter;
use crate::storage::config::SyncSettings;
use crate::workouts::types::{cover, Exercise, Workout};

/// Remote procedure building an export file.
pub const EXPORT_PROCEDURE: &str = "export-workout";
/// Remote procedure counting today's activity.
pub const DAILY_REPORT_PROCEDURE: &str = "daily-workout-count";

/// Export errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Export failed: {0}")]
    Remote(String),

    #[error("Unexpected export response: {0}")]
    Decode(String),
}

impl From<GatewayError> for ExportError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthenticated => ExportError::NotAuthenticated,
            GatewayError::Decode(message) => ExportError::Decode(message),
            other => ExportError::Remote(other.to_string()),
        }
    }
}

/// Result of a remote export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutcome {
    /// Time-limited download link
    pub download_url: String,
    pub total_workouts: u32,
    pub total_exercises: u32,
    /// Object path of the export file
    pub file_path: String,
}

/// Result of the daily activity report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReport {
    #[serde(default)]
    pub success: bool,
    pub date: DateTime<Utc>,
    pub workouts_created: u32,
    pub exercises_created: u32,
    #[serde(default)]
    pub message: String,
}

/// Calls the export procedures and tracks their progress.
pub struct ExportClient<G: Gateway> {
    gateway: Arc<G>,
    exporting: LoadingCounter,
    export_error: RwLock<Option<String>>,
    timeout: Duration,
}

impl<G: Gateway> ExportClient<G> {
    pub fn new(gateway: Arc<G>, settings: &SyncSettings) -> Self {
        Self {
            gateway,
            exporting: LoadingCounter::new(),
            export_error: RwLock::new(None),
            timeout: settings.request_timeout(),
        }
    }

    /// Export one workout, or all of the user's workouts when `workout_id` is `None`.
    pub async fn export_workouts(
        &self,
        workout_id: Option<i64>,
    ) -> Result<ExportOutcome, ExportError> {
        let _exporting = self.exporting.begin();
        *self.export_error.write() = None;

        let payload = match workout_id {
            Some(id) => json!({ "workout_id": id }),
            None => json!({}),
        };

        match self.invoke::<ExportOutcome>(EXPORT_PROCEDURE, payload).await {
            Ok(outcome) => {
                tracing::info!(
                    "Exported {} workouts ({} exercises) to {}",
                    outcome.total_workouts,
                    outcome.total_exercises,
                    outcome.file_path
                );
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!("{}", err);
                *self.export_error.write() = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Ask the backend for today's workout and exercise counts.
    pub async fn daily_report(&self) -> Result<DailyReport, ExportError> {
        self.invoke(DAILY_REPORT_PROCEDURE, json!({})).await
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting.is_loading()
    }

    /// Message of the last failed export, cleared when the next one starts.
    pub fn export_error(&self) -> Option<String> {
        self.export_error.read().clone()
    }

    async fn invoke<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
        payload: Value,
    ) -> Result<T, ExportError> {
        let response = with_timeout(self.timeout, self.gateway.invoke(name, payload)).await?;
        if let Some(message) = response.get("error").and_then(Value::as_str) {
            return Err(ExportError::Remote(message.to_string()));
        }
        Ok(decode_row(response)?)
    }
}

/// One workout inside an export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedWorkout {
    pub id: i64,
    pub name: String,
    #[serde(with = "cover", default)]
    pub cover: Option<String>,
    pub created_at: DateTime<Utc>,
    pub exercises_count: usize,
    pub exercises: Vec<Exercise>,
}

/// Export file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub user_id: String,
    pub total_workouts: usize,
    pub total_exercises: usize,
    pub workouts: Vec<ExportedWorkout>,
}

impl ExportDocument {
    /// Build the document from cached workouts, keeping their order.
    pub fn from_workouts(user_id: &str, workouts: &[Workout]) -> Self {
        let workouts: Vec<ExportedWorkout> = workouts
            .iter()
            .map(|w| ExportedWorkout {
                id: w.id,
                name: w.name.clone(),
                cover: w.cover.clone(),
                created_at: w.created_at,
                exercises_count: w.exercises.len(),
                exercises: w.exercises.clone(),
            })
            .collect();

        Self {
            exported_at: Utc::now(),
            user_id: user_id.to_string(),
            total_workouts: workouts.len(),
            total_exercises: workouts.iter().map(|w| w.exercises_count).sum(),
            workouts,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// File name used for this export.
    pub fn file_name(&self, workout_id: Option<i64>) -> String {
        let stamp = self.exported_at.timestamp_millis();
        match workout_id {
            Some(id) => format!("workout-{}-export-{}.json", id, stamp),
            None => format!("workouts-export-{}-{}.json", self.user_id, stamp),
        }
    }
}
