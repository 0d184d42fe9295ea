//! Workout and exercise records, drafts and patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cover image fields.
///
/// A missing cover is `None` in memory. The backend column stores the string
/// `"uninitialized"` for it, so that value (and empty or null) reads as `None`
/// and `None` is written back as `"uninitialized"`.
pub mod cover {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Backend placeholder for "no cover uploaded yet".
    pub const UNINITIALIZED: &str = "uninitialized";

    /// Normalize a raw column value.
    pub fn from_raw(raw: Option<String>) -> Option<String> {
        raw.filter(|value| !value.is_empty() && value != UNINITIALIZED)
    }

    pub fn serialize<S>(cover: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(cover.as_deref().unwrap_or(UNINITIALIZED))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(from_raw(raw))
    }

    /// Patch form: only called when the field is present.
    pub fn serialize_patch<S>(
        cover: &Option<Option<String>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match cover {
            Some(inner) => serialize(inner, serializer),
            None => serializer.serialize_none(),
        }
    }
}

/// A workout owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    /// Server-assigned id
    pub id: i64,
    /// Owner (auth user id)
    pub user_id: String,
    /// Display name
    pub name: String,
    /// Public URL of the cover image
    #[serde(with = "cover", default)]
    pub cover: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Exercises belonging to this workout
    #[serde(default)]
    pub exercises: Vec<Exercise>,
}

impl Workout {
    /// Number of exercises currently cached.
    pub fn exercise_count(&self) -> usize {
        self.exercises.len()
    }

    /// Whether a cover image has been bound.
    pub fn has_cover(&self) -> bool {
        self.cover.is_some()
    }
}

/// An exercise inside a workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    /// Server-assigned id
    pub id: i64,
    /// Owning workout
    pub workout_id: i64,
    /// Display name
    pub name: String,
    /// Public URL of the cover image
    #[serde(with = "cover", default)]
    pub cover: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Fields sent when creating a workout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutDraft {
    pub user_id: String,
    pub name: String,
    #[serde(with = "cover")]
    pub cover: Option<String>,
}

impl WorkoutDraft {
    /// Draft without a cover; one can be uploaded once the id is known.
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            cover: None,
        }
    }
}

/// Partial update of a workout. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkoutPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `Some(None)` clears the cover.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "cover::serialize_patch"
    )]
    pub cover: Option<Option<String>>,
}

impl WorkoutPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn cover(url: impl Into<String>) -> Self {
        Self {
            cover: Some(Some(url.into())),
            ..Default::default()
        }
    }
}

/// Fields sent when creating an exercise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExerciseDraft {
    pub workout_id: i64,
    pub name: String,
    #[serde(with = "cover")]
    pub cover: Option<String>,
}

impl ExerciseDraft {
    pub fn new(workout_id: i64, name: impl Into<String>) -> Self {
        Self {
            workout_id,
            name: name.into(),
            cover: None,
        }
    }
}

/// Partial update of an exercise. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExercisePatch {
    /// Moves the exercise to another workout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "cover::serialize_patch"
    )]
    pub cover: Option<Option<String>>,
}

impl ExercisePatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn cover(url: impl Into<String>) -> Self {
        Self {
            cover: Some(Some(url.into())),
            ..Default::default()
        }
    }
}

/// Persisted and observable state of the workout store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutsState {
    /// Workouts, most recent first
    #[serde(default)]
    pub workouts: Vec<Workout>,
    /// Workout opened in a detail view, independent of the list
    #[serde(default)]
    pub selected_workout: Option<Workout>,
    /// Last remote error message
    #[serde(skip)]
    pub error: Option<String>,
}
