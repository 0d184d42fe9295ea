//! Workouts and their exercises.
//!
//! [`store::WorkoutStore`] owns the local cache; [`reconcile`] holds the pure
//! transitions it applies once the backend has confirmed a change.

pub mod reconcile;
pub mod store;
pub mod types;

pub use store::WorkoutStore;
pub use types::{
    Exercise, ExerciseDraft, ExercisePatch, Workout, WorkoutDraft, WorkoutPatch, WorkoutsState,
};
