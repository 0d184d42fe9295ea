//! Cache reconciliation.
//!
//! Pure transitions of [`WorkoutsState`] applied after the backend confirmed a
//! call. Each takes the confirmed server row and never touches the network.

use crate::workouts::types::{Exercise, Workout, WorkoutsState};

/// Replace the whole list with a fresh server page.
pub fn replace_workouts(state: &mut WorkoutsState, workouts: Vec<Workout>) {
    state.workouts = workouts;
}

/// Put a newly created workout at the head of the list.
pub fn prepend_workout(state: &mut WorkoutsState, workout: Workout) {
    state.workouts.insert(0, workout);
}

/// Store a workout in the detail slot. The list is left alone.
pub fn select(state: &mut WorkoutsState, workout: Option<Workout>) {
    state.selected_workout = workout;
}

/// Apply a confirmed workout row to the list entry and the selected slot.
///
/// The server row carries no nested exercises, so cached ones are kept.
/// Returns `false` if no cached copy exists.
pub fn apply_workout_update(state: &mut WorkoutsState, updated: &Workout) -> bool {
    let mut found = false;
    for slot in cached_workouts_mut(state).filter(|w| w.id == updated.id) {
        let exercises = std::mem::take(&mut slot.exercises);
        *slot = Workout {
            exercises,
            ..updated.clone()
        };
        found = true;
    }
    found
}

/// Drop a workout (and with it its exercises) from the list and the selected slot.
pub fn remove_workout(state: &mut WorkoutsState, workout_id: i64) {
    state.workouts.retain(|w| w.id != workout_id);
    if state
        .selected_workout
        .as_ref()
        .is_some_and(|w| w.id == workout_id)
    {
        state.selected_workout = None;
    }
}

/// Replace the exercise list of one workout. No-op when the workout is not cached.
pub fn set_exercises(
    state: &mut WorkoutsState,
    workout_id: i64,
    exercises: Vec<Exercise>,
) -> bool {
    let mut found = false;
    for workout in cached_workouts_mut(state).filter(|w| w.id == workout_id) {
        workout.exercises = exercises.clone();
        found = true;
    }
    found
}

/// Append a created exercise to its owning workout. No-op when the owner is not cached.
pub fn append_exercise(state: &mut WorkoutsState, exercise: Exercise) -> bool {
    let mut found = false;
    for workout in cached_workouts_mut(state).filter(|w| w.id == exercise.workout_id) {
        workout.exercises.push(exercise.clone());
        found = true;
    }
    found
}

/// Apply a confirmed exercise row wherever the exercise is cached.
///
/// If the row names a different workout than the one holding it, the exercise
/// leaves the old parent and is appended to the new one. An exercise that is
/// not cached anywhere is not added.
pub fn apply_exercise_update(state: &mut WorkoutsState, updated: &Exercise) -> bool {
    let mut found = false;
    let mut moved = false;
    for workout in cached_workouts_mut(state) {
        if workout.id == updated.workout_id {
            if let Some(slot) = workout.exercises.iter_mut().find(|e| e.id == updated.id) {
                *slot = updated.clone();
                found = true;
            }
        } else {
            let before = workout.exercises.len();
            workout.exercises.retain(|e| e.id != updated.id);
            if workout.exercises.len() != before {
                found = true;
                moved = true;
            }
        }
    }

    if moved {
        for workout in cached_workouts_mut(state).filter(|w| w.id == updated.workout_id) {
            if !workout.exercises.iter().any(|e| e.id == updated.id) {
                workout.exercises.push(updated.clone());
            }
        }
    }
    found
}

/// Remove an exercise from every cached workout.
pub fn remove_exercise(state: &mut WorkoutsState, exercise_id: i64) {
    for workout in cached_workouts_mut(state) {
        workout.exercises.retain(|e| e.id != exercise_id);
    }
}

/// Reset to an empty cache.
pub fn clear(state: &mut WorkoutsState) {
    *state = WorkoutsState::default();
}

fn cached_workouts_mut(state: &mut WorkoutsState) -> impl Iterator<Item = &mut Workout> {
    state
        .workouts
        .iter_mut()
        .chain(state.selected_workout.iter_mut())
}
