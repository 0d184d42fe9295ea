//! Workout and exercise cache kept in sync with the backend.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::gateway::{
    decode_row, decode_rows, with_timeout, Bucket, Collection, Gateway, GatewayError, Query, RowId,
};
use crate::loading::{LoadingCounter, LoadingGuard};
use crate::media::MediaPipeline;
use crate::storage::config::SyncSettings;
use crate::storage::snapshot::{load_json, save_json, SnapshotStore, WORKOUTS_KEY};
use crate::workouts::reconcile;
use crate::workouts::types::{
    Exercise, ExerciseDraft, ExercisePatch, Workout, WorkoutDraft, WorkoutPatch, WorkoutsState,
};

/// Local cache of the user's workouts and their exercises.
///
/// Every remote operation first waits for the backend to confirm, then
/// reconciles the cache with the returned row. A failed call leaves the cache
/// untouched and records the error.
pub struct WorkoutStore<G: Gateway> {
    gateway: Arc<G>,
    media: MediaPipeline<G>,
    snapshots: Arc<dyn SnapshotStore>,
    state: RwLock<WorkoutsState>,
    persist: Mutex<()>,
    loading: LoadingCounter,
    timeout: Duration,
}

impl<G: Gateway> WorkoutStore<G> {
    /// Create a store, restoring the last persisted snapshot if there is one.
    pub fn new(
        gateway: Arc<G>,
        snapshots: Arc<dyn SnapshotStore>,
        settings: &SyncSettings,
    ) -> Self {
        let state = match load_json::<WorkoutsState>(snapshots.as_ref(), WORKOUTS_KEY) {
            Ok(Some(state)) => {
                tracing::debug!("Restored {} cached workouts", state.workouts.len());
                state
            }
            Ok(None) => WorkoutsState::default(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable workouts snapshot: {}", e);
                WorkoutsState::default()
            }
        };

        let timeout = settings.request_timeout();
        Self {
            media: MediaPipeline::new(Arc::clone(&gateway), timeout),
            gateway,
            snapshots,
            state: RwLock::new(state),
            persist: Mutex::new(()),
            loading: LoadingCounter::new(),
            timeout,
        }
    }

    // ========== Remote: workouts ==========

    /// Load all workouts of `user_id`, newest first, with their exercises.
    pub async fn fetch_workouts(&self, user_id: &str) -> Result<Vec<Workout>, StoreError> {
        let _loading = self.begin_call();

        let query = Query::new(Collection::Workouts)
            .eq("user_id", user_id)
            .order_by("created_at", false)
            .embed(Collection::Exercises);
        let rows = self
            .call(self.gateway.query(&query))
            .await
            .map_err(|e| self.fail(StoreError::query(e)))?;

        let mut workouts: Vec<Workout> =
            decode_rows(rows).map_err(|e| self.fail(StoreError::decode(e)))?;
        for workout in &mut workouts {
            workout.exercises.sort_by_key(|e| e.created_at);
        }

        tracing::info!("Fetched {} workouts for {}", workouts.len(), user_id);
        self.commit(|state| reconcile::replace_workouts(state, workouts.clone()));
        Ok(workouts)
    }

    /// Load one workout into the selected slot. The list is not touched.
    pub async fn fetch_workout_by_id(&self, workout_id: i64) -> Result<Workout, StoreError> {
        let _loading = self.begin_call();

        let query = Query::new(Collection::Workouts)
            .eq("id", workout_id)
            .embed(Collection::Exercises)
            .limit(1);
        let rows = self
            .call(self.gateway.query(&query))
            .await
            .map_err(|e| self.fail(StoreError::query(e)))?;

        let row = rows.into_iter().next().ok_or_else(|| {
            self.fail(StoreError::Query(format!("Workout {} not found", workout_id)))
        })?;
        let mut workout: Workout = decode_row(row).map_err(|e| self.fail(StoreError::decode(e)))?;
        workout.exercises.sort_by_key(|e| e.created_at);

        self.commit(|state| reconcile::select(state, Some(workout.clone())));
        Ok(workout)
    }

    /// Insert a workout and put the confirmed row at the head of the list.
    pub async fn create_workout(&self, draft: WorkoutDraft) -> Result<Workout, StoreError> {
        let _loading = self.begin_call();

        let row = self
            .call_with_body(&draft, |body| self.gateway.insert(Collection::Workouts, body))
            .await
            .map_err(|e| self.fail(StoreError::mutation(e)))?;
        let workout: Workout = decode_row(row).map_err(|e| self.fail(StoreError::decode(e)))?;

        tracing::info!("Created workout {} ({})", workout.id, workout.name);
        self.commit(|state| reconcile::prepend_workout(state, workout.clone()));
        Ok(workout)
    }

    /// Patch a workout and reconcile the list entry and the selected slot.
    pub async fn update_workout_db(
        &self,
        workout_id: i64,
        patch: WorkoutPatch,
    ) -> Result<Workout, StoreError> {
        let _loading = self.begin_call();

        let updated = self
            .send_workout_patch(workout_id, &patch)
            .await
            .map_err(|e| self.fail(StoreError::write(e)))?;
        Ok(self.confirm_workout_update(updated))
    }

    /// Delete a workout. Its exercises go with it.
    pub async fn delete_workout_db(&self, workout_id: i64) -> Result<(), StoreError> {
        let _loading = self.begin_call();

        self.call(self.gateway.delete(Collection::Workouts, &RowId::from(workout_id)))
            .await
            .map_err(|e| self.fail(StoreError::mutation(e)))?;

        tracing::info!("Deleted workout {}", workout_id);
        self.commit(|state| reconcile::remove_workout(state, workout_id));
        Ok(())
    }

    // ========== Remote: exercises ==========

    /// Reload the exercises of one workout, oldest first.
    pub async fn fetch_exercises(&self, workout_id: i64) -> Result<Vec<Exercise>, StoreError> {
        let _loading = self.begin_call();

        let query = Query::new(Collection::Exercises)
            .eq("workout_id", workout_id)
            .order_by("created_at", true);
        let rows = self
            .call(self.gateway.query(&query))
            .await
            .map_err(|e| self.fail(StoreError::query(e)))?;
        let exercises: Vec<Exercise> =
            decode_rows(rows).map_err(|e| self.fail(StoreError::decode(e)))?;

        self.commit(|state| {
            if !reconcile::set_exercises(state, workout_id, exercises.clone()) {
                tracing::debug!("Workout {} not cached, exercises not stored", workout_id);
            }
        });
        Ok(exercises)
    }

    /// Insert an exercise and append it to its workout.
    pub async fn create_exercise(&self, draft: ExerciseDraft) -> Result<Exercise, StoreError> {
        let _loading = self.begin_call();

        let row = self
            .call_with_body(&draft, |body| self.gateway.insert(Collection::Exercises, body))
            .await
            .map_err(|e| self.fail(StoreError::mutation(e)))?;
        let exercise: Exercise = decode_row(row).map_err(|e| self.fail(StoreError::decode(e)))?;

        tracing::info!(
            "Created exercise {} in workout {}",
            exercise.id,
            exercise.workout_id
        );
        self.commit(|state| {
            if !reconcile::append_exercise(state, exercise.clone()) {
                tracing::debug!("Workout {} not cached, exercise not stored", exercise.workout_id);
            }
        });
        Ok(exercise)
    }

    /// Patch an exercise; moves it between workouts if `workout_id` changed.
    pub async fn update_exercise_db(
        &self,
        exercise_id: i64,
        patch: ExercisePatch,
    ) -> Result<Exercise, StoreError> {
        let _loading = self.begin_call();

        let updated = self
            .send_exercise_patch(exercise_id, &patch)
            .await
            .map_err(|e| self.fail(StoreError::write(e)))?;
        Ok(self.confirm_exercise_update(updated))
    }

    /// Delete an exercise and drop it from every cached workout.
    pub async fn delete_exercise_db(&self, exercise_id: i64) -> Result<(), StoreError> {
        let _loading = self.begin_call();

        self.call(self.gateway.delete(Collection::Exercises, &RowId::from(exercise_id)))
            .await
            .map_err(|e| self.fail(StoreError::mutation(e)))?;

        tracing::info!("Deleted exercise {}", exercise_id);
        self.commit(|state| reconcile::remove_exercise(state, exercise_id));
        Ok(())
    }

    // ========== Covers ==========

    /// Upload a cover and bind it to a workout. `None` on any failure; see [`Self::error`].
    pub async fn upload_workout_cover(
        &self,
        workout_id: i64,
        file_uri: &str,
        mime: &str,
    ) -> Option<String> {
        self.try_upload_workout_cover(workout_id, file_uri, mime)
            .await
            .ok()
    }

    /// Upload a cover and bind it to a workout.
    pub async fn try_upload_workout_cover(
        &self,
        workout_id: i64,
        file_uri: &str,
        mime: &str,
    ) -> Result<String, StoreError> {
        let _loading = self.begin_call();

        let uploaded = self
            .media
            .upload(Bucket::Workouts, &workout_id.to_string(), file_uri, mime)
            .await
            .map_err(|e| self.fail(StoreError::upload(e)))?;

        let patch = WorkoutPatch::cover(uploaded.public_url.clone());
        match self.send_workout_patch(workout_id, &patch).await {
            Ok(updated) => {
                self.confirm_workout_update(updated);
                Ok(uploaded.public_url)
            }
            Err(e) => {
                self.media
                    .release_unbound(Bucket::Workouts, &uploaded.path, &e)
                    .await;
                Err(self.fail(StoreError::upload(StoreError::write(e))))
            }
        }
    }

    /// Upload a cover and bind it to an exercise. `None` on any failure; see [`Self::error`].
    pub async fn upload_exercise_cover(
        &self,
        exercise_id: i64,
        file_uri: &str,
        mime: &str,
    ) -> Option<String> {
        self.try_upload_exercise_cover(exercise_id, file_uri, mime)
            .await
            .ok()
    }

    /// Upload a cover and bind it to an exercise.
    pub async fn try_upload_exercise_cover(
        &self,
        exercise_id: i64,
        file_uri: &str,
        mime: &str,
    ) -> Result<String, StoreError> {
        let _loading = self.begin_call();

        let uploaded = self
            .media
            .upload(Bucket::Exercises, &exercise_id.to_string(), file_uri, mime)
            .await
            .map_err(|e| self.fail(StoreError::upload(e)))?;

        let patch = ExercisePatch::cover(uploaded.public_url.clone());
        match self.send_exercise_patch(exercise_id, &patch).await {
            Ok(updated) => {
                self.confirm_exercise_update(updated);
                Ok(uploaded.public_url)
            }
            Err(e) => {
                self.media
                    .release_unbound(Bucket::Exercises, &uploaded.path, &e)
                    .await;
                Err(self.fail(StoreError::upload(StoreError::write(e))))
            }
        }
    }

    /// Remove a workout cover object by its public URL.
    pub async fn delete_workout_cover(&self, cover_url: &str) -> Result<(), StoreError> {
        let _loading = self.begin_call();
        self.media
            .remove(Bucket::Workouts, cover_url)
            .await
            .map_err(|e| self.fail(StoreError::mutation(e)))
    }

    /// Remove an exercise cover object by its public URL.
    pub async fn delete_exercise_cover(&self, cover_url: &str) -> Result<(), StoreError> {
        let _loading = self.begin_call();
        self.media
            .remove(Bucket::Exercises, cover_url)
            .await
            .map_err(|e| self.fail(StoreError::mutation(e)))
    }

    // ========== Local ==========

    /// Cached workout from the list.
    pub fn get_workout_by_id(&self, workout_id: i64) -> Option<Workout> {
        self.state
            .read()
            .workouts
            .iter()
            .find(|w| w.id == workout_id)
            .cloned()
    }

    /// Cached exercises of a workout; empty if the workout is not cached.
    pub fn get_exercises_by_workout_id(&self, workout_id: i64) -> Vec<Exercise> {
        self.get_workout_by_id(workout_id)
            .map(|w| w.exercises)
            .unwrap_or_default()
    }

    /// Replace the list without contacting the backend.
    pub fn set_workouts(&self, workouts: Vec<Workout>) {
        self.commit(|state| reconcile::replace_workouts(state, workouts));
    }

    /// Put a workout into (or clear) the selected slot.
    pub fn select_workout(&self, workout: Option<Workout>) {
        self.commit(|state| reconcile::select(state, workout));
    }

    /// Empty the cache, e.g. on sign-out.
    pub fn clear_workouts(&self) {
        self.commit(reconcile::clear);
    }

    pub fn workouts(&self) -> Vec<Workout> {
        self.state.read().workouts.clone()
    }

    pub fn selected_workout(&self) -> Option<Workout> {
        self.state.read().selected_workout.clone()
    }

    /// Last remote error, cleared when the next remote call starts.
    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// True while at least one remote call of this store is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    pub fn snapshot(&self) -> WorkoutsState {
        self.state.read().clone()
    }

    // ========== Internals ==========

    fn begin_call(&self) -> LoadingGuard {
        self.state.write().error = None;
        self.loading.begin()
    }

    fn fail(&self, err: StoreError) -> StoreError {
        tracing::warn!("{}", err);
        self.state.write().error = Some(err.to_string());
        err
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        with_timeout(self.timeout, request).await
    }

    async fn call_with_body<B, F, Fut>(&self, body: &B, request: F) -> Result<Value, GatewayError>
    where
        B: Serialize,
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, GatewayError>>,
    {
        let body = serde_json::to_value(body)?;
        self.call(request(body)).await
    }

    /// Send a workout patch and decode the confirmed row.
    async fn send_workout_patch(
        &self,
        workout_id: i64,
        patch: &WorkoutPatch,
    ) -> Result<Workout, GatewayError> {
        let id = RowId::from(workout_id);
        let row = self
            .call_with_body(patch, |body| self.gateway.update(Collection::Workouts, &id, body))
            .await?;
        decode_row(row)
    }

    /// Reconcile a confirmed workout row; returns the cached copy when there is one.
    fn confirm_workout_update(&self, updated: Workout) -> Workout {
        tracing::info!("Updated workout {}", updated.id);
        self.commit(|state| {
            if !reconcile::apply_workout_update(state, &updated) {
                tracing::debug!("Workout {} not cached, nothing to reconcile", updated.id);
            }
        });
        self.get_workout_by_id(updated.id).unwrap_or(updated)
    }

    async fn send_exercise_patch(
        &self,
        exercise_id: i64,
        patch: &ExercisePatch,
    ) -> Result<Exercise, GatewayError> {
        let id = RowId::from(exercise_id);
        let row = self
            .call_with_body(patch, |body| self.gateway.update(Collection::Exercises, &id, body))
            .await?;
        decode_row(row)
    }

    fn confirm_exercise_update(&self, updated: Exercise) -> Exercise {
        tracing::info!("Updated exercise {}", updated.id);
        self.commit(|state| {
            if !reconcile::apply_exercise_update(state, &updated) {
                tracing::debug!("Exercise {} not cached, nothing to reconcile", updated.id);
            }
        });
        updated
    }

    /// Apply a transition, then persist a copy of the result.
    ///
    /// The snapshot is written after the state lock is released. `persist`
    /// serializes commits so snapshots land in the order they were taken.
    fn commit<R>(&self, transition: impl FnOnce(&mut WorkoutsState) -> R) -> R {
        let _persisting = self.persist.lock();
        let (result, snapshot) = {
            let mut state = self.state.write();
            let result = transition(&mut state);
            (result, state.clone())
        };
        if let Err(e) = save_json(self.snapshots.as_ref(), WORKOUTS_KEY, &snapshot) {
            tracing::warn!("Failed to persist workouts snapshot: {}", e);
        }
        result
    }
}
