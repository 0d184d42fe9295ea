//! Signed-in user's profile, cached and persisted.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::types::{Profile, ProfileDraft, ProfilePatch, ProfileState};
use crate::error::StoreError;
use crate::gateway::{
    decode_row, with_timeout, Bucket, Collection, Gateway, GatewayError, Query, RowId,
};
use crate::loading::{LoadingCounter, LoadingGuard};
use crate::media::MediaPipeline;
use crate::storage::config::SyncSettings;
use crate::storage::snapshot::{load_json, save_json, SnapshotStore, PROFILE_KEY};

/// Profile cache.
pub struct ProfileStore<G: Gateway> {
    gateway: Arc<G>,
    media: MediaPipeline<G>,
    snapshots: Arc<dyn SnapshotStore>,
    state: RwLock<ProfileState>,
    persist: Mutex<()>,
    loading: LoadingCounter,
    timeout: Duration,
}

impl<G: Gateway> ProfileStore<G> {
    pub fn new(
        gateway: Arc<G>,
        snapshots: Arc<dyn SnapshotStore>,
        settings: &SyncSettings,
    ) -> Self {
        let state = load_json::<ProfileState>(snapshots.as_ref(), PROFILE_KEY)
            .unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable profile snapshot: {}", e);
                None
            })
            .unwrap_or_default();

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

    pub async fn fetch_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        let _loading = self.begin_call();

        let query = Query::new(Collection::Profiles).eq("id", user_id).limit(1);
        let rows = with_timeout(self.timeout, self.gateway.query(&query))
            .await
            .map_err(|e| self.fail(StoreError::query(e)))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| self.fail(StoreError::Query(format!("Profile {} not found", user_id))))?;

        self.confirm(row)
    }

    /// Insert a profile, stamping `updated_at`.
    pub async fn create_profile(&self, draft: ProfileDraft) -> Result<Profile, StoreError> {
        let _loading = self.begin_call();

        let row = stamped(&draft).map_err(|e| self.fail(StoreError::mutation(e)))?;
        let row = with_timeout(self.timeout, self.gateway.insert(Collection::Profiles, row))
            .await
            .map_err(|e| self.fail(StoreError::mutation(e)))?;

        tracing::info!("Created profile {}", draft.id);
        self.confirm(row)
    }

    /// Patch the profile of `user_id`, stamping `updated_at`.
    pub async fn update_profile_db(
        &self,
        user_id: &str,
        patch: ProfilePatch,
    ) -> Result<Profile, StoreError> {
        let _loading = self.begin_call();

        let profile = self
            .send_patch(user_id, &patch)
            .await
            .map_err(|e| self.fail(StoreError::write(e)))?;

        tracing::info!("Updated profile {}", user_id);
        self.commit(|state| state.profile = Some(profile.clone()));
        Ok(profile)
    }

    pub async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        let _loading = self.begin_call();

        with_timeout(
            self.timeout,
            self.gateway.delete(Collection::Profiles, &RowId::from(user_id)),
        )
        .await
        .map_err(|e| self.fail(StoreError::mutation(e)))?;

        tracing::info!("Deleted profile {}", user_id);
        self.commit(|state| state.profile = None);
        Ok(())
    }

    /// Upload an avatar and bind it to the profile. `None` on any failure.
    pub async fn upload_avatar(&self, user_id: &str, file_uri: &str, mime: &str) -> Option<String> {
        let _loading = self.begin_call();

        let uploaded = match self.media.upload(Bucket::Profiles, user_id, file_uri, mime).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                self.fail(StoreError::upload(e));
                return None;
            }
        };

        let patch = ProfilePatch {
            avatar_url: Some(uploaded.public_url.clone()),
            ..Default::default()
        };
        match self.send_patch(user_id, &patch).await {
            Ok(profile) => {
                tracing::info!("Bound avatar {} to {}", uploaded.path, user_id);
                self.commit(|state| state.profile = Some(profile));
                Some(uploaded.public_url)
            }
            Err(e) => {
                self.media
                    .release_unbound(Bucket::Profiles, &uploaded.path, &e)
                    .await;
                self.fail(StoreError::upload(StoreError::write(e)));
                None
            }
        }
    }

    /// Remove an avatar object by its public URL.
    pub async fn delete_avatar(&self, avatar_url: &str) -> Result<(), StoreError> {
        let _loading = self.begin_call();
        self.media
            .remove(Bucket::Profiles, avatar_url)
            .await
            .map_err(|e| self.fail(StoreError::mutation(e)))
    }

    pub fn set_profile(&self, profile: Profile) {
        self.commit(|state| state.profile = Some(profile));
    }

    /// Merge a patch into the cached profile without contacting the backend.
    pub fn update_profile(&self, patch: &ProfilePatch) {
        self.commit(|state| {
            if let Some(profile) = state.profile.as_mut() {
                patch.apply(profile);
            }
        });
    }

    pub fn clear_profile(&self) {
        self.commit(|state| *state = ProfileState::default());
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.read().profile.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    /// Send a stamped patch and decode the confirmed row.
    async fn send_patch(
        &self,
        user_id: &str,
        patch: &ProfilePatch,
    ) -> Result<Profile, GatewayError> {
        let body = stamped(patch)?;
        let row = with_timeout(
            self.timeout,
            self.gateway.update(Collection::Profiles, &RowId::from(user_id), body),
        )
        .await?;
        decode_row(row)
    }

    fn confirm(&self, row: Value) -> Result<Profile, StoreError> {
        let profile: Profile = decode_row(row).map_err(|e| self.fail(StoreError::decode(e)))?;
        self.commit(|state| state.profile = Some(profile.clone()));
        Ok(profile)
    }

    fn begin_call(&self) -> LoadingGuard {
        self.state.write().error = None;
        self.loading.begin()
    }

    fn fail(&self, err: StoreError) -> StoreError {
        tracing::warn!("{}", err);
        self.state.write().error = Some(err.to_string());
        err
    }

    /// Apply a transition, then persist a copy outside the state lock.
    fn commit(&self, transition: impl FnOnce(&mut ProfileState)) {
        let _persisting = self.persist.lock();
        let snapshot = {
            let mut state = self.state.write();
            transition(&mut state);
            state.clone()
        };
        if let Err(e) = save_json(self.snapshots.as_ref(), PROFILE_KEY, &snapshot) {
            tracing::warn!("Failed to persist profile snapshot: {}", e);
        }
    }
}

/// Serialize a body and add the current `updated_at`.
fn stamped<T: serde::Serialize>(body: &T) -> Result<Value, GatewayError> {
    let mut value = serde_json::to_value(body)?;
    if let Value::Object(fields) = &mut value {
        fields.insert(
            "updated_at".to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
    }
    Ok(value)
}
