//! Cover and avatar uploads.
//!
//! A local file is read, stored in a bucket under a unique path and resolved
//! to its public URL. Binding the URL to an entity is left to the store that
//! owns the entity.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{with_timeout, Bucket, Gateway, GatewayError};

/// Extension used when the mime type has no usable subtype.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    /// Object path inside the bucket
    pub path: String,
    /// Public URL of the object
    pub public_url: String,
}

/// Uploads local files to object storage.
pub struct MediaPipeline<G: Gateway> {
    gateway: Arc<G>,
    timeout: Duration,
    last_stamp: AtomicI64,
}

impl<G: Gateway> MediaPipeline<G> {
    pub fn new(gateway: Arc<G>, timeout: Duration) -> Self {
        Self {
            gateway,
            timeout,
            last_stamp: AtomicI64::new(0),
        }
    }

    /// Read `file_uri` and store it in `bucket` for `owner_id`.
    pub async fn upload(
        &self,
        bucket: Bucket,
        owner_id: &str,
        file_uri: &str,
        mime: &str,
    ) -> Result<UploadedObject, GatewayError> {
        let local = local_path(file_uri);
        let bytes = tokio::fs::read(&local)
            .await
            .map_err(|e| GatewayError::Io(format!("{}: {}", local.display(), e)))?;

        let path = object_path(bucket, owner_id, self.next_stamp(), mime);
        tracing::info!("Uploading {} bytes to {}/{}", bytes.len(), bucket, path);

        with_timeout(
            self.timeout,
            self.gateway.upload_object(bucket, &path, bytes, mime),
        )
        .await?;

        let public_url = self.gateway.public_url(bucket, &path);
        Ok(UploadedObject { path, public_url })
    }

    /// Remove the object behind a previously issued public URL.
    pub async fn remove(&self, bucket: Bucket, public_url: &str) -> Result<(), GatewayError> {
        let path = path_from_url(bucket, public_url).ok_or_else(|| GatewayError::Status {
            status: 400,
            message: format!("not an object URL: {}", public_url),
        })?;
        self.remove_path(bucket, &path).await
    }

    /// Remove an object by its path inside the bucket.
    pub async fn remove_path(&self, bucket: Bucket, path: &str) -> Result<(), GatewayError> {
        with_timeout(
            self.timeout,
            self.gateway.remove_objects(bucket, &[path.to_string()]),
        )
        .await?;
        tracing::info!("Removed {}/{}", bucket, path);
        Ok(())
    }

    /// Clean up after a failed bind of `path`.
    ///
    /// The object is removed only when the backend rejected the bind. Any other
    /// failure may have left the row pointing at it, so it is kept. Removal
    /// errors are logged and never surfaced.
    pub async fn release_unbound(&self, bucket: Bucket, path: &str, cause: &GatewayError) {
        if !cause.is_rejection() {
            tracing::warn!(
                "Keeping {}/{}: bind outcome unknown ({})",
                bucket,
                path,
                cause
            );
            return;
        }
        if let Err(e) = self.remove_path(bucket, path).await {
            tracing::warn!("Could not remove orphaned upload {}/{}: {}", bucket, path, e);
        }
    }

    /// Milliseconds since the epoch, bumped so no two uploads share a stamp.
    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_stamp
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

/// Strip the `file://` scheme from a local URI.
pub fn local_path(file_uri: &str) -> PathBuf {
    PathBuf::from(file_uri.strip_prefix("file://").unwrap_or(file_uri))
}

/// File extension for a mime type: its subtype, or `jpg`.
pub fn extension_for(mime: &str) -> &str {
    match mime.split_once('/') {
        Some((_, subtype)) if !subtype.trim().is_empty() => subtype
            .split(';')
            .next()
            .map(str::trim)
            .unwrap_or(DEFAULT_EXTENSION),
        _ => DEFAULT_EXTENSION,
    }
}

/// `{folder}/{owner}-{stamp}.{ext}`
pub fn object_path(bucket: Bucket, owner_id: &str, stamp: i64, mime: &str) -> String {
    format!(
        "{}/{}-{}.{}",
        bucket.folder(),
        owner_id,
        stamp,
        extension_for(mime)
    )
}

/// Object path addressed by a public URL: the bucket folder plus the URL's last segment.
pub fn path_from_url(bucket: Bucket, public_url: &str) -> Option<String> {
    let without_query = public_url.split(['?', '#']).next().unwrap_or(public_url);
    let file_name = without_query.rsplit('/').next()?;
    if file_name.is_empty() {
        return None;
    }
    Some(format!("{}/{}", bucket.folder(), file_name))
}
