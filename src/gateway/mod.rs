//! Remote data gateway.
//!
//! The hosted backend is reached through the [`Gateway`] trait: table
//! queries and mutations, object storage, insert-event subscriptions and
//! remote procedures. [`http::HttpGateway`] talks to a real backend and
//! [`memory::InMemoryGateway`] keeps everything in process.

pub mod http;
pub mod memory;
pub mod realtime;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use http::HttpGateway;
pub use memory::InMemoryGateway;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Row not found")]
    NotFound,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Realtime error: {0}")]
    Realtime(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

impl GatewayError {
    /// True when the backend answered and did not apply the request.
    ///
    /// Timeouts, transport failures, 5xx answers and unreadable replies leave
    /// the outcome unknown.
    pub fn is_rejection(&self) -> bool {
        match self {
            GatewayError::Status { status, .. } => (400..500).contains(status),
            GatewayError::NotFound | GatewayError::Unauthenticated | GatewayError::Injected(_) => {
                true
            }
            _ => false,
        }
    }
}

/// Remote table collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Workouts,
    Exercises,
    Messages,
    Profiles,
}

impl Collection {
    /// Table name on the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Workouts => "workouts",
            Collection::Exercises => "exercises",
            Collection::Messages => "messages",
            Collection::Profiles => "profiles",
        }
    }

    /// Column on a child collection that references a row of `self`.
    pub fn back_reference(&self) -> Option<&'static str> {
        match self {
            Collection::Workouts => Some("workout_id"),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object storage buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Workouts,
    Exercises,
    Profiles,
}

impl Bucket {
    /// Bucket name on the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Workouts => "workouts",
            Bucket::Exercises => "exercises",
            Bucket::Profiles => "profiles",
        }
    }

    /// Folder inside the bucket that holds cover images.
    pub fn folder(&self) -> &'static str {
        match self {
            Bucket::Workouts => "workouts",
            Bucket::Exercises => "exercises",
            Bucket::Profiles => "avatars",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of a remote row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowId {
    Int(i64),
    Text(String),
}

impl RowId {
    /// JSON form, used when comparing against stored rows.
    pub fn to_value(&self) -> Value {
        match self {
            RowId::Int(id) => Value::from(*id),
            RowId::Text(id) => Value::from(id.as_str()),
        }
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        RowId::Int(id)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId::Text(id.to_string())
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        RowId::Text(id)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(id) => write!(f, "{}", id),
            RowId::Text(id) => f.write_str(id),
        }
    }
}

/// Equality filter on a column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

/// Sort order of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A read against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
    /// Child collections embedded into every returned row under their table name.
    pub embed: Vec<Collection>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order: None,
            limit: None,
            embed: Vec::new(),
        }
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn embed(mut self, child: Collection) -> Self {
        self.embed.push(child);
        self
    }
}

/// Stream of rows inserted into a collection.
///
/// Closing (or dropping) the feed ends the server-side subscription.
pub struct InsertFeed {
    rows: mpsc::UnboundedReceiver<Result<Value, GatewayError>>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl InsertFeed {
    /// Create a feed and the sender half used by a gateway to push rows into it.
    ///
    /// The returned oneshot receiver fires when the consumer closes the feed.
    pub fn channel() -> (
        Self,
        mpsc::UnboundedSender<Result<Value, GatewayError>>,
        oneshot::Receiver<()>,
    ) {
        let (row_tx, row_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let feed = Self {
            rows: row_rx,
            close_tx: Some(close_tx),
        };
        (feed, row_tx, close_rx)
    }

    /// Wait for the next inserted row. `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Result<Value, GatewayError>> {
        self.rows.recv().await
    }

    /// Unsubscribe. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        self.rows.close();
    }

    pub fn is_closed(&self) -> bool {
        self.close_tx.is_none()
    }
}

impl Drop for InsertFeed {
    fn drop(&mut self) {
        self.close();
    }
}

/// Authenticated backend operations.
pub trait Gateway: Send + Sync + 'static {
    /// Read rows matching a query.
    fn query(
        &self,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Value>, GatewayError>> + Send;

    /// Insert one row; the backend assigns `id` and `created_at` and returns the full row.
    fn insert(
        &self,
        collection: Collection,
        row: Value,
    ) -> impl Future<Output = Result<Value, GatewayError>> + Send;

    /// Patch one row by id and return the updated row.
    fn update(
        &self,
        collection: Collection,
        id: &RowId,
        patch: Value,
    ) -> impl Future<Output = Result<Value, GatewayError>> + Send;

    /// Delete one row by id.
    fn delete(
        &self,
        collection: Collection,
        id: &RowId,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Store an object at `path` inside `bucket`.
    fn upload_object(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Remove objects from a bucket.
    fn remove_objects(
        &self,
        bucket: Bucket,
        paths: &[String],
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Public address of an object. Pure; never touches the network.
    fn public_url(&self, bucket: Bucket, path: &str) -> String;

    /// Open a push subscription delivering one row per insert into `collection`.
    fn subscribe_insert(
        &self,
        collection: Collection,
    ) -> impl Future<Output = Result<InsertFeed, GatewayError>> + Send;

    /// Call a serverless procedure with a JSON payload.
    fn invoke(
        &self,
        name: &str,
        payload: Value,
    ) -> impl Future<Output = Result<Value, GatewayError>> + Send;
}

/// Bound a gateway call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

/// Decode a single row.
pub fn decode_row<T: DeserializeOwned>(row: Value) -> Result<T, GatewayError> {
    serde_json::from_value(row).map_err(GatewayError::from)
}

/// Decode a list of rows.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, GatewayError> {
    rows.into_iter().map(decode_row).collect()
}
