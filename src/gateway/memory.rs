//! In-process gateway.
//!
//! Behaves like the hosted backend closely enough for the stores: ids and
//! `created_at` are assigned on insert, embedded children are attached on
//! query, deleting a parent cascades to its children, and inserts are pushed
//! to every open subscription. Failures, latency and post-commit stalls can
//! be injected per operation.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Bucket, Collection, Gateway, GatewayError, InsertFeed, Query, RowId};

/// Gateway operations, for failure injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    Query,
    Insert,
    Update,
    Delete,
    Upload,
    Remove,
    Subscribe,
    Invoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    Once,
    Always,
}

/// An object held in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

type RowSender = mpsc::UnboundedSender<Result<Value, GatewayError>>;

#[derive(Default)]
struct MemoryState {
    tables: HashMap<Collection, Vec<Value>>,
    next_id: i64,
    last_created_at: Option<DateTime<Utc>>,
    objects: HashMap<(Bucket, String), StoredObject>,
    subscribers: HashMap<Collection, Vec<RowSender>>,
    failures: HashMap<GatewayOp, FailureMode>,
    procedures: HashMap<String, Value>,
    calls: Vec<GatewayOp>,
    latency: Option<Duration>,
    stalls: HashMap<GatewayOp, Duration>,
}

impl MemoryState {
    fn check(&mut self, op: GatewayOp) -> Result<(), GatewayError> {
        self.calls.push(op);
        match self.failures.get(&op).copied() {
            Some(FailureMode::Once) => {
                self.failures.remove(&op);
                Err(GatewayError::Injected(format!("{:?}", op)))
            }
            Some(FailureMode::Always) => Err(GatewayError::Injected(format!("{:?}", op))),
            None => Ok(()),
        }
    }

    fn next_timestamp(&mut self) -> String {
        let now = Utc::now();
        let stamp = match self.last_created_at {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(stamp);
        stamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Fill in server-assigned columns.
    fn materialize(&mut self, collection: Collection, row: Value) -> Result<Value, GatewayError> {
        let mut fields = match row {
            Value::Object(fields) => fields,
            other => {
                return Err(GatewayError::Status {
                    status: 400,
                    message: format!("expected a JSON object, got {}", other),
                })
            }
        };

        if !fields.contains_key("id") {
            if collection == Collection::Profiles {
                return Err(GatewayError::Status {
                    status: 400,
                    message: "profiles rows need an explicit id".to_string(),
                });
            }
            self.next_id += 1;
            fields.insert("id".to_string(), Value::from(self.next_id));
        } else if let Some(id) = fields.get("id").and_then(Value::as_i64) {
            self.next_id = self.next_id.max(id);
        }

        if !fields.contains_key("created_at") {
            let stamp = self.next_timestamp();
            fields.insert("created_at".to_string(), Value::from(stamp));
        }

        Ok(Value::Object(fields))
    }

    fn publish(&mut self, collection: Collection, row: &Value) {
        if let Some(senders) = self.subscribers.get_mut(&collection) {
            senders.retain(|tx| tx.send(Ok(row.clone())).is_ok());
        }
    }

    fn table(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.tables.entry(collection).or_default()
    }
}

/// Gateway backed by process memory.
pub struct InMemoryGateway {
    state: Mutex<MemoryState>,
    base_url: String,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            base_url: "memory://backend".to_string(),
        }
    }

    /// Fail the next call of `op` only.
    pub fn fail_next(&self, op: GatewayOp) {
        self.state.lock().failures.insert(op, FailureMode::Once);
    }

    /// Fail every call of `op` until cleared.
    pub fn fail_always(&self, op: GatewayOp) {
        self.state.lock().failures.insert(op, FailureMode::Always);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Hold every reply of `op` for `delay` after the change has been applied.
    pub fn stall_after_commit(&self, op: GatewayOp, delay: Option<Duration>) {
        let mut state = self.state.lock();
        match delay {
            Some(delay) => state.stalls.insert(op, delay),
            None => state.stalls.remove(&op),
        };
    }

    /// Register the JSON result returned by a remote procedure.
    pub fn register_procedure(&self, name: &str, result: Value) {
        self.state.lock().procedures.insert(name.to_string(), result);
    }

    /// Insert a row directly, without notifying subscribers.
    pub fn seed(&self, collection: Collection, row: Value) -> Result<Value, GatewayError> {
        let mut state = self.state.lock();
        let row = state.materialize(collection, row)?;
        state.table(collection).push(row.clone());
        Ok(row)
    }

    /// Insert a row as another client would, notifying subscribers.
    pub fn push_insert(&self, collection: Collection, row: Value) -> Result<Value, GatewayError> {
        let mut state = self.state.lock();
        let row = state.materialize(collection, row)?;
        state.table(collection).push(row.clone());
        state.publish(collection, &row);
        Ok(row)
    }

    /// Deliver a subscription error and drop every subscriber of `collection`.
    pub fn disconnect_subscribers(&self, collection: Collection) {
        let mut state = self.state.lock();
        if let Some(senders) = state.subscribers.remove(&collection) {
            for tx in senders {
                let _ = tx.send(Err(GatewayError::Realtime("connection lost".to_string())));
            }
        }
    }

    /// Number of live subscriptions on `collection`.
    pub fn subscriber_count(&self, collection: Collection) -> usize {
        let mut state = self.state.lock();
        match state.subscribers.get_mut(&collection) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.state
            .lock()
            .tables
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: Bucket, path: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .objects
            .get(&(bucket, path.to_string()))
            .cloned()
    }

    pub fn object_paths(&self, bucket: Bucket) -> Vec<String> {
        let state = self.state.lock();
        let mut paths: Vec<String> = state
            .objects
            .keys()
            .filter(|(b, _)| *b == bucket)
            .map(|(_, path)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// How many times `op` was attempted.
    pub fn call_count(&self, op: GatewayOp) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    async fn pause(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn stall(&self, op: GatewayOp) {
        let delay = self.state.lock().stalls.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn matches_id(row: &Value, id: &RowId) -> bool {
    row.get("id") == Some(&id.to_value())
}

impl Gateway for InMemoryGateway {
    async fn query(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check(GatewayOp::Query)?;

        let mut rows: Vec<Value> = state
            .tables
            .get(&query.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        query
                            .filters
                            .iter()
                            .all(|f| row.get(&f.column) == Some(&f.value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        if let Some(reference) = query.collection.back_reference() {
            for child in &query.embed {
                let children = state.tables.get(child).cloned().unwrap_or_default();
                for row in rows.iter_mut() {
                    let parent_id = row.get("id").cloned();
                    let nested: Vec<Value> = children
                        .iter()
                        .filter(|c| c.get(reference) == parent_id.as_ref())
                        .cloned()
                        .collect();
                    if let Value::Object(fields) = row {
                        fields.insert(child.as_str().to_string(), Value::Array(nested));
                    }
                }
            }
        }

        Ok(rows)
    }

    async fn insert(&self, collection: Collection, row: Value) -> Result<Value, GatewayError> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check(GatewayOp::Insert)?;

        let row = state.materialize(collection, row)?;
        state.table(collection).push(row.clone());
        state.publish(collection, &row);

        tracing::debug!("memory gateway: inserted into {}: {}", collection, row);
        Ok(row)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &RowId,
        patch: Value,
    ) -> Result<Value, GatewayError> {
        self.pause().await;
        let updated = {
            let mut state = self.state.lock();
            state.check(GatewayOp::Update)?;

            let patch: Map<String, Value> = match patch {
                Value::Object(fields) => fields,
                _ => Map::new(),
            };

            let row = state
                .table(collection)
                .iter_mut()
                .find(|row| matches_id(row, id))
                .ok_or(GatewayError::NotFound)?;

            if let Value::Object(fields) = row {
                for (key, value) in patch {
                    if key != "id" && key != "created_at" {
                        fields.insert(key, value);
                    }
                }
            }
            row.clone()
        };

        self.stall(GatewayOp::Update).await;
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, id: &RowId) -> Result<(), GatewayError> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check(GatewayOp::Delete)?;

        state.table(collection).retain(|row| !matches_id(row, id));

        // Children follow their parent, like an ON DELETE CASCADE foreign key.
        if let Some(reference) = collection.back_reference() {
            let parent = id.to_value();
            for rows in state.tables.values_mut() {
                rows.retain(|row| row.get(reference) != Some(&parent));
            }
        }

        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check(GatewayOp::Upload)?;

        state.objects.insert(
            (bucket, path.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn remove_objects(&self, bucket: Bucket, paths: &[String]) -> Result<(), GatewayError> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check(GatewayOp::Remove)?;

        for path in paths {
            state.objects.remove(&(bucket, path.clone()));
        }
        Ok(())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            bucket.as_str(),
            path
        )
    }

    async fn subscribe_insert(&self, collection: Collection) -> Result<InsertFeed, GatewayError> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check(GatewayOp::Subscribe)?;

        let (feed, row_tx, _closed) = InsertFeed::channel();
        state.subscribers.entry(collection).or_default().push(row_tx);
        Ok(feed)
    }

    async fn invoke(&self, name: &str, _payload: Value) -> Result<Value, GatewayError> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check(GatewayOp::Invoke)?;

        state
            .procedures
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                message: format!("function {} not found", name),
            })
    }
}
