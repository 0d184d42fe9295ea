//! HTTP gateway for the hosted backend.
//!
//! Tables go through the REST endpoint (`/rest/v1`), covers through object
//! storage (`/storage/v1`), exports through functions (`/functions/v1`) and
//! inserts are pushed over the realtime websocket.

use parking_lot::RwLock;
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;

use super::realtime;
use super::{Bucket, Collection, Gateway, GatewayError, InsertFeed, Query, RowId};
use crate::storage::config::{BackendSettings, SyncSettings};

/// Gateway talking to the hosted backend over HTTP.
pub struct HttpGateway {
    /// HTTP client
    http: reqwest::Client,
    /// Base URL shared by every endpoint
    base_url: String,
    /// Public anonymous key, sent on every request
    anon_key: String,
    /// Websocket endpoint for insert subscriptions
    realtime_url: String,
    /// Signed-in user's access token
    access_token: RwLock<Option<String>>,
    /// Realtime heartbeat interval
    heartbeat: Duration,
}

impl HttpGateway {
    /// Create a gateway from configuration.
    pub fn new(backend: &BackendSettings, sync: &SyncSettings) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(sync.request_timeout())
            .build()?;

        let base_url = backend.url.trim_end_matches('/').to_string();
        let realtime_url = backend
            .realtime_url
            .clone()
            .unwrap_or_else(|| realtime::realtime_endpoint(&base_url, &backend.anon_key));

        Ok(Self {
            http,
            base_url,
            anon_key: backend.anon_key.clone(),
            realtime_url,
            access_token: RwLock::new(None),
            heartbeat: sync.heartbeat_interval(),
        })
    }

    /// Set the access token of the signed-in user.
    pub fn set_access_token(&self, token: String) {
        *self.access_token.write() = Some(token);
    }

    /// Forget the access token (sign out).
    pub fn clear_token(&self) {
        *self.access_token.write() = None;
    }

    /// Check if a user session is attached.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.read().is_some()
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn rest_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection.as_str())
    }

    fn object_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket.as_str(), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn representation(&self, request: RequestBuilder) -> Result<Vec<Value>, GatewayError> {
        let response = self
            .send(request.header("Prefer", "return=representation"))
            .await?;
        let rows: Vec<Value> = response.json().await?;
        Ok(rows)
    }
}

/// Pull a readable message out of an error body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(parsed) => ["message", "error", "msg"]
            .iter()
            .find_map(|key| parsed.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Query-string parameters for a REST read.
pub fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut select = String::from("*");
    for child in &query.embed {
        select.push_str(&format!(",{}(*)", child.as_str()));
    }

    let mut params = vec![("select".to_string(), select)];
    for filter in &query.filters {
        params.push((filter.column.clone(), format!("eq.{}", filter_literal(&filter.value))));
    }
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn id_param(id: &RowId) -> [(String, String); 1] {
    [("id".to_string(), format!("eq.{}", id))]
}

impl Gateway for HttpGateway {
    async fn query(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        let request = self
            .http
            .get(self.rest_url(query.collection))
            .query(&query_params(query));
        let response = self.send(request).await?;
        let rows: Vec<Value> = response.json().await?;
        tracing::debug!("Fetched {} rows from {}", rows.len(), query.collection);
        Ok(rows)
    }

    async fn insert(&self, collection: Collection, row: Value) -> Result<Value, GatewayError> {
        let request = self.http.post(self.rest_url(collection)).json(&json!([row]));
        self.representation(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode("insert returned no row".to_string()))
    }

    async fn update(
        &self,
        collection: Collection,
        id: &RowId,
        patch: Value,
    ) -> Result<Value, GatewayError> {
        let request = self
            .http
            .patch(self.rest_url(collection))
            .query(&id_param(id))
            .json(&patch);
        self.representation(request)
            .await?
            .into_iter()
            .next()
            .ok_or(GatewayError::NotFound)
    }

    async fn delete(&self, collection: Collection, id: &RowId) -> Result<(), GatewayError> {
        let request = self
            .http
            .delete(self.rest_url(collection))
            .query(&id_param(id));
        self.send(request).await?;
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        let size = bytes.len();
        let request = self
            .http
            .post(self.object_url(bucket, path))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        self.send(request).await?;
        tracing::debug!("Uploaded {} bytes to {}/{}", size, bucket, path);
        Ok(())
    }

    async fn remove_objects(&self, bucket: Bucket, paths: &[String]) -> Result<(), GatewayError> {
        let request = self
            .http
            .delete(format!("{}/storage/v1/object/{}", self.base_url, bucket.as_str()))
            .json(&json!({ "prefixes": paths }));
        self.send(request).await?;
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
        let token = self.access_token.read().clone();
        realtime::connect(&self.realtime_url, collection, token, self.heartbeat).await
    }

    async fn invoke(&self, name: &str, payload: Value) -> Result<Value, GatewayError> {
        if !self.is_authenticated() {
            return Err(GatewayError::Unauthenticated);
        }

        let request = self
            .http
            .post(format!("{}/functions/v1/{}", self.base_url, name))
            .json(&payload);
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }
}
