//! Remote accessor: single request/response calls against the platform.
//!
//! The [`RemoteAccessor`] trait is the only way handles talk to the REST API.
//! [`HttpAccessor`] is the production implementation; [`MockAccessor`] serves
//! scripted replies for tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Options for a single remote call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Return the response body undecoded.
    pub raw: bool,
}

impl CallOptions {
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: None,
            raw: false,
        }
    }

    /// Attach a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Ask for the undecoded response body.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }
}

/// A decoded (or raw) response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Raw(Bytes),
}

impl Payload {
    /// Decode a JSON payload into `T`.
    ///
    /// A raw payload is parsed as JSON first.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Payload::Json(value) => Ok(serde_json::from_value(value)?),
            Payload::Raw(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    /// Take the payload as bytes, serializing JSON if needed.
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Payload::Raw(bytes) => Ok(bytes),
            Payload::Json(value) => Ok(Bytes::from(serde_json::to_vec(&value)?)),
        }
    }
}

/// Performs one request/response call against the platform.
#[async_trait]
pub trait RemoteAccessor: Send + Sync {
    /// Call `path` (relative to the API base) and return its payload.
    ///
    /// Non-success statuses and transport failures are errors.
    async fn call(&self, path: &str, options: CallOptions) -> Result<Payload>;
}

/// Call and decode a JSON response.
pub async fn call_json<T: DeserializeOwned>(
    accessor: &dyn RemoteAccessor,
    path: &str,
    options: CallOptions,
) -> Result<T> {
    accessor.call(path, options).await?.decode()
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// REST accessor backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpAccessor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccessor {
    /// Create a new accessor from config.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::Config("token contains invalid characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into an API error.
    async fn handle_error(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_string()
                } else {
                    body
                }
            });

        warn!(status = status.as_u16(), message = %message, "Remote call failed");
        ClientError::api(status.as_u16(), message)
    }
}

#[async_trait]
impl RemoteAccessor for HttpAccessor {
    async fn call(&self, path: &str, options: CallOptions) -> Result<Payload> {
        debug!(method = %options.method, path, raw = options.raw, "Remote call");

        let mut request = self.client.request(options.method, self.url(path));
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        let bytes = response.bytes().await?;
        if options.raw {
            return Ok(Payload::Raw(bytes));
        }

        if bytes.is_empty() {
            return Ok(Payload::Json(Value::Null));
        }
        Ok(Payload::Json(serde_json::from_slice(&bytes)?))
    }
}

/// API error response structure.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(alias = "error")]
    message: String,
}

// =============================================================================
// Mock implementation
// =============================================================================

/// A call recorded by [`MockAccessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub raw: bool,
}

#[derive(Debug, Clone)]
enum MockReply {
    Payload(Payload),
    Fail { status: u16, message: String },
}

/// Scripted in-memory accessor for testing and development.
///
/// Replies are keyed by `(method, path)` and stay in place until replaced,
/// so the same route can be called any number of times. Unscripted routes
/// fail with a 404.
#[derive(Debug, Default)]
pub struct MockAccessor {
    replies: Mutex<HashMap<(Method, String), MockReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockAccessor {
    /// Create an accessor with no scripted routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a JSON reply.
    pub fn respond_json(&self, method: Method, path: impl Into<String>, value: Value) {
        self.script(method, path.into(), MockReply::Payload(Payload::Json(value)));
    }

    /// Script a raw reply.
    pub fn respond_raw(&self, method: Method, path: impl Into<String>, bytes: impl Into<Bytes>) {
        self.script(
            method,
            path.into(),
            MockReply::Payload(Payload::Raw(bytes.into())),
        );
    }

    /// Script a failure.
    pub fn fail(&self, method: Method, path: impl Into<String>, status: u16, message: &str) {
        self.script(
            method,
            path.into(),
            MockReply::Fail {
                status,
                message: message.to_string(),
            },
        );
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of calls made to `(method, path)`.
    pub fn call_count(&self, method: &Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| &c.method == method && c.path == path)
            .count()
    }

    fn script(&self, method: Method, path: String, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((method, path), reply);
    }
}

#[async_trait]
impl RemoteAccessor for MockAccessor {
    async fn call(&self, path: &str, options: CallOptions) -> Result<Payload> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                method: options.method.clone(),
                path: path.to_string(),
                body: options.body.clone(),
                raw: options.raw,
            });

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(options.method.clone(), path.to_string()))
            .cloned();

        match reply {
            Some(MockReply::Payload(payload)) => Ok(payload),
            Some(MockReply::Fail { status, message }) => Err(ClientError::api(status, message)),
            None => Err(ClientError::api(
                404,
                format!("[MOCK] no reply scripted for {} {}", options.method, path),
            )),
        }
    }
}
