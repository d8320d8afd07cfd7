//! The query-client seam to the remote service.
//!
//! [`QueryClient`] is the trait the dispatcher drives; [`HttpQueryClient`]
//! implements it over HTTP: one POST per logical operation, bearer-token
//! authentication, a JSON body carrying a structured query plus the batch of
//! ids, and status-code classification.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::batch::manifest::ItemId;
use crate::batch::store::ResultEntry;

/// Network-level failure of one attempt; always classified transient.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within the timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (reset, refused, DNS, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// Server-side (5xx-class) error.
    #[error("server error {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

/// Classified reply from the remote service for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceReply {
    /// One terminal entry per requested id.
    Success(Vec<(ItemId, ResultEntry)>),
    /// Explicit rate-limit signal.
    RateLimited,
    /// The credential was rejected.
    Unauthorized,
    /// Well-formed response carrying an application-level error.
    Rejected(String),
}

/// One logical query against the remote service.
///
/// Implementations perform exactly one attempt per call; the dispatcher owns
/// all retry and rotation decisions.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Execute the query for a batch of ids using the given bearer token.
    async fn query(&self, token: &str, ids: &[ItemId]) -> Result<ServiceReply, TransportError>;
}

/// HTTP connect timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Truncation limit for error bodies carried in errors and logs.
const ERROR_BODY_LIMIT: usize = 200;

/// reqwest-backed [`QueryClient`] for JSON query endpoints.
///
/// The query text and endpoint are configuration; this client knows nothing
/// about the domain schema. The request body is
/// `{"query": ..., "variables": {"ids": [...]}}` and replies are expected to
/// carry a `data` object (entries matched back to ids by their `id` field)
/// or an `errors` array.
pub struct HttpQueryClient {
    client: Client,
    endpoint: String,
    query: String,
}

impl HttpQueryClient {
    /// Build a client for `endpoint` sending `query`, with a per-request
    /// timeout.
    pub fn new(
        endpoint: impl Into<String>,
        query: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            query: query.into(),
        })
    }

    /// Match reply objects back to the requested ids.
    ///
    /// Walks the direct children of `data`, collecting every object with an
    /// `id` field (standalone or inside an array). Requested ids without a
    /// matching object are confirmed absent.
    fn fan_out(data: &Value, ids: &[ItemId]) -> Vec<(ItemId, ResultEntry)> {
        let mut by_id: std::collections::HashMap<String, Value> = std::collections::HashMap::new();
        let mut collect = |value: &Value| {
            if let Some(id) = value.get("id") {
                let key = match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                by_id.insert(key, value.clone());
            }
        };
        if let Value::Object(children) = data {
            for child in children.values() {
                match child {
                    Value::Array(elements) => elements.iter().for_each(&mut collect),
                    Value::Object(_) => collect(child),
                    _ => {}
                }
            }
        }

        ids.iter()
            .map(|id| {
                let entry = match by_id.remove(id.as_str()) {
                    Some(value) => ResultEntry::Data(value),
                    None => ResultEntry::Absent,
                };
                (id.clone(), entry)
            })
            .collect()
    }

    fn truncate_body(body: &str) -> String {
        if body.len() <= ERROR_BODY_LIMIT {
            return body.to_string();
        }
        // Back up to a character boundary; byte 200 may fall inside a
        // multibyte sequence.
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body[..cut].to_string()
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn query(&self, token: &str, ids: &[ItemId]) -> Result<ServiceReply, TransportError> {
        let body = json!({
            "query": self.query,
            "variables": { "ids": ids },
        });

        debug!(endpoint = %self.endpoint, ids = ids.len(), "sending query");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(ServiceReply::RateLimited);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(ServiceReply::Unauthorized);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                status: status.as_u16(),
                body: Self::truncate_body(&body),
            });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Ok(ServiceReply::Rejected(format!(
                "client error {}: {}",
                status.as_u16(),
                Self::truncate_body(&body)
            )));
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(format!("failed to read response: {e}"))
            }
        })?;

        // A well-formed response may still carry an application error list.
        if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .map(|e| {
                        e.get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string()
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                return Ok(ServiceReply::Rejected(message));
            }
        }

        let data = payload.get("data").cloned().unwrap_or(Value::Null);
        Ok(ServiceReply::Success(Self::fan_out(&data, ids)))
    }
}
