//! Completion client with outcome classification

use super::models::{Completion, CompletionRequest, CompletionResponse, OVERLOAD_ERROR_TYPE};
use crate::config::CompletionConfig;
use crate::context::TrimmedWindow;
use crate::metrics::METRICS;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use secrecy::ExposeSecret;
use std::time::Instant;
use tracing::{debug, warn};

/// Completion error types
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Client initialization failed: {0}")]
    Initialization(String),

    #[error("Request body could not be built: {0}")]
    Serialization(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Upstream overloaded: {0}")]
    UpstreamOverloaded(String),

    #[error("Upstream error ({kind}): {message}")]
    UpstreamOther { kind: String, message: String },
}

/// Reason attached to retryable outcomes
pub const OVERLOAD_REASON: &str = "engine_overloaded";

/// Classified result of one completion request
#[derive(Debug)]
pub enum Outcome {
    Success(Completion),
    /// Transient upstream overload; the same window may be resubmitted once
    Retryable { reason: String },
    Fatal { cause: CompletionError },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Retryable { .. } => "retryable",
            Outcome::Fatal { .. } => "fatal",
        }
    }
}

impl From<Result<Completion, CompletionError>> for Outcome {
    fn from(result: Result<Completion, CompletionError>) -> Self {
        match result {
            Ok(completion) => Outcome::Success(completion),
            Err(CompletionError::UpstreamOverloaded(_)) => Outcome::Retryable {
                reason: OVERLOAD_REASON.to_string(),
            },
            Err(cause) => Outcome::Fatal { cause },
        }
    }
}

/// Issues completion requests for trimmed windows
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn request(&self, window: &TrimmedWindow) -> Outcome;
}

/// HTTP client for an OpenAI-compatible chat completion endpoint
pub struct HttpCompletionClient {
    http: Client,
    url: Url,
    authorization: Option<HeaderValue>,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CompletionError::Initialization(e.to_string()))?;

        let mut url = Url::parse(&config.endpoint).map_err(|e| {
            CompletionError::Initialization(format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;
        if let Some(conversation_id) = &config.conversation_id {
            url.query_pairs_mut()
                .append_pair("conversation_id", conversation_id);
        }

        let authorization = config
            .api_key
            .as_ref()
            .map(|key| {
                let mut value = HeaderValue::from_str(key.expose_secret()).map_err(|_| {
                    CompletionError::Initialization("api key is not a valid header value".to_string())
                })?;
                value.set_sensitive(true);
                Ok::<_, CompletionError>(value)
            })
            .transpose()?;

        Ok(Self {
            http,
            url,
            authorization,
            model: config.model.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn try_request(&self, window: &TrimmedWindow) -> Result<Completion, CompletionError> {
        let body = serde_json::to_vec(&CompletionRequest {
            messages: window.turns(),
            stream: false,
            model: &self.model,
        })
        .map_err(|e| CompletionError::Serialization(e.to_string()))?;

        debug!(
            turns = window.len(),
            tokens = window.tokens(),
            model = %self.model,
            "Submitting completion request"
        );

        let mut req = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(authorization) = &self.authorization {
            req = req.header(AUTHORIZATION, authorization.clone());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Transport(format!("request timed out: {}", e))
            } else {
                CompletionError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        classify_response(status, &bytes)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn request(&self, window: &TrimmedWindow) -> Outcome {
        let start = Instant::now();
        let outcome = Outcome::from(self.try_request(window).await);
        METRICS.record_completion(outcome.label(), start.elapsed());
        outcome
    }
}

/// Classify a response body: the first choice wins, otherwise the error payload decides.
///
/// The status code is informational only; overload errors arrive with non-2xx codes.
pub fn classify_response(status: StatusCode, body: &[u8]) -> Result<Completion, CompletionError> {
    let parsed: CompletionResponse = serde_json::from_slice(body).map_err(|e| {
        CompletionError::MalformedResponse(format!("status {}: {}", status, e))
    })?;

    if let Some(choice) = parsed.choices.into_iter().next() {
        return Ok(choice.into());
    }

    match parsed.error {
        Some(error) if error.kind == OVERLOAD_ERROR_TYPE => {
            warn!("Upstream overloaded: {}", error.message);
            Err(CompletionError::UpstreamOverloaded(error.message))
        }
        Some(error) => Err(CompletionError::UpstreamOther {
            kind: error.kind,
            message: error.message,
        }),
        None => Err(CompletionError::MalformedResponse(format!(
            "status {}: no choices and no error payload",
            status
        ))),
    }
}
