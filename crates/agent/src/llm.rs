//! Remote text-classification provider.
//!
//! [`RemoteClassifier`] is the seam the resilience cascade drives: one call per
//! `(credential, model)` pair, failing with a typed [`ProviderError`] so the
//! cascade never has to inspect error strings. [`GeminiClient`] is the HTTP
//! implementation used in production.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use ventix_core::config::ProviderConfig;

use crate::pool::FailureKind;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("transient provider failure: {0}")]
    Transient(String),
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            Self::InvalidCredential(_) => FailureKind::InvalidCredential,
            Self::Transient(_) => FailureKind::Transient,
        }
    }
}

#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    async fn call(
        &self,
        prompt: &str,
        model: &str,
        credential: &SecretString,
    ) -> Result<String, ProviderError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    reason: Option<String>,
}

/// `generateContent` client for the Generative Language API.
///
/// The credential travels in the `x-goog-api-key` header so it never shows up
/// in request URLs or logs.
#[derive(Clone, Debug)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ProviderError::Transient(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Self::new(config.base_url.clone(), Duration::from_secs(config.call_timeout_secs))
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }
}

#[async_trait]
impl RemoteClassifier for GeminiClient {
    async fn call(
        &self,
        prompt: &str,
        model: &str,
        credential: &SecretString,
    ) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            contents: [Content { parts: [Part { text: prompt }] }],
            generation_config: GenerationConfig { temperature: 0.1 },
        };

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", credential.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| ProviderError::Transient(format!("HTTP request failed: {error}")))?;

        let status = response.status();
        debug!(event_name = "agent.provider.response", status = %status, model, "provider responded");

        let body = response
            .text()
            .await
            .map_err(|error| ProviderError::Transient(format!("failed to read body: {error}")))?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|error| ProviderError::Transient(format!("malformed response: {error}")))?;

        parsed
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.text)
            .ok_or_else(|| ProviderError::Transient("response carried no text candidate".to_string()))
    }
}

fn classify_failure(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let api_error = serde_json::from_str::<ApiErrorEnvelope>(body).ok().map(|envelope| envelope.error);
    let message = api_error
        .as_ref()
        .map(|error| error.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("status {status}"));

    let key_rejected = api_error.as_ref().is_some_and(|error| {
        error.details.iter().any(|detail| detail.reason.as_deref() == Some("API_KEY_INVALID"))
    });
    let exhausted = api_error.as_ref().is_some_and(|error| error.status == "RESOURCE_EXHAUSTED");

    match status.as_u16() {
        429 => ProviderError::QuotaExceeded(message),
        401 | 403 => ProviderError::InvalidCredential(message),
        400 if key_rejected => ProviderError::InvalidCredential(message),
        _ if exhausted => ProviderError::QuotaExceeded(message),
        _ => ProviderError::Transient(message),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{GeminiClient, ProviderError, RemoteClassifier};

    const MODEL_PATH: &str = "/models/gemini-1.5-flash-latest:generateContent";

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(server.uri(), Duration::from_secs(5)).expect("client builds")
    }

    fn key(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[tokio::test]
    async fn returns_first_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .and(header("x-goog-api-key", "key-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "{\"intent\": \"check_stock\"}" }] }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .call("hola", "gemini-1.5-flash-latest", &key("key-a"))
            .await
            .expect("call succeeds");
        assert_eq!(text, "{\"intent\": \"check_stock\"}");
    }

    #[tokio::test]
    async fn rate_limit_maps_to_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED" }
            })))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .call("hola", "gemini-1.5-flash-latest", &key("key-a"))
            .await
            .expect_err("quota must fail");
        assert_eq!(error, ProviderError::QuotaExceeded("Quota exceeded".to_string()));
    }

    #[tokio::test]
    async fn rejected_key_maps_to_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "code": 400,
                    "message": "API key not valid. Please pass a valid API key.",
                    "status": "INVALID_ARGUMENT",
                    "details": [{
                        "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                        "reason": "API_KEY_INVALID"
                    }]
                }
            })))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .call("hola", "gemini-1.5-flash-latest", &key("bad"))
            .await
            .expect_err("invalid key must fail");
        assert!(matches!(error, ProviderError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn forbidden_maps_to_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .call("hola", "gemini-1.5-flash-latest", &key("key-a"))
            .await
            .expect_err("forbidden must fail");
        assert!(matches!(error, ProviderError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn server_errors_and_empty_candidates_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let first = client
            .call("hola", "gemini-1.5-flash-latest", &key("key-a"))
            .await
            .expect_err("503 must fail");
        assert!(matches!(first, ProviderError::Transient(_)));

        let second = client
            .call("hola", "gemini-1.5-flash-latest", &key("key-a"))
            .await
            .expect_err("empty candidates must fail");
        assert!(matches!(second, ProviderError::Transient(_)));
    }
}
