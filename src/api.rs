//! Generation service interface and the OpenAI-compatible adapter.
//!
//! The pipeline talks to the LLM through one narrow trait,
//! [`GenerationService`]. Retry decisions are not made here; the section
//! generator owns the attempt budget so that length retries and transport
//! retries draw from the same ceiling. This module only supplies the pieces
//! it needs:
//!
//! - [`GenerationService`]: async `complete(messages, temperature, max_tokens)`
//! - [`Backoff`]: exponential delay with jitter between transient failures
//! - [`OpenAiCompatible`]: `/chat/completions` client over `reqwest`
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base * 2^(attempt-1), max) + random_jitter(0..=jitter)
//! ```

use crate::error::ServiceError;
use rand::{Rng, rng};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// The external text generation service.
///
/// Implementors send a message sequence to an LLM and return the text of the
/// reply. A single call is one attempt; callers decide whether to retry.
#[allow(async_fn_in_trait)]
pub trait GenerationService {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ServiceError>;
}

/// Exponential backoff between attempts that failed transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the second attempt; doubles for each further one.
    pub base: Duration,
    /// Cap on the exponential part.
    pub max: Duration,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl Backoff {
    /// No waiting at all. Used by tests and dry runs.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Deterministic part of the delay after failed attempt `attempt` (1-based).
    pub fn base_delay(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        self.base.saturating_mul(1 << shift).min(self.max)
    }

    /// Delay after failed attempt `attempt`, jitter included.
    pub fn delay(&self, attempt: usize) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng().random_range(0..=jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }
}

// ---- OpenAI-compatible HTTP adapter ----

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

/// Chat-completions client for OpenAI and API-compatible servers.
pub struct OpenAiCompatible {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatible {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Map a non-success HTTP status onto the service error taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> ServiceError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ServiceError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ServiceError::Timeout,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Auth(body),
        s if s.is_server_error() => ServiceError::Server(s.as_u16()),
        s => ServiceError::Rejected {
            status: s.as_u16(),
            message: body,
        },
    }
}

fn classify_transport(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout
    } else {
        ServiceError::Network(e.to_string())
    }
}

impl GenerationService for OpenAiCompatible {
    #[instrument(level = "info", skip_all, fields(model = %self.model, messages = messages.len()))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ServiceError> {
        let t0 = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, body);
            warn!(elapsed_ms = t0.elapsed().as_millis(), %status, error = %err, "API call failed");
            return Err(err);
        }

        let parsed: ChatResponse = response.json().await.map_err(classify_transport)?;
        if let Some(usage) = &parsed.usage {
            info!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Token usage"
            );
        }
        debug!(elapsed_ms = t0.elapsed().as_millis(), "API call succeeded");

        reply_text(parsed)
    }
}

/// First choice's text; blank or missing content is [`ServiceError::EmptyResponse`].
fn reply_text(parsed: ChatResponse) -> Result<String, ServiceError> {
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(ServiceError::EmptyResponse)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let b = Backoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };
        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(2), Duration::from_secs(2));
        assert_eq!(b.delay(3), Duration::from_secs(4));
        assert_eq!(b.delay(6), Duration::from_secs(30));
        assert_eq!(b.delay(500), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let b = Backoff::default();
        for _ in 0..50 {
            let d = b.delay(1);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_millis(1250));
        }
        assert_eq!(Backoff::none().delay(3), Duration::ZERO);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ServiceError::RateLimited
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            ServiceError::Server(502)
        );
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key".into()),
            ServiceError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "too long".into()),
            ServiceError::Rejected { status: 400, .. }
        ));
        assert!(classify_status(StatusCode::GATEWAY_TIMEOUT, String::new()).is_transient());
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let req = ChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: 0.5,
            max_tokens: 100,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 100);
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"안녕"}}],
                     "usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("안녕"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn test_reply_text_blank_content_is_empty_response() {
        for raw in [
            r#"{"choices":[{"message":{"content":""}}]}"#,
            r#"{"choices":[{"message":{"content":"  \n "}}]}"#,
            r#"{"choices":[{"message":{}}]}"#,
            r#"{"choices":[]}"#,
        ] {
            let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
            assert_eq!(reply_text(parsed), Err(ServiceError::EmptyResponse));
        }
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":" 답변 "}}]}"#).unwrap();
        assert_eq!(reply_text(parsed).unwrap(), " 답변 ");
    }

    #[test]
    fn test_client_debug_hides_key() {
        let client = OpenAiCompatible::new("sk-secret", "gpt-4o-mini").with_base_url("http://x/v1/");
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("http://x/v1"));
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_scripted_service_replays() {
        let svc = mock::ScriptedService::new(vec![Ok("one".into()), Err(ServiceError::Timeout)]);
        let msgs = [ChatMessage::user("q")];
        assert_eq!(svc.complete(&msgs, 0.5, 10).await.unwrap(), "one");
        assert_eq!(svc.complete(&msgs, 0.5, 10).await, Err(ServiceError::Timeout));
        assert_eq!(svc.complete(&msgs, 0.5, 10).await, Err(ServiceError::EmptyResponse));
        assert_eq!(svc.call_count(), 3);
    }
}
