//! Per-section generation with length validation, retry and fallback.
//!
//! Each section is produced by a small state machine:
//!
//! ```text
//! Attempting(n) ──ok, in bounds──────────────▶ Success
//!       │ ──out of bounds, n < max──────────▶ Retry(n+1) + corrective note
//!       │ ──transient error, n < max────────▶ Retry(n+1) after backoff
//!       │ ──persistent error────────────────▶ FallbackUsed
//!       └ ──any failure, n == max───────────▶ FallbackUsed
//! ```
//!
//! One attempt is exactly one service call, so a section never costs more
//! than `max_attempts` calls no matter how length and transport failures
//! interleave. A fallback never surfaces the rejected text: the section gets
//! labeled placeholder content and the reason is recorded.

use crate::api::{Backoff, ChatMessage, ChatRole, GenerationService};
use crate::error::{PipelineError, Result, ServiceError};
use crate::models::{FallbackReason, SectionResult, SectionType};
use crate::prompts::{PromptCatalog, PromptRole, PromptTemplate};
use crate::utils::truncate_for_log;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Placeholder values for one prompt, keyed by placeholder name.
pub type PromptContext = BTreeMap<String, String>;

/// Retry ceiling, backoff and per-call timeout shared by all sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
    pub call_timeout: Duration,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Text(String),
    Failed(ServiceError),
}

/// Where the state machine goes after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Success(String),
    Retry {
        next: usize,
        /// Replacement corrective note; `None` keeps the current one.
        correction: Option<String>,
        /// Whether to back off before the next attempt.
        wait: bool,
    },
    FallbackUsed(FallbackReason),
}

/// Corrective instruction appended to the user prompt after a length miss.
pub fn correction_note(chars: usize, min: Option<usize>, max: Option<usize>) -> String {
    let max = max.map_or_else(|| "no limit".to_string(), |m| m.to_string());
    format!(
        "\n\nNote: your previous output was {chars} chars, target range is [{},{max}] chars. \
         Rewrite it so the length falls inside that range.",
        min.unwrap_or(1)
    )
}

/// Decide the next state after attempt `attempt` (1-based) of `max_attempts`.
pub fn transition(
    attempt: usize,
    max_attempts: usize,
    template: &PromptTemplate,
    outcome: AttemptOutcome,
) -> Transition {
    let exhausted = attempt >= max_attempts;
    match outcome {
        AttemptOutcome::Text(raw) => {
            let text = raw.trim().to_string();
            let chars = text.chars().count();
            if template.accepts_len(chars) {
                Transition::Success(text)
            } else if exhausted {
                Transition::FallbackUsed(FallbackReason::LengthViolation {
                    last_chars: chars,
                    min: template.min_chars,
                    max: template.max_chars,
                })
            } else {
                Transition::Retry {
                    next: attempt + 1,
                    correction: Some(correction_note(chars, template.min_chars, template.max_chars)),
                    wait: false,
                }
            }
        }
        // A blank reply is a length miss, not a refusal.
        AttemptOutcome::Failed(ServiceError::EmptyResponse) => {
            transition(attempt, max_attempts, template, AttemptOutcome::Text(String::new()))
        }
        AttemptOutcome::Failed(err) if !err.is_transient() => {
            Transition::FallbackUsed(FallbackReason::ServiceRejected {
                error: err.to_string(),
            })
        }
        AttemptOutcome::Failed(err) if exhausted => {
            Transition::FallbackUsed(FallbackReason::ServiceUnavailable {
                error: err.to_string(),
            })
        }
        AttemptOutcome::Failed(_) => Transition::Retry {
            next: attempt + 1,
            correction: None,
            wait: true,
        },
    }
}

/// What to generate: a section type, its template, and the prompt context.
#[derive(Debug, Clone)]
pub struct SectionRequest {
    pub section_type: SectionType,
    pub chunk_index: Option<usize>,
    pub template_path: String,
    pub context: PromptContext,
}

impl SectionRequest {
    pub fn new(section_type: SectionType, template_path: impl Into<String>) -> Self {
        Self {
            section_type,
            chunk_index: None,
            template_path: template_path.into(),
            context: PromptContext::new(),
        }
    }

    pub fn chunk(mut self, index: usize) -> Self {
        self.chunk_index = Some(index);
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Issues the LLM calls for one section at a time.
///
/// Holds only shared, read-only state plus a call counter, so one generator
/// serves every concurrent chunk task.
#[derive(Debug)]
pub struct SectionGenerator<S> {
    service: Arc<S>,
    catalog: Arc<PromptCatalog>,
    policy: GenerationPolicy,
    calls: AtomicUsize,
}

impl<S> SectionGenerator<S>
where
    S: GenerationService,
{
    pub fn new(service: Arc<S>, catalog: Arc<PromptCatalog>, policy: GenerationPolicy) -> Self {
        Self {
            service,
            catalog,
            policy,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn catalog(&self) -> &PromptCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }

    /// Total service calls issued so far.
    pub fn calls_made(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// System prompt for the template's category, degrading to the un-toned
    /// prompt when the tone profile is missing.
    fn system_prompt(&self, template: &PromptTemplate) -> Result<String> {
        let category = template.category();
        match self.catalog.resolve_system_prompt(category) {
            Ok(system) => Ok(system),
            Err(PipelineError::MissingPlaceholder { .. }) => {
                warn!(%category, "No tone guidelines configured; continuing without tone injection");
                Ok(self.catalog.system_prompt_without_tone(category))
            }
            Err(e) => Err(e),
        }
    }

    fn messages(&self, system: &str, template: &PromptTemplate, prompt: String) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        let role = match template.role {
            PromptRole::System => ChatRole::System,
            PromptRole::User => ChatRole::User,
        };
        messages.push(ChatMessage {
            role,
            content: prompt,
        });
        messages
    }

    async fn attempt(&self, messages: &[ChatMessage], template: &PromptTemplate) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let call = self
            .service
            .complete(messages, template.temperature, template.max_tokens);
        match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(Ok(text)) => AttemptOutcome::Text(text),
            Ok(Err(e)) => AttemptOutcome::Failed(e),
            Err(_) => AttemptOutcome::Failed(ServiceError::Timeout),
        }
    }

    /// Generate with the policy's attempt ceiling.
    pub async fn generate(&self, request: &SectionRequest) -> Result<SectionResult> {
        self.generate_with_attempts(request, self.policy.max_attempts)
            .await
    }

    /// Generate one section, making at most `max_attempts` service calls.
    ///
    /// Only configuration problems (unknown template, context missing a
    /// placeholder) are returned as errors; every service or length failure
    /// ends in a flagged fallback section.
    #[instrument(
        level = "info",
        skip_all,
        fields(section = %request.section_type, chunk = ?request.chunk_index, template = %request.template_path)
    )]
    pub async fn generate_with_attempts(
        &self,
        request: &SectionRequest,
        max_attempts: usize,
    ) -> Result<SectionResult> {
        let max_attempts = max_attempts.max(1);
        let template = self.catalog.load(&request.template_path)?;
        let system = self.system_prompt(template)?;
        let base_prompt = template.render(&request.context)?;

        let mut attempt = 1;
        let mut correction: Option<String> = None;

        loop {
            let prompt = match &correction {
                Some(note) => format!("{base_prompt}{note}"),
                None => base_prompt.clone(),
            };
            let messages = self.messages(&system, template, prompt);
            let outcome = self.attempt(&messages, template).await;
            if let AttemptOutcome::Text(text) = &outcome {
                debug!(attempt, preview = %truncate_for_log(text, 120), "Received section text");
            }

            match transition(attempt, max_attempts, template, outcome) {
                Transition::Success(text) => {
                    let result =
                        SectionResult::accepted(request.section_type, request.chunk_index, text, attempt);
                    info!(attempt, chars = result.char_count, "Section accepted");
                    return Ok(result);
                }
                Transition::Retry {
                    next,
                    correction: note,
                    wait,
                } => {
                    if let Some(note) = note {
                        warn!(attempt, max_attempts, "Section length out of bounds; retrying with correction");
                        correction = Some(note);
                    }
                    if wait {
                        let delay = self.policy.backoff.delay(attempt);
                        warn!(attempt, max_attempts, ?delay, "Generation call failed; backing off");
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    attempt = next;
                }
                Transition::FallbackUsed(reason) => {
                    warn!(attempt, %reason, "Section fell back to placeholder content");
                    return Ok(SectionResult::fallback(
                        request.section_type,
                        request.chunk_index,
                        reason,
                        attempt,
                    ));
                }
            }
        }
    }
}
