//! Pipeline tuning loaded from `config.yaml`.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```yaml
//! chunk_budget: 2000
//! max_attempts: 3
//! concurrency: 4
//! call_timeout_secs: 60
//! backoff: { base_ms: 1000, max_ms: 30000, jitter_ms: 250 }
//! meta_excerpt_chars: 4000
//! context_chars: 4000
//! clean_input: true
//! templates:
//!   meta_description: content_generation.meta_description
//! categories: [AI, 기술, 뉴스]
//! tags: [인공지능, 기술동향, 자동화]
//! ```

use crate::api::Backoff;
use crate::error::{PipelineError, Result};
use crate::models::SectionType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Hard ceiling on the body excerpt sent for the meta description.
pub const MAX_META_EXCERPT_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Character budget per chunk.
    pub chunk_budget: usize,
    /// Service calls allowed per section.
    pub max_attempts: usize,
    /// Concurrent per-chunk generations.
    pub concurrency: usize,
    pub call_timeout_secs: u64,
    pub backoff: BackoffConfig,
    pub meta_excerpt_chars: usize,
    /// Cap on aggregated analysis text passed to the conclusion prompt.
    pub context_chars: usize,
    pub clean_input: bool,
    pub templates: TemplatePaths,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_budget: 2000,
            max_attempts: 3,
            concurrency: 4,
            call_timeout_secs: 60,
            backoff: BackoffConfig::default(),
            meta_excerpt_chars: MAX_META_EXCERPT_CHARS,
            context_chars: 4000,
            clean_input: true,
            templates: TemplatePaths::default(),
            categories: vec!["AI".into(), "기술".into(), "뉴스".into()],
            tags: vec!["인공지능".into(), "기술동향".into(), "자동화".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

impl From<BackoffConfig> for Backoff {
    fn from(c: BackoffConfig) -> Self {
        Backoff {
            base: Duration::from_millis(c.base_ms),
            max: Duration::from_millis(c.max_ms),
            jitter: Duration::from_millis(c.jitter_ms),
        }
    }
}

/// Dotted catalog path used for each section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplatePaths {
    pub intro: String,
    pub trends: String,
    pub technical: String,
    pub conclusion: String,
    pub meta_description: String,
}

impl Default for TemplatePaths {
    fn default() -> Self {
        Self {
            intro: "content_generation.news_blog_post_intro".into(),
            trends: "news_analysis.trend_analysis".into(),
            technical: "news_analysis.technical_analysis".into(),
            conclusion: "content_generation.news_blog_post_conclusion".into(),
            meta_description: "content_generation.meta_description".into(),
        }
    }
}

impl TemplatePaths {
    pub fn for_section(&self, section: SectionType) -> &str {
        match section {
            SectionType::Intro => &self.intro,
            SectionType::Trends => &self.trends,
            SectionType::Technical => &self.technical,
            SectionType::Conclusion => &self.conclusion,
            SectionType::MetaDescription => &self.meta_description,
        }
    }

    pub fn all(&self) -> [&str; 5] {
        [
            self.intro.as_str(),
            self.trends.as_str(),
            self.technical.as_str(),
            self.conclusion.as_str(),
            self.meta_description.as_str(),
        ]
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Self::default().validated();
        }
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| PipelineError::config(format!("pipeline config: {e}")))?;
        config.validated()
    }

    /// Load `config.yaml`; a missing file means defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => {
                let config = Self::from_yaml_str(&raw)?;
                info!(?config, "Loaded pipeline configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Pipeline config not found; using defaults");
                Self::default().validated()
            }
            Err(e) => Err(PipelineError::io(path, e)),
        }
    }

    /// Reject values the pipeline cannot run with; clamp the meta excerpt.
    pub fn validated(mut self) -> Result<Self> {
        if self.max_attempts == 0 {
            return Err(PipelineError::config("max_attempts must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::config("concurrency must be at least 1"));
        }
        if self.chunk_budget == 0 {
            return Err(PipelineError::config("chunk_budget must be positive"));
        }
        if self.call_timeout_secs == 0 {
            return Err(PipelineError::config("call_timeout_secs must be positive"));
        }
        if self.meta_excerpt_chars > MAX_META_EXCERPT_CHARS {
            warn!(
                requested = self.meta_excerpt_chars,
                max = MAX_META_EXCERPT_CHARS,
                "meta_excerpt_chars clamped"
            );
            self.meta_excerpt_chars = MAX_META_EXCERPT_CHARS;
        }
        Ok(self)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
