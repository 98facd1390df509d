//! Prompt template catalog.
//!
//! Templates live in one YAML (or JSON) file grouped by category:
//!
//! ```yaml
//! defaults:
//!   temperature: 0.7
//!   max_tokens: 500
//! categories:
//!   content_generation:
//!     system: "당신은 AI 전문 블로거입니다. {tone_guidelines}"
//!     templates:
//!       news_blog_post_intro:
//!         role: user
//!         content: "다음 뉴스를 바탕으로 도입부를 작성하세요:\n{news_data}"
//!         max_tokens: 800
//!         min_chars: 300
//!         max_chars: 1200
//! ```
//!
//! The nested tree is flattened once at load time into a table keyed by
//! dotted path (`content_generation.news_blog_post_intro`). Every template
//! is validated eagerly: unknown paths, out-of-range parameters and
//! malformed placeholders fail at startup, not halfway through a run.
//!
//! Placeholders are `{name}`; `{{` and `}}` produce literal braces.

use crate::error::{PipelineError, Result};
use crate::tone::ToneProfile;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Placeholder in system prompts replaced by the tone guidelines.
pub const TONE_PLACEHOLDER: &str = "{tone_guidelines}";

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 500;

/// Who a rendered template speaks as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
}

/// A validated prompt template.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    /// Dotted path, e.g. `content_generation.meta_description`.
    pub path: String,
    pub role: PromptRole,
    pub content: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub min_chars: Option<usize>,
    pub max_chars: Option<usize>,
    /// Placeholder names referenced by `content`, in order of first use.
    pub placeholders: Vec<String>,
}

impl PromptTemplate {
    /// Category part of the dotted path.
    pub fn category(&self) -> &str {
        self.path
            .rsplit_once('.')
            .map_or(self.path.as_str(), |(category, _)| category)
    }

    /// Substitute `{name}` placeholders from `context`.
    ///
    /// A placeholder the context does not supply is a config error: the
    /// template and the caller disagree about what is available.
    pub fn render(&self, context: &BTreeMap<String, String>) -> Result<String> {
        let mut missing = None;
        let rendered = scan(&self.content, |name, out| match context.get(name) {
            Some(value) => out.push_str(value),
            None => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
            }
        })
        .map_err(|e| PipelineError::config(format!("template `{}`: {e}", self.path)))?;

        match missing {
            Some(name) => Err(PipelineError::config(format!(
                "template `{}` needs `{{{name}}}` but the context does not provide it",
                self.path
            ))),
            None => Ok(rendered),
        }
    }

    /// Whether `chars` satisfies the template's length bounds.
    /// Unbounded templates accept any non-empty text.
    pub fn accepts_len(&self, chars: usize) -> bool {
        if chars == 0 {
            return false;
        }
        self.min_chars.is_none_or(|min| chars >= min) && self.max_chars.is_none_or(|max| chars <= max)
    }
}

/// Walk `content`, copying literal text and handing each placeholder name
/// to `on_placeholder`. Fails on unbalanced or empty braces.
fn scan<F>(content: &str, mut on_placeholder: F) -> std::result::Result<String, String>
where
    F: FnMut(&str, &mut String),
{
    let mut out = String::with_capacity(content.len());
    let mut chars = content.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|(_, n)| *n) == Some('{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().map(|(_, n)| *n) == Some('}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(format!("unclosed `{{` at byte {idx}"));
                }
                if name.is_empty() || !name.chars().all(|ch| ch.is_alphanumeric() || ch == '_') {
                    return Err(format!("invalid placeholder `{{{name}}}` at byte {idx}"));
                }
                on_placeholder(&name, &mut out);
            }
            '}' => return Err(format!("unmatched `}}` at byte {idx}")),
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Placeholder names in `content`, deduplicated, in order of first use.
pub fn placeholders(content: &str) -> std::result::Result<Vec<String>, String> {
    let mut names: Vec<String> = Vec::new();
    scan(content, |name, _| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    })?;
    Ok(names)
}

// ---- On-disk shape ----

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    defaults: Defaults,
    categories: BTreeMap<String, CategoryFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Defaults {
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CategoryFile {
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    requires_tone: bool,
    #[serde(default)]
    templates: BTreeMap<String, TemplateFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateFile {
    #[serde(default = "default_role")]
    role: PromptRole,
    content: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    min_chars: Option<usize>,
    max_chars: Option<usize>,
}

fn default_role() -> PromptRole {
    PromptRole::User
}

#[derive(Debug, Clone, PartialEq)]
struct SystemPrompt {
    content: String,
    requires_tone: bool,
}

/// Immutable table of validated templates plus the tone profile.
///
/// Built once at startup and shared through an `Arc` by every task.
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    templates: HashMap<String, PromptTemplate>,
    systems: HashMap<String, SystemPrompt>,
    tone: Option<ToneProfile>,
}

impl PromptCatalog {
    /// Parse a YAML catalog.
    pub fn from_yaml_str(raw: &str, tone: Option<ToneProfile>) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(raw)
            .map_err(|e| PipelineError::config(format!("prompt catalog: {e}")))?;
        Self::build(file, tone)
    }

    /// Parse a JSON catalog.
    pub fn from_json_str(raw: &str, tone: Option<ToneProfile>) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw)
            .map_err(|e| PipelineError::config(format!("prompt catalog: {e}")))?;
        Self::build(file, tone)
    }

    /// Load a catalog file; `.json` files are parsed as JSON, anything else
    /// as YAML.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load_file(path: impl AsRef<Path>, tone: Option<ToneProfile>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let catalog = if is_json {
            Self::from_json_str(&raw, tone)?
        } else {
            Self::from_yaml_str(&raw, tone)?
        };
        info!(
            templates = catalog.templates.len(),
            categories = catalog.systems.len(),
            tone = catalog.tone.is_some(),
            "Loaded prompt catalog"
        );
        Ok(Arc::new(catalog))
    }

    fn build(file: CatalogFile, tone: Option<ToneProfile>) -> Result<Self> {
        let defaults = file.defaults;
        check_params("defaults", defaults.temperature, defaults.max_tokens)?;

        let mut templates = HashMap::new();
        let mut systems = HashMap::new();

        for (category, cat) in file.categories {
            if category.is_empty() || category.contains('.') {
                return Err(PipelineError::config(format!(
                    "invalid category name `{category}`"
                )));
            }
            if let Some(system) = cat.system {
                let requires_tone = cat.requires_tone || system.contains(TONE_PLACEHOLDER);
                systems.insert(
                    category.clone(),
                    SystemPrompt {
                        content: system,
                        requires_tone,
                    },
                );
            } else if cat.requires_tone {
                return Err(PipelineError::config(format!(
                    "category `{category}` requires tone but has no system prompt"
                )));
            }

            for (name, t) in cat.templates {
                let path = format!("{category}.{name}");
                let temperature = t.temperature.unwrap_or(defaults.temperature);
                let max_tokens = t.max_tokens.unwrap_or(defaults.max_tokens);
                check_params(&path, temperature, max_tokens)?;
                if let (Some(min), Some(max)) = (t.min_chars, t.max_chars) {
                    if min > max {
                        return Err(PipelineError::config(format!(
                            "`{path}`: min_chars {min} exceeds max_chars {max}"
                        )));
                    }
                }
                let placeholders = placeholders(&t.content)
                    .map_err(|e| PipelineError::config(format!("`{path}`: {e}")))?;
                debug!(%path, ?placeholders, "Registered template");
                templates.insert(
                    path.clone(),
                    PromptTemplate {
                        path,
                        role: t.role,
                        content: t.content,
                        temperature,
                        max_tokens,
                        min_chars: t.min_chars,
                        max_chars: t.max_chars,
                        placeholders,
                    },
                );
            }
        }

        Ok(Self {
            templates,
            systems,
            tone,
        })
    }

    /// Look up a template by dotted path.
    pub fn load(&self, path: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(path)
            .ok_or_else(|| PipelineError::not_found(path))
    }

    /// Fail unless every path in `paths` resolves.
    pub fn require(&self, paths: &[&str]) -> Result<()> {
        paths.iter().try_for_each(|p| self.load(p).map(|_| ()))
    }

    /// The category's system prompt with tone guidelines substituted.
    ///
    /// A category without a system prompt yields an empty string.
    /// `MissingPlaceholder` means the category wants a tone and none is
    /// configured; [`PromptCatalog::system_prompt_without_tone`] is the
    /// degraded alternative.
    pub fn resolve_system_prompt(&self, category: &str) -> Result<String> {
        let Some(system) = self.systems.get(category) else {
            return if self.has_category(category) {
                Ok(String::new())
            } else {
                Err(PipelineError::not_found(category))
            };
        };
        match (&self.tone, system.requires_tone) {
            (Some(tone), _) => Ok(system.content.replace(TONE_PLACEHOLDER, tone.text())),
            (None, true) => Err(PipelineError::MissingPlaceholder {
                category: category.to_string(),
            }),
            (None, false) => Ok(system.content.clone()),
        }
    }

    /// The category's system prompt with the tone placeholder removed.
    pub fn system_prompt_without_tone(&self, category: &str) -> String {
        self.systems
            .get(category)
            .map(|s| s.content.replace(TONE_PLACEHOLDER, "").trim().to_string())
            .unwrap_or_default()
    }

    pub fn tone(&self) -> Option<&ToneProfile> {
        self.tone.as_ref()
    }

    fn has_category(&self, category: &str) -> bool {
        self.templates.values().any(|t| t.category() == category)
    }
}

fn check_params(path: &str, temperature: f32, max_tokens: u32) -> Result<()> {
    if !(0.0..=1.0).contains(&temperature) {
        return Err(PipelineError::config(format!(
            "`{path}`: temperature {temperature} outside [0, 1]"
        )));
    }
    if max_tokens == 0 {
        return Err(PipelineError::config(format!("`{path}`: max_tokens must be positive")));
    }
    Ok(())
}
