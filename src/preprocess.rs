//! Cleanup of crawled news text before chunking.
//!
//! Crawler output is noisy: RSS descriptions carry HTML, tweets carry links,
//! mentions and hashtags, and the same story shows up from several accounts.
//! [`clean`] normalizes each item and drops near-duplicates while keeping the
//! original order.

use crate::error::{PipelineError, Result};
use crate::models::NewsItem;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Items whose cleaned text shares this many leading characters are
/// considered the same story.
pub const DEDUPE_PREFIX_CHARS: usize = 100;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\S+").unwrap());
static HASHTAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip markup, links, mentions and hashtag markers; collapse whitespace.
pub fn clean_text(raw: &str) -> String {
    let text = if raw.contains('<') {
        Html::parse_fragment(raw)
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        raw.to_string()
    };
    let text = URL_RE.replace_all(&text, "");
    let text = MENTION_RE.replace_all(&text, "");
    let text = HASHTAG_RE.replace_all(&text, "$1");
    WS_RE.replace_all(&text, " ").trim().to_string()
}

fn dedupe_key(text: &str) -> String {
    text.chars().take(DEDUPE_PREFIX_CHARS).collect()
}

/// Clean every item, drop empties and near-duplicates, keep order.
///
/// Items without a source get their URL's domain label instead.
#[instrument(level = "info", skip_all, fields(input = items.len()))]
pub fn clean(items: &[NewsItem]) -> Vec<NewsItem> {
    let cleaned: Vec<NewsItem> = items
        .iter()
        .filter_map(|item| {
            let text = clean_text(&item.text);
            if text.is_empty() {
                debug!(url = %item.url, "Dropping item with no text after cleaning");
                return None;
            }
            let source = match item.source.trim() {
                "" => item.domain_label().unwrap_or_default(),
                s => s.to_string(),
            };
            Some(NewsItem {
                source,
                published_at: item.published_at,
                text,
                url: item.url.clone(),
            })
        })
        .unique_by(|item| dedupe_key(&item.text))
        .collect();

    info!(
        kept = cleaned.len(),
        dropped = items.len() - cleaned.len(),
        "Cleaned news items"
    );
    cleaned
}

/// Read a crawler export: a JSON array of news records.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_news(path: impl AsRef<Path>) -> Result<Vec<NewsItem>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let items: Vec<NewsItem> = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::config(format!("news file {}: {e}", path.display())))?;
    info!(count = items.len(), "Loaded news items");
    Ok(items)
}
