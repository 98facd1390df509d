//! Data models flowing through the blog pipeline.
//!
//! - [`NewsItem`]: one cleaned news entry handed over by the crawler
//! - [`SectionType`] / [`SectionResult`]: one generated part of the post
//! - [`BlogPost`]: the assembled post handed to the external publisher
//! - [`RunReport`]: the post plus a record of which sections fell back
//!
//! `NewsItem` accepts the field names the crawlers emit (`tweet_text`,
//! `user_name`, `created_at`, `link`, ...) so their JSON dumps can be fed in
//! unchanged.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A single news entry, immutable once ingested.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewsItem {
    /// Outlet or account that published the item.
    #[serde(default, alias = "user_name", alias = "feed")]
    pub source: String,
    /// Publication date.
    #[serde(
        default = "today",
        alias = "created_at",
        alias = "timestamp",
        alias = "published",
        deserialize_with = "de_news_date"
    )]
    pub published_at: NaiveDate,
    /// Body text of the item.
    #[serde(
        alias = "tweet_text",
        alias = "content",
        alias = "description",
        alias = "cleaned_text"
    )]
    pub text: String,
    /// Link back to the original item (may be empty).
    #[serde(default, alias = "link")]
    pub url: String,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn de_news_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_news_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized date `{raw}`")))
}

/// Parse the date formats our news sources emit.
///
/// Accepts `YYYY-MM-DD`, RFC 3339, RFC 2822 (RSS), `YYYY-MM-DD HH:MM:SS`,
/// and the Twitter API's `Wed Oct 10 20:19:24 +0000 2018`.
pub fn parse_news_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|dt| dt.date_naive())
}

impl NewsItem {
    pub fn new(
        source: impl Into<String>,
        published_at: NaiveDate,
        text: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            published_at,
            text: text.into(),
            url: url.into(),
        }
    }

    /// Serialized form used inside prompts and for chunk size accounting.
    pub fn prompt_text(&self) -> String {
        let mut s = format!(
            "Source: {}\nDate: {}\nContent: {}",
            self.source, self.published_at, self.text
        );
        if !self.url.is_empty() {
            s.push_str("\nURL: ");
            s.push_str(&self.url);
        }
        s
    }

    /// Character count of [`NewsItem::prompt_text`].
    pub fn prompt_chars(&self) -> usize {
        self.prompt_text().chars().count()
    }

    /// Extract the domain name (before .com/.org/etc) from the item URL.
    /// For example: "https://www.theverge.com/ai" -> "theverge"
    pub fn domain_label(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() >= 2 {
            Some(parts[parts.len() - 2].to_string())
        } else {
            None
        }
    }
}

/// The named parts of a blog post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Intro,
    Trends,
    Technical,
    Conclusion,
    MetaDescription,
}

impl SectionType {
    /// Position in the assembled post. Meta description sorts last and is
    /// never part of the body.
    pub fn canonical_rank(self) -> u8 {
        match self {
            Self::Intro => 0,
            Self::Trends => 1,
            Self::Technical => 2,
            Self::Conclusion => 3,
            Self::MetaDescription => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Trends => "trends",
            Self::Technical => "technical",
            Self::Conclusion => "conclusion",
            Self::MetaDescription => "meta_description",
        }
    }

    /// Korean label used in placeholder text.
    pub fn label(self) -> &'static str {
        match self {
            Self::Intro => "도입부",
            Self::Trends => "트렌드 분석",
            Self::Technical => "기술 분석",
            Self::Conclusion => "결론",
            Self::MetaDescription => "메타 설명",
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a section ended up with placeholder text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// Every attempt produced text outside the configured bounds.
    LengthViolation {
        last_chars: usize,
        min: Option<usize>,
        max: Option<usize>,
    },
    /// Transient service failures outlasted the attempt budget.
    ServiceUnavailable { error: String },
    /// The service refused the request outright (auth, bad request).
    ServiceRejected { error: String },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthViolation {
                last_chars,
                min,
                max,
            } => write!(
                f,
                "length violation ({last_chars} chars, bounds [{}, {}])",
                min.map_or("-".to_string(), |v| v.to_string()),
                max.map_or("-".to_string(), |v| v.to_string())
            ),
            Self::ServiceUnavailable { error } => write!(f, "service unavailable: {error}"),
            Self::ServiceRejected { error } => write!(f, "service rejected request: {error}"),
        }
    }
}

/// One generated section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SectionResult {
    pub section_type: SectionType,
    /// Chunk this section was generated from, for per-chunk sections.
    pub chunk_index: Option<usize>,
    pub text: String,
    pub char_count: usize,
    pub is_fallback: bool,
    pub fallback_reason: Option<FallbackReason>,
    /// Service calls spent producing this section.
    pub attempts: usize,
}

impl SectionResult {
    pub fn accepted(
        section_type: SectionType,
        chunk_index: Option<usize>,
        text: String,
        attempts: usize,
    ) -> Self {
        let char_count = text.chars().count();
        Self {
            section_type,
            chunk_index,
            text,
            char_count,
            is_fallback: false,
            fallback_reason: None,
            attempts,
        }
    }

    pub fn fallback(
        section_type: SectionType,
        chunk_index: Option<usize>,
        reason: FallbackReason,
        attempts: usize,
    ) -> Self {
        let text = placeholder_text(section_type);
        let char_count = text.chars().count();
        Self {
            section_type,
            chunk_index,
            text,
            char_count,
            is_fallback: true,
            fallback_reason: Some(reason),
            attempts,
        }
    }
}

/// Labeled sample text substituted for a section that could not be generated.
pub fn placeholder_text(section_type: SectionType) -> String {
    match section_type {
        SectionType::MetaDescription => {
            "[샘플] 오늘의 AI 뉴스와 기술 동향을 정리했습니다. 자동 생성에 실패하여 임시 설명이 표시됩니다."
                .to_string()
        }
        other => format!(
            "> [샘플 콘텐츠] {} 섹션을 자동으로 생성하지 못했습니다. 원문 뉴스를 참고해 주세요.",
            other.label()
        ),
    }
}

/// A section that used fallback content, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FallbackEntry {
    pub section_type: SectionType,
    pub chunk_index: Option<usize>,
    pub reason: FallbackReason,
}

/// The finished post handed to the external publisher.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlogPost {
    pub title: String,
    /// Body sections in canonical order.
    pub sections: Vec<SectionResult>,
    /// Markdown body: section texts joined by blank lines.
    pub body: String,
    pub meta_description: String,
    pub meta_fallback: Option<FallbackReason>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl BlogPost {
    /// Every section (meta description included) that used fallback content.
    pub fn fallbacks(&self) -> Vec<FallbackEntry> {
        let mut entries: Vec<FallbackEntry> = self
            .sections
            .iter()
            .filter_map(|s| {
                s.fallback_reason.clone().map(|reason| FallbackEntry {
                    section_type: s.section_type,
                    chunk_index: s.chunk_index,
                    reason,
                })
            })
            .collect();
        if let Some(reason) = &self.meta_fallback {
            entries.push(FallbackEntry {
                section_type: SectionType::MetaDescription,
                chunk_index: None,
                reason: reason.clone(),
            });
        }
        entries
    }
}

/// Outcome of a completed pipeline run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunReport {
    pub post: BlogPost,
    pub fallbacks: Vec<FallbackEntry>,
    pub item_count: usize,
    pub chunk_count: usize,
    pub service_calls: usize,
    pub elapsed_ms: u64,
}
