//! Blog post assembly: canonical ordering, body text, meta description.

use crate::api::GenerationService;
use crate::config::MAX_META_EXCERPT_CHARS;
use crate::error::Result;
use crate::models::{BlogPost, SectionResult, SectionType};
use crate::section::{SectionGenerator, SectionRequest};
use crate::utils::truncate_chars;
use chrono::{NaiveDate, Utc};
use tracing::{info, instrument};

/// Separator between sections in the assembled body.
pub const SECTION_SEPARATOR: &str = "\n\n";

/// Pick the post title: an explicit title wins, then the intro's first
/// Markdown heading, then a dated default.
pub fn resolve_title(explicit: Option<&str>, intro: &str, date: NaiveDate) -> String {
    if let Some(title) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    intro
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim())
        .filter(|heading| !heading.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("AI 뉴스 트렌드 리포트 ({date})"))
}

/// Sort body sections into intro, trends, technical, conclusion order.
/// Per-chunk sections keep chunk order. Meta description sections are
/// dropped; the assembler derives its own.
pub fn canonical_order(mut sections: Vec<SectionResult>) -> Vec<SectionResult> {
    sections.retain(|s| s.section_type != SectionType::MetaDescription);
    sections.sort_by_key(|s| (s.section_type.canonical_rank(), s.chunk_index));
    sections
}

/// Joins sections into a post and asks for its meta description.
pub struct PostAssembler<'a, S> {
    generator: &'a SectionGenerator<S>,
    meta_template: String,
    excerpt_chars: usize,
    categories: Vec<String>,
    tags: Vec<String>,
}

impl<'a, S> PostAssembler<'a, S>
where
    S: GenerationService,
{
    pub fn new(generator: &'a SectionGenerator<S>, meta_template: impl Into<String>) -> Self {
        Self {
            generator,
            meta_template: meta_template.into(),
            excerpt_chars: MAX_META_EXCERPT_CHARS,
            categories: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Characters of body sent as `post_content`, capped at
    /// [`MAX_META_EXCERPT_CHARS`].
    pub fn excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars.min(MAX_META_EXCERPT_CHARS);
        self
    }

    pub fn hints(mut self, categories: Vec<String>, tags: Vec<String>) -> Self {
        self.categories = categories;
        self.tags = tags;
        self
    }

    #[instrument(level = "info", skip_all, fields(%title, sections = sections.len()))]
    pub async fn assemble(&self, title: &str, sections: Vec<SectionResult>) -> Result<BlogPost> {
        let sections = canonical_order(sections);
        let body = sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR);

        // Placeholder sections stay in the body but never reach the prompt.
        let generated = sections
            .iter()
            .filter(|s| !s.is_fallback)
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR);
        let request = SectionRequest::new(SectionType::MetaDescription, self.meta_template.clone())
            .with("post_title", title)
            .with("post_content", truncate_chars(&generated, self.excerpt_chars));
        let meta = self.generator.generate(&request).await?;

        info!(
            body_chars = body.chars().count(),
            meta_chars = meta.char_count,
            meta_fallback = meta.is_fallback,
            "Assembled blog post"
        );

        Ok(BlogPost {
            title: title.to_string(),
            sections,
            body,
            meta_description: meta.text,
            meta_fallback: meta.fallback_reason,
            categories: self.categories.clone(),
            tags: self.tags.clone(),
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::ScriptedService;
    use crate::api::Backoff;
    use crate::error::ServiceError;
    use crate::models::FallbackReason;
    use crate::prompts::PromptCatalog;
    use crate::section::GenerationPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    const CATALOG: &str = r#"
categories:
  content_generation:
    system: "SEO"
    templates:
      meta_description:
        content: "{post_title}|{post_content}"
        min_chars: 120
        max_chars: 160
"#;

    fn generator(svc: &Arc<ScriptedService>) -> SectionGenerator<ScriptedService> {
        let catalog = Arc::new(PromptCatalog::from_yaml_str(CATALOG, None).unwrap());
        SectionGenerator::new(
            Arc::clone(svc),
            catalog,
            GenerationPolicy {
                max_attempts: 3,
                backoff: Backoff::none(),
                call_timeout: Duration::from_secs(5),
            },
        )
    }

    fn section(t: SectionType, chunk: Option<usize>, text: &str) -> SectionResult {
        SectionResult::accepted(t, chunk, text.to_string(), 1)
    }

    #[test]
    fn test_canonical_order_is_stable_by_chunk() {
        let shuffled = vec![
            section(SectionType::Conclusion, None, "end"),
            section(SectionType::Technical, Some(1), "tech1"),
            section(SectionType::Trends, Some(1), "trend1"),
            section(SectionType::MetaDescription, None, "meta"),
            section(SectionType::Intro, None, "intro"),
            section(SectionType::Technical, Some(0), "tech0"),
            section(SectionType::Trends, Some(0), "trend0"),
        ];
        let ordered: Vec<String> = canonical_order(shuffled).into_iter().map(|s| s.text).collect();
        assert_eq!(ordered, vec!["intro", "trend0", "trend1", "tech0", "tech1", "end"]);
    }

    #[test]
    fn test_resolve_title() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        assert_eq!(resolve_title(Some(" 직접 지정 "), "# 무시", date), "직접 지정");
        assert_eq!(resolve_title(None, "서론\n## AI 에이전트의 부상\n본문", date), "AI 에이전트의 부상");
        assert_eq!(resolve_title(Some(""), "heading 없음", date), "AI 뉴스 트렌드 리포트 (2025-05-06)");
        assert_eq!(resolve_title(None, "#\n본문", date), "AI 뉴스 트렌드 리포트 (2025-05-06)");
    }

    #[tokio::test]
    async fn test_assemble_joins_body_and_requests_meta() {
        let svc = Arc::new(ScriptedService::new(vec![Ok("m".repeat(130))]));
        let generator = generator(&svc);
        let assembler = PostAssembler::new(&generator, "content_generation.meta_description")
            .hints(vec!["AI".into()], vec!["인공지능".into()]);

        let post = assembler
            .assemble(
                "제목",
                vec![
                    section(SectionType::Conclusion, None, "C"),
                    section(SectionType::Intro, None, "I"),
                    section(SectionType::Trends, Some(0), "T"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(post.body, "I\n\nT\n\nC");
        assert_eq!(post.meta_description, "m".repeat(130));
        assert!(post.meta_fallback.is_none());
        assert_eq!(post.categories, vec!["AI"]);
        assert_eq!(post.tags, vec!["인공지능"]);
        assert_eq!(svc.user_prompts()[0], "제목|I\n\nT\n\nC");
    }

    #[tokio::test]
    async fn test_meta_excerpt_is_bounded() {
        let svc = Arc::new(ScriptedService::new(vec![Ok("m".repeat(130))]));
        let generator = generator(&svc);
        let assembler =
            PostAssembler::new(&generator, "content_generation.meta_description").excerpt_chars(10);

        assembler
            .assemble("t", vec![section(SectionType::Intro, None, &"가".repeat(50))])
            .await
            .unwrap();

        assert_eq!(svc.user_prompts()[0], format!("t|{}", "가".repeat(10)));
    }

    #[tokio::test]
    async fn test_meta_excerpt_skips_fallback_sections() {
        let svc = Arc::new(ScriptedService::new(vec![Ok("m".repeat(130))]));
        let generator = generator(&svc);
        let assembler = PostAssembler::new(&generator, "content_generation.meta_description");
        let failed_intro = SectionResult::fallback(
            SectionType::Intro,
            None,
            FallbackReason::ServiceRejected {
                error: "401".into(),
            },
            1,
        );

        let post = assembler
            .assemble(
                "t",
                vec![
                    failed_intro,
                    section(SectionType::Trends, Some(0), "T"),
                    section(SectionType::Conclusion, None, "C"),
                ],
            )
            .await
            .unwrap();

        assert!(post.body.contains("[샘플 콘텐츠]"));
        let prompt = &svc.user_prompts()[0];
        assert_eq!(prompt, "t|T\n\nC");
        assert!(!prompt.contains("샘플"));
    }

    #[tokio::test]
    async fn test_meta_fallback_is_reported() {
        let svc = Arc::new(ScriptedService::always(Err(ServiceError::Timeout)));
        let generator = generator(&svc);
        let assembler = PostAssembler::new(&generator, "content_generation.meta_description");

        let post = assembler
            .assemble("t", vec![section(SectionType::Intro, None, "I")])
            .await
            .unwrap();

        assert!(matches!(
            post.meta_fallback,
            Some(FallbackReason::ServiceUnavailable { .. })
        ));
        assert_eq!(post.fallbacks().len(), 1);
        assert_eq!(svc.call_count(), 3);
    }
}
