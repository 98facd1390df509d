//! Pipeline orchestration.
//!
//! Stages run strictly in sequence:
//!
//! ```text
//! Ingest → Chunk → GenerateIntro → GenerateTrends → GenerateTechnical
//!        → GenerateConclusion → Assemble → Done
//! ```
//!
//! Trend and technical analysis issue one generation per chunk. Those calls
//! are independent, so they run concurrently up to `concurrency` at a time,
//! and their results are collected back in chunk order (never completion
//! order). A failing section falls back locally and the run moves on; only
//! configuration errors and an empty news set stop a run.

use crate::api::GenerationService;
use crate::assembler::{PostAssembler, resolve_title};
use crate::chunker::{self, Chunk};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{NewsItem, RunReport, SectionResult, SectionType};
use crate::preprocess;
use crate::prompts::PromptCatalog;
use crate::section::{GenerationPolicy, SectionGenerator, SectionRequest};
use crate::utils::truncate_chars;
use chrono::Local;
use futures::stream::{self, StreamExt};
use std::cell::Cell;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Ingest,
    Chunk,
    GenerateIntro,
    GenerateTrends,
    GenerateTechnical,
    GenerateConclusion,
    Assemble,
    Done,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Box<RunReport>),
    /// Shutdown was requested; in-flight calls were dropped and no post
    /// was produced.
    Aborted { stage: Stage },
}

/// The blog generation pipeline.
pub struct PipelineOrchestrator<S> {
    generator: SectionGenerator<S>,
    config: PipelineConfig,
}

impl<S> PipelineOrchestrator<S>
where
    S: GenerationService,
{
    /// Build a pipeline, failing early if any configured template path is
    /// missing from the catalog.
    pub fn new(service: Arc<S>, catalog: Arc<PromptCatalog>, config: PipelineConfig) -> Result<Self> {
        let config = config.validated()?;
        catalog.require(&config.templates.all())?;
        let policy = GenerationPolicy {
            max_attempts: config.max_attempts,
            backoff: config.backoff.into(),
            call_timeout: config.call_timeout(),
        };
        Ok(Self {
            generator: SectionGenerator::new(service, catalog, policy),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run to completion.
    pub async fn run(&self, items: &[NewsItem], title: Option<&str>) -> Result<RunReport> {
        let stage = Cell::new(Stage::Ingest);
        self.execute(items, title, &stage).await
    }

    /// Run until done or until `shutdown` resolves, whichever comes first.
    pub async fn run_until<F>(
        &self,
        items: &[NewsItem],
        title: Option<&str>,
        shutdown: F,
    ) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        let stage = Cell::new(Stage::Ingest);
        tokio::select! {
            report = self.execute(items, title, &stage) => {
                report.map(|r| RunOutcome::Completed(Box::new(r)))
            }
            () = shutdown => {
                warn!(stage = ?stage.get(), "Shutdown requested; aborting run");
                Ok(RunOutcome::Aborted { stage: stage.get() })
            }
        }
    }

    fn enter(&self, cell: &Cell<Stage>, stage: Stage) {
        cell.set(stage);
        info!(?stage, "Entering stage");
    }

    fn request(&self, section: SectionType, items: usize, chunks: usize) -> SectionRequest {
        SectionRequest::new(section, self.config.templates.for_section(section))
            .with("news_count", items.to_string())
            .with("chunk_count", chunks.to_string())
            .with("date", Local::now().date_naive().to_string())
    }

    /// One section per chunk, bounded concurrency, results in chunk order.
    async fn per_chunk<F>(&self, chunks: &[Chunk], make: F) -> Result<Vec<SectionResult>>
    where
        F: Fn(&Chunk) -> SectionRequest,
    {
        let results: Vec<Result<SectionResult>> = stream::iter(chunks.iter().map(make))
            .map(|request| async move { self.generator.generate(&request).await })
            .buffered(self.config.concurrency)
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// Join usable analysis texts for downstream prompts.
    fn digest(&self, sections: &[SectionResult]) -> String {
        let joined = sections
            .iter()
            .filter(|s| !s.is_fallback)
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        truncate_chars(&joined, self.config.context_chars).to_string()
    }

    #[instrument(level = "info", skip_all, fields(input = items.len()))]
    async fn execute(
        &self,
        items: &[NewsItem],
        title: Option<&str>,
        stage: &Cell<Stage>,
    ) -> Result<RunReport> {
        let t0 = Instant::now();
        let calls_before = self.generator.calls_made();

        self.enter(stage, Stage::Ingest);
        let items = if self.config.clean_input {
            preprocess::clean(items)
        } else {
            items.to_vec()
        };
        if items.is_empty() {
            error!("No news items to process");
            return Err(PipelineError::EmptyInput);
        }

        self.enter(stage, Stage::Chunk);
        let chunks = chunker::split(&items, self.config.chunk_budget);
        if chunks.is_empty() {
            error!("Chunking produced no chunks");
            return Err(PipelineError::EmptyInput);
        }
        let (n_items, n_chunks) = (items.len(), chunks.len());
        info!(items = n_items, chunks = n_chunks, budget = self.config.chunk_budget, "Chunked news");

        self.enter(stage, Stage::GenerateIntro);
        let intro_request = self
            .request(SectionType::Intro, n_items, n_chunks)
            .with("news_data", chunks[0].text());
        let intro = self.generator.generate(&intro_request).await?;

        self.enter(stage, Stage::GenerateTrends);
        let trends = self
            .per_chunk(&chunks, |chunk| {
                self.request(SectionType::Trends, n_items, n_chunks)
                    .chunk(chunk.index)
                    .with("news_data", chunk.text())
                    .with("chunk_index", (chunk.index + 1).to_string())
            })
            .await?;

        self.enter(stage, Stage::GenerateTechnical);
        let technical = self
            .per_chunk(&chunks, |chunk| {
                let trend = &trends[chunk.index];
                let trend_text = if trend.is_fallback { "" } else { trend.text.as_str() };
                self.request(SectionType::Technical, n_items, n_chunks)
                    .chunk(chunk.index)
                    .with("news_data", chunk.text())
                    .with("chunk_index", (chunk.index + 1).to_string())
                    .with("trend_analysis", trend_text)
            })
            .await?;

        self.enter(stage, Stage::GenerateConclusion);
        let conclusion_request = self
            .request(SectionType::Conclusion, n_items, n_chunks)
            .with("trend_analysis", self.digest(&trends))
            .with("tech_analysis", self.digest(&technical));
        let conclusion = self.generator.generate(&conclusion_request).await?;

        self.enter(stage, Stage::Assemble);
        let intro_text = if intro.is_fallback { "" } else { intro.text.as_str() };
        let title = resolve_title(title, intro_text, Local::now().date_naive());
        let mut sections = Vec::with_capacity(2 + trends.len() + technical.len());
        sections.push(intro);
        sections.extend(trends);
        sections.extend(technical);
        sections.push(conclusion);

        let post = PostAssembler::new(&self.generator, self.config.templates.meta_description.clone())
            .excerpt_chars(self.config.meta_excerpt_chars)
            .hints(self.config.categories.clone(), self.config.tags.clone())
            .assemble(&title, sections)
            .await?;

        self.enter(stage, Stage::Done);
        let fallbacks = post.fallbacks();
        let report = RunReport {
            fallbacks,
            item_count: n_items,
            chunk_count: n_chunks,
            service_calls: self.generator.calls_made() - calls_before,
            elapsed_ms: u64::try_from(t0.elapsed().as_millis()).unwrap_or(u64::MAX),
            post,
        };
        info!(
            title = %report.post.title,
            calls = report.service_calls,
            fallbacks = report.fallbacks.len(),
            elapsed_ms = report.elapsed_ms,
            "Pipeline run complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatMessage;
    use crate::config::BackoffConfig;
    use crate::error::ServiceError;
    use crate::models::FallbackReason;
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CATALOG: &str = r#"
categories:
  content_generation:
    system: "블로거. {tone_guidelines}"
    templates:
      news_blog_post_intro:
        content: "INTRO {news_data}"
      news_blog_post_conclusion:
        content: "CONCLUSION {trend_analysis} | {tech_analysis}"
      meta_description:
        content: "META {post_title}"
        min_chars: 10
        max_chars: 200
  news_analysis:
    system: "Analyst."
    templates:
      trend_analysis:
        content: "TREND {news_data}"
      technical_analysis:
        content: "TECH {trend_analysis}"
"#;

    type Route = fn(&str) -> (u64, std::result::Result<String, ServiceError>);

    /// Answers by inspecting the user prompt; optional delay per reply.
    struct RoutedService {
        route: Route,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl RoutedService {
        fn new(route: Route) -> Arc<Self> {
            Arc::new(Self {
                route,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    impl GenerationService for RoutedService {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _: f32,
            _: u32,
        ) -> std::result::Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt.clone());
            let (delay_ms, reply) = (self.route)(&prompt);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            reply
        }
    }

    fn first_source(prompt: &str) -> String {
        prompt
            .split("Source: ")
            .nth(1)
            .and_then(|rest| rest.lines().next())
            .unwrap_or("?")
            .to_string()
    }

    fn happy(prompt: &str) -> (u64, std::result::Result<String, ServiceError>) {
        if prompt.starts_with("INTRO") {
            (0, Ok("# 이번 주 AI 동향\n도입부".into()))
        } else if prompt.starts_with("TREND") {
            let source = first_source(prompt);
            // First chunk finishes last.
            let delay = if source == "s0" { 40 } else { 0 };
            (delay, Ok(format!("trend-{source}")))
        } else if let Some(rest) = prompt.strip_prefix("TECH trend-") {
            (0, Ok(format!("tech-{rest}")))
        } else if prompt.starts_with("CONCLUSION") {
            (0, Ok("결론".into()))
        } else {
            (0, Ok("메타 설명입니다. 오늘의 AI 뉴스 요약.".into()))
        }
    }

    fn items(n: usize) -> Vec<NewsItem> {
        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        (0..n)
            .map(|i| NewsItem::new(format!("s{i}"), date, format!("{i:03} {}", "뉴스".repeat(50)), ""))
            .collect()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            backoff: BackoffConfig {
                base_ms: 0,
                max_ms: 0,
                jitter_ms: 0,
            },
            ..PipelineConfig::default()
        }
    }

    fn pipeline(svc: &Arc<RoutedService>) -> PipelineOrchestrator<RoutedService> {
        let catalog = Arc::new(PromptCatalog::from_yaml_str(CATALOG, None).unwrap());
        PipelineOrchestrator::new(Arc::clone(svc), catalog, config()).unwrap()
    }

    #[tokio::test]
    async fn test_full_run_in_canonical_order() {
        let svc = RoutedService::new(happy);
        let report = pipeline(&svc).run(&items(25), None).await.unwrap();

        assert_eq!(report.item_count, 25);
        assert_eq!(report.chunk_count, 2);
        // intro + 2 trends + 2 technical + conclusion + meta
        assert_eq!(report.service_calls, 7);
        assert_eq!(svc.calls.load(Ordering::SeqCst), 7);
        assert!(report.fallbacks.is_empty());

        let post = &report.post;
        assert_eq!(post.title, "이번 주 AI 동향");
        let texts: Vec<&str> = post.sections.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "# 이번 주 AI 동향\n도입부",
                "trend-s0",
                "trend-s13",
                "tech-s0",
                "tech-s13",
                "결론"
            ]
        );
        assert_eq!(post.meta_description, "메타 설명입니다. 오늘의 AI 뉴스 요약.");
        assert_eq!(post.categories, vec!["AI", "기술", "뉴스"]);

        let prompts = svc.prompts.lock().unwrap();
        let conclusion = prompts.iter().find(|p| p.starts_with("CONCLUSION")).unwrap();
        assert_eq!(conclusion, "CONCLUSION trend-s0\n\ntrend-s13 | tech-s0\n\ntech-s13");
    }

    #[tokio::test]
    async fn test_empty_input_fails_before_any_call() {
        let svc = RoutedService::new(happy);
        let err = pipeline(&svc).run(&[], None).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
        assert_eq!(svc.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_input_empty_after_cleaning_is_fatal() {
        let svc = RoutedService::new(happy);
        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        let noise = vec![NewsItem::new("a", date, "https://t.co/x @someone", "")];
        let err = pipeline(&svc).run(&noise, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
        assert_eq!(svc.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_intro_timeouts_fall_back_and_run_completes() {
        fn route(prompt: &str) -> (u64, std::result::Result<String, ServiceError>) {
            if prompt.starts_with("INTRO") {
                (0, Err(ServiceError::Timeout))
            } else {
                happy(prompt)
            }
        }
        let svc = RoutedService::new(route);
        let outcome = pipeline(&svc)
            .run_until(&items(5), Some("주간 AI"), std::future::pending())
            .await
            .unwrap();

        let RunOutcome::Completed(report) = outcome else {
            panic!("run should complete");
        };
        let intro = &report.post.sections[0];
        assert_eq!(intro.section_type, SectionType::Intro);
        assert!(intro.is_fallback);
        assert_eq!(intro.attempts, 3);
        assert_eq!(report.fallbacks.len(), 1);
        assert!(matches!(
            report.fallbacks[0].reason,
            FallbackReason::ServiceUnavailable { .. }
        ));
        assert_eq!(report.post.title, "주간 AI");
    }

    #[tokio::test]
    async fn test_fallback_intro_does_not_provide_title() {
        fn route(prompt: &str) -> (u64, std::result::Result<String, ServiceError>) {
            if prompt.starts_with("INTRO") {
                (0, Err(ServiceError::Auth("401".into())))
            } else {
                happy(prompt)
            }
        }
        let svc = RoutedService::new(route);
        let report = pipeline(&svc).run(&items(3), None).await.unwrap();
        assert!(report.post.title.starts_with("AI 뉴스 트렌드 리포트"));
    }

    #[tokio::test]
    async fn test_technical_skips_fallback_trend_text() {
        fn route(prompt: &str) -> (u64, std::result::Result<String, ServiceError>) {
            if prompt.starts_with("TREND") {
                (0, Err(ServiceError::Rejected {
                    status: 400,
                    message: "bad".into(),
                }))
            } else if prompt.starts_with("TECH") {
                (0, Ok(format!("tech[{}]", prompt.trim_start_matches("TECH").trim())))
            } else {
                happy(prompt)
            }
        }
        let svc = RoutedService::new(route);
        let report = pipeline(&svc).run(&items(3), None).await.unwrap();
        let tech = report
            .post
            .sections
            .iter()
            .find(|s| s.section_type == SectionType::Technical)
            .unwrap();
        assert_eq!(tech.text, "tech[]");
        assert_eq!(report.fallbacks[0].section_type, SectionType::Trends);
        assert_eq!(report.fallbacks[0].chunk_index, Some(0));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_without_post() {
        fn route(prompt: &str) -> (u64, std::result::Result<String, ServiceError>) {
            if prompt.starts_with("INTRO") {
                (10_000, Ok("never".into()))
            } else {
                happy(prompt)
            }
        }
        let svc = RoutedService::new(route);
        let outcome = pipeline(&svc)
            .run_until(
                &items(5),
                None,
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Aborted {
                stage: Stage::GenerateIntro
            }
        ));
        assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_concurrency_matches_parallel() {
        let svc = RoutedService::new(happy);
        let catalog = Arc::new(PromptCatalog::from_yaml_str(CATALOG, None).unwrap());
        let sequential = PipelineOrchestrator::new(
            Arc::clone(&svc),
            catalog,
            PipelineConfig {
                concurrency: 1,
                ..config()
            },
        )
        .unwrap();
        let seq = sequential.run(&items(25), None).await.unwrap();
        let par = pipeline(&svc).run(&items(25), None).await.unwrap();
        assert_eq!(seq.post.body, par.post.body);
    }

    #[test]
    fn test_missing_template_rejected_at_construction() {
        let svc = RoutedService::new(happy);
        let catalog = Arc::new(PromptCatalog::from_yaml_str(CATALOG, None).unwrap());
        let mut config = config();
        config.templates.conclusion = "content_generation.missing".into();
        let err = PipelineOrchestrator::new(svc, catalog, config).err().unwrap();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Ingest < Stage::Chunk);
        assert!(Stage::GenerateTechnical < Stage::GenerateConclusion);
        assert!(Stage::Assemble < Stage::Done);
    }
}
