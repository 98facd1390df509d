//! # AI News Blog
//!
//! Reads crawled AI news, runs it through the blog generation pipeline, and
//! writes a Markdown post with front matter plus a JSON run report.
//!
//! ## Usage
//!
//! ```sh
//! OPENAI_API_KEY=sk-... ai_news_blog --news news.json --prompts prompts.yaml -o ./blog
//! ```
//!
//! Ctrl-C aborts the run; no post is written for an aborted run.

use ai_news_blog::api::OpenAiCompatible;
use ai_news_blog::config::PipelineConfig;
use ai_news_blog::outputs::{json, markdown};
use ai_news_blog::pipeline::{PipelineOrchestrator, RunOutcome};
use ai_news_blog::preprocess::load_news;
use ai_news_blog::prompts::PromptCatalog;
use ai_news_blog::tone::ToneProfile;
use ai_news_blog::utils::ensure_writable_dir;
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;

use cli::Cli;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("ai_news_blog starting up");

    let args = Cli::parse();
    debug!(news = %args.news.display(), prompts = %args.prompts.display(), "Parsed CLI arguments");

    // Early check: fail before spending any API calls
    let output_dir = args.output_dir.to_string_lossy().to_string();
    if let Err(e) = ensure_writable_dir(&output_dir).await {
        error!(path = %output_dir, error = %e, "Output directory is not writable");
        return Err(e);
    }

    // ---- Load resources ----
    let tone = match &args.tone {
        Some(path) => match ToneProfile::load(path).await {
            Ok(tone) => Some(tone),
            Err(e) => {
                warn!(error = %e, "Tone guidelines unavailable; continuing without them");
                None
            }
        },
        None => None,
    };
    let catalog = PromptCatalog::load_file(&args.prompts, tone).await?;
    let config = PipelineConfig::load(&args.config).await?;
    let items = load_news(&args.news).await?;

    let mut service = OpenAiCompatible::new(args.api_key, args.model);
    if let Some(url) = args.base_url {
        service = service.with_base_url(url);
    }
    info!(?service, "Generation service configured");

    let pipeline = PipelineOrchestrator::new(Arc::new(service), catalog, config)?;

    // ---- Run ----
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let report = match pipeline.run_until(&items, args.title.as_deref(), shutdown).await {
        Ok(RunOutcome::Completed(report)) => report,
        Ok(RunOutcome::Aborted { stage }) => {
            warn!(?stage, "Run aborted; nothing written");
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            return Err(e.into());
        }
    };

    for entry in &report.fallbacks {
        warn!(
            section = %entry.section_type,
            chunk = ?entry.chunk_index,
            reason = %entry.reason,
            "Section used fallback content"
        );
    }

    // ---- Outputs ----
    let md_path = markdown::write_post(&report.post, &args.output_dir).await?;
    if let Err(e) = json::write_report(&report, &args.output_dir).await {
        error!(error = %e, "Failed to write JSON report");
    }

    let elapsed = start_time.elapsed();
    info!(
        path = %md_path.display(),
        elapsed_secs = elapsed.as_secs_f64(),
        "Blog post generation complete"
    );

    Ok(())
}
