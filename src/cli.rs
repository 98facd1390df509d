//! Command-line interface definitions.
//!
//! API settings can come from flags or the usual `OPENAI_*` environment
//! variables.

use clap::Parser;
use std::path::PathBuf;

/// Generate a blog post from crawled AI news.
///
/// # Examples
///
/// ```sh
/// # Defaults: ./config.yaml, OPENAI_API_KEY from the environment
/// ai_news_blog --news data/news.json --prompts config/prompts.yaml -o ./blog
///
/// # With tone guidelines and a fixed title
/// ai_news_blog --news data/news.json --prompts config/prompts.yaml \
///     --tone config/tone_guidelines.txt --title "이번 주 AI 동향" -o ./blog
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Crawled news JSON (array of records)
    #[arg(short, long)]
    pub news: PathBuf,

    /// Prompt catalog (YAML or JSON)
    #[arg(short, long)]
    pub prompts: PathBuf,

    /// Tone guidelines file
    #[arg(short, long)]
    pub tone: Option<PathBuf>,

    /// Pipeline config.yaml (defaults are used if missing)
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Output directory for the Markdown post and JSON report
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Post title; otherwise taken from the intro heading
    #[arg(long)]
    pub title: Option<String>,

    /// API key for the chat completion service
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub base_url: Option<String>,

    /// Model name
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,
}
