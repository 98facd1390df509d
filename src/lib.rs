//! # AI News Blog
//!
//! Turns a batch of crawled AI news into a Korean-language blog post by
//! driving an OpenAI-compatible chat completion API through a fixed sequence
//! of prompt templates.
//!
//! ## Architecture
//!
//! 1. **Ingest**: Clean and dedupe crawler records ([`preprocess`])
//! 2. **Chunk**: Pack items into character-budgeted chunks ([`chunker`])
//! 3. **Generate**: Intro, per-chunk trend and technical analysis, and a
//!    conclusion, each with length checks, retries, and fallback text
//!    ([`section`])
//! 4. **Assemble**: Order sections, join the body, and add a meta description
//!    ([`assembler`])
//!
//! [`pipeline::PipelineOrchestrator`] runs the stages; [`outputs`] writes the
//! Markdown post and the JSON run report.

pub mod api;
pub mod assembler;
pub mod chunker;
pub mod config;
pub mod error;
pub mod models;
pub mod outputs;
pub mod pipeline;
pub mod preprocess;
pub mod prompts;
pub mod section;
pub mod tone;
pub mod utils;
