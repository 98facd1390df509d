//! JSON run report.
//!
//! The report carries the post plus run bookkeeping (counts, service calls,
//! elapsed time, and every fallback with its reason) so a caller can tell a
//! clean run from a degraded one without parsing Markdown.

use super::file_stem;
use crate::models::RunReport;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write a [`RunReport`] as pretty JSON to `{output_dir}/{stem}.json`.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn write_report(report: &RunReport, output_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    if let Err(e) = fs::create_dir_all(output_dir).await {
        error!(error = %e, "Failed to create output dir");
        return Err(e.into());
    }

    let path = output_dir.join(format!("{}.json", file_stem(&report.post)));
    fs::write(&path, json).await?;
    info!(
        path = %path.display(),
        fallbacks = report.fallbacks.len(),
        "Wrote run report"
    );
    Ok(path)
}
