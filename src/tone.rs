//! Tone guidelines injected into every system prompt.
//!
//! The guideline file is either plain text (used whole) or the sectioned
//! format the editorial team maintains:
//!
//! ```text
//! # comments are ignored
//! SYSTEM_PROMPT = """
//! 친근하지만 전문적인 어조로 작성합니다.
//! """
//! RESPONSE_STYLE = { ... }
//! ACCURACY_GUIDELINES = """
//! 사실과 추측을 구분합니다.
//! """
//! EMPATHY_RULES = """
//! ...
//! """
//! ```
//!
//! Only the `SYSTEM_PROMPT`, `ACCURACY_GUIDELINES` and `EMPATHY_RULES` bodies
//! reach the model, joined in that order. Blank lines inside a body are
//! dropped.

use crate::error::{PipelineError, Result};
use std::path::Path;
use tracing::{info, instrument};

const TEXT_SECTIONS: [&str; 3] = ["SYSTEM_PROMPT", "ACCURACY_GUIDELINES", "EMPATHY_RULES"];
const IGNORED_SECTIONS: [&str; 2] = ["RESPONSE_STYLE", "EXAMPLE_RESPONSES"];

/// Shared style/voice text. Read-only after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneProfile {
    text: String,
}

impl ToneProfile {
    /// Parse guideline text. Fails if nothing usable remains.
    pub fn parse(raw: &str) -> Result<Self> {
        let text = if is_sectioned(raw) {
            parse_sections(raw)
        } else {
            raw.trim().to_string()
        };
        if text.is_empty() {
            return Err(PipelineError::config("tone guidelines are empty"));
        }
        Ok(Self { text })
    }

    /// Read and parse a guideline file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let profile = Self::parse(&raw)?;
        info!(chars = profile.text.chars().count(), "Loaded tone guidelines");
        Ok(profile)
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

fn section_marker(line: &str) -> Option<&'static str> {
    TEXT_SECTIONS
        .iter()
        .chain(IGNORED_SECTIONS.iter())
        .copied()
        .find(|marker| line.starts_with(marker))
}

fn is_sectioned(raw: &str) -> bool {
    raw.lines().any(|l| section_marker(l.trim()).is_some())
}

fn parse_sections(raw: &str) -> String {
    let mut bodies: Vec<(&'static str, String)> =
        TEXT_SECTIONS.iter().map(|s| (*s, String::new())).collect();
    let mut current: Option<&'static str> = None;

    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(marker) = section_marker(line) {
            current = Some(marker);
            continue;
        }
        let Some(section) = current else { continue };
        let Some((_, body)) = bodies.iter_mut().find(|(name, _)| *name == section) else {
            // RESPONSE_STYLE / EXAMPLE_RESPONSES
            continue;
        };
        if line.starts_with("\"\"\"") {
            if !body.is_empty() {
                current = None;
            }
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }

    bodies
        .into_iter()
        .map(|(_, body)| body.trim().to_string())
        .filter(|body| !body.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTIONED: &str = r#"# 톤 가이드라인
SYSTEM_PROMPT = """
친근하지만 전문적인 어조로 작성합니다.

독자를 존중합니다.
"""

RESPONSE_STYLE = {
    "인사말": "안녕하세요!"
}

ACCURACY_GUIDELINES = """
사실과 추측을 구분합니다.
"""
EMPATHY_RULES = """
독자의 우려에 공감합니다.
"""
"#;

    #[test]
    fn test_parse_sectioned_file() {
        let tone = ToneProfile::parse(SECTIONED).unwrap();
        assert_eq!(
            tone.text(),
            "친근하지만 전문적인 어조로 작성합니다.\n독자를 존중합니다.\n\n사실과 추측을 구분합니다.\n\n독자의 우려에 공감합니다."
        );
        assert!(!tone.text().contains("인사말"));
    }

    #[test]
    fn test_parse_plain_text() {
        let tone = ToneProfile::parse("  Write plainly.\nNo hype.\n").unwrap();
        assert_eq!(tone.text(), "Write plainly.\nNo hype.");
    }

    #[test]
    fn test_parse_empty_is_config_error() {
        assert!(matches!(
            ToneProfile::parse("   \n"),
            Err(PipelineError::Config { .. })
        ));
        assert!(ToneProfile::parse("SYSTEM_PROMPT = \"\"\"\n\"\"\"\n").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone_guidelines.txt");
        std::fs::write(&path, SECTIONED).unwrap();
        let tone = ToneProfile::load(&path).await.unwrap();
        assert!(tone.text().starts_with("친근하지만"));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let err = ToneProfile::load("/definitely/not/here.txt").await.unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
