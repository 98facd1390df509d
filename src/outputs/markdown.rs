//! Markdown rendering with YAML front matter.
//!
//! ```text
//! ---
//! title: 이번 주 AI 동향
//! date: 2025-05-06
//! description: ...
//! categories:
//! - AI
//! tags:
//! - 인공지능
//! ---
//!
//! <body>
//! ```

use super::file_stem;
use crate::models::BlogPost;
use chrono::NaiveDate;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

#[derive(Serialize)]
struct FrontMatter<'a> {
    title: &'a str,
    date: NaiveDate,
    description: &'a str,
    categories: &'a [String],
    tags: &'a [String],
}

/// Render a post as front matter plus body.
pub fn render_markdown(post: &BlogPost) -> Result<String, serde_yaml::Error> {
    let front = serde_yaml::to_string(&FrontMatter {
        title: &post.title,
        date: post.created_at.date_naive(),
        description: &post.meta_description,
        categories: &post.categories,
        tags: &post.tags,
    })?;
    Ok(format!("---\n{front}---\n\n{}\n", post.body.trim_end()))
}

/// Write the rendered post to `{output_dir}/{stem}.md`.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn write_post(post: &BlogPost, output_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let md = render_markdown(post)?;
    fs::create_dir_all(output_dir).await?;
    let path = output_dir.join(format!("{}.md", file_stem(post)));
    fs::write(&path, md).await?;
    info!(path = %path.display(), "Wrote blog post Markdown");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn post() -> BlogPost {
        BlogPost {
            title: "AI: 에이전트의 부상".into(),
            sections: Vec::new(),
            body: "# 도입\n\n본문\n\n".into(),
            meta_description: "에이전트 관련 소식 요약".into(),
            meta_fallback: None,
            categories: vec!["AI".into(), "기술".into()],
            tags: vec!["인공지능".into()],
            created_at: Utc.with_ymd_and_hms(2025, 5, 6, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_render_front_matter() {
        let md = render_markdown(&post()).unwrap();
        assert!(md.starts_with("---\n"));
        assert!(md.ends_with("---\n\n# 도입\n\n본문\n"));

        let front = md
            .trim_start_matches("---\n")
            .split("---\n")
            .next()
            .unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(front).unwrap();
        // The colon in the title must survive quoting.
        assert_eq!(value["title"].as_str(), Some("AI: 에이전트의 부상"));
        assert_eq!(value["date"].as_str(), Some("2025-05-06"));
        assert_eq!(value["description"].as_str(), Some("에이전트 관련 소식 요약"));
        assert_eq!(value["categories"][1].as_str(), Some("기술"));
        assert_eq!(value["tags"][0].as_str(), Some("인공지능"));
    }

    #[tokio::test]
    async fn test_write_post() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_post(&post(), dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "2025-05-06_ai-에이전트의-부상.md");
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("에이전트 관련 소식 요약"));
    }
}
