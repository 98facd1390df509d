//! Writers for finished runs.
//!
//! # Submodules
//!
//! - [`markdown`]: The post as Markdown with YAML front matter
//! - [`json`]: The full [`RunReport`](crate::models::RunReport), fallbacks included
//!
//! # Output Structure
//!
//! Both files share a stem built from the post date and a slug of the title:
//!
//! ```text
//! output_dir/
//! ├── 2025-05-06_이번-주-ai-동향.md
//! └── 2025-05-06_이번-주-ai-동향.json
//! ```

pub mod json;
pub mod markdown;

use crate::models::BlogPost;
use crate::utils::slugify_title;

/// `{date}_{slug}`, shared by every writer so outputs pair up.
pub fn file_stem(post: &BlogPost) -> String {
    let date = post.created_at.date_naive();
    let slug = slugify_title(&post.title);
    if slug.is_empty() {
        format!("{date}_post")
    } else {
        format!("{date}_{slug}")
    }
}
