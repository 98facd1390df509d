//! Greedy, order-preserving partitioning of news items into bounded chunks.
//!
//! Size is measured in characters of each item's prompt serialization
//! ([`NewsItem::prompt_text`]), a stable stand-in for token count. Items are
//! joined by a blank line inside a chunk and the separator counts toward the
//! budget, so a chunk's rendered text never exceeds the budget unless the
//! chunk is a single oversized item.

use crate::models::NewsItem;
use tracing::{debug, instrument};

/// Separator between items in a chunk's rendered text.
pub const ITEM_SEPARATOR: &str = "\n\n";

/// An ordered batch of news items processed by one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the split output.
    pub index: usize,
    pub items: Vec<NewsItem>,
    char_count: usize,
}

impl Chunk {
    fn new(index: usize) -> Self {
        Self {
            index,
            items: Vec::new(),
            char_count: 0,
        }
    }

    fn push(&mut self, item: NewsItem, item_chars: usize) {
        if !self.items.is_empty() {
            self.char_count += ITEM_SEPARATOR.chars().count();
        }
        self.char_count += item_chars;
        self.items.push(item);
    }

    /// Character count of [`Chunk::text`].
    pub fn char_count(&self) -> usize {
        self.char_count
    }

    /// Rendered text handed to prompts as `news_data`.
    pub fn text(&self) -> String {
        self.items
            .iter()
            .map(NewsItem::prompt_text)
            .collect::<Vec<_>>()
            .join(ITEM_SEPARATOR)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split `items` into chunks of at most `budget` characters.
///
/// Items are packed in their original order; a new chunk starts whenever the
/// next item would push the current one over budget. An item that alone
/// exceeds the budget gets a chunk of its own rather than being dropped or
/// cut. Same input and budget always give the same boundaries.
#[instrument(level = "debug", skip(items), fields(items = items.len()))]
pub fn split(items: &[NewsItem], budget: usize) -> Vec<Chunk> {
    let sep = ITEM_SEPARATOR.chars().count();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current = Chunk::new(0);

    for item in items {
        let item_chars = item.prompt_chars();
        let needed = if current.is_empty() {
            item_chars
        } else {
            current.char_count + sep + item_chars
        };
        if !current.is_empty() && needed > budget {
            let next_index = current.index + 1;
            chunks.push(std::mem::replace(&mut current, Chunk::new(next_index)));
        }
        current.push(item.clone(), item_chars);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    debug!(
        chunks = chunks.len(),
        sizes = ?chunks.iter().map(Chunk::char_count).collect::<Vec<_>>(),
        "Split news into chunks"
    );
    chunks
}
