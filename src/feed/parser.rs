use crate::types::Entry;
use anyhow::Result;
use feed_rs::parser;

/// Entries recovered from one feed document.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub entries: Vec<Entry>,
    /// Items dropped because they carried no publish or update time.
    pub skipped: usize,
}

/// Parse RSS/Atom bytes into timestamped entries, keeping document order.
///
/// `fallback_category` labels entries that carry no category of their own.
pub fn parse_feed(bytes: &[u8], fallback_category: Option<&str>) -> Result<ParseResult> {
    let feed = parser::parse(bytes)?;

    let mut result = ParseResult::default();
    for entry in feed.entries {
        let Some(published) = entry.published.or(entry.updated) else {
            result.skipped += 1;
            continue;
        };

        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();
        let summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let category = entry
            .categories
            .first()
            .map(|c| c.term.clone())
            .or_else(|| fallback_category.map(str::to_string));

        result.entries.push(Entry {
            title,
            summary,
            link,
            published,
            category,
        });
    }

    Ok(result)
}
