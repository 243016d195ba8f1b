use chrono::{DateTime, Datelike, Utc};
use feed_rs::parser;

pub use feed_rs::parser::ParseFeedError;

/// One item of a parsed feed. Read-only; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl FeedEntry {
    /// The timestamp representing this entry's recency.
    ///
    /// First usable value of `published`, then `updated`. Zero-value
    /// timestamps (the Unix epoch, or year 1 and earlier) count as absent, so
    /// an entry carrying only placeholders has no effective timestamp.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        [self.published, self.updated]
            .into_iter()
            .flatten()
            .find(|ts| !is_zero_time(ts))
    }
}

/// Placeholder dates some generators emit instead of omitting the element.
fn is_zero_time(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() == 0 || ts.year() <= 1
}

/// Parses RSS, Atom or JSON Feed bytes into entries, in document order.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();

            FeedEntry {
                title,
                link,
                description,
                published: entry.published,
                updated: entry.updated,
            }
        })
        .collect();

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_rss() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
    <item>
        <title>First post</title>
        <link>https://example.com/1</link>
        <description>Hello &lt;b&gt;there&lt;/b&gt;</description>
        <pubDate>Mon, 01 Jan 2024 12:00:00 GMT</pubDate>
    </item>
    <item><title>No date</title><link>https://example.com/2</link></item>
</channel></rss>"#;
        let entries = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "First post");
        assert_eq!(entries[0].link, "https://example.com/1");
        assert!(entries[0].description.starts_with("Hello"));
        assert_eq!(entries[0].published, Some(ts("2024-01-01T12:00:00Z")));
        assert_eq!(entries[1].published, None);
        assert_eq!(entries[1].description, "");
    }

    #[test]
    fn test_parse_atom_updated_only() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom</title>
    <id>urn:feed</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <entry>
        <title>Atom entry</title>
        <id>urn:entry:1</id>
        <link href="https://example.com/atom/1"/>
        <updated>2024-01-01T06:00:00Z</updated>
        <content type="html">Body text</content>
    </entry>
</feed>"#;
        let entries = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://example.com/atom/1");
        assert_eq!(entries[0].published, None);
        assert_eq!(
            entries[0].effective_timestamp(),
            Some(ts("2024-01-01T06:00:00Z"))
        );
        assert_eq!(entries[0].description, "Body text");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_feed(b"<not valid xml").is_err());
    }

    #[test]
    fn test_missing_title_is_empty() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><item><link>https://example.com/x</link></item></channel></rss>"#;
        let entries = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(entries[0].title, "");
    }

    #[test]
    fn test_effective_prefers_published() {
        let entry = FeedEntry {
            published: Some(ts("2024-01-01T00:00:00Z")),
            updated: Some(ts("2024-01-05T00:00:00Z")),
            ..Default::default()
        };
        assert_eq!(entry.effective_timestamp(), entry.published);
    }

    #[test]
    fn test_effective_falls_back_to_updated() {
        let entry = FeedEntry {
            updated: Some(ts("2024-01-05T00:00:00Z")),
            ..Default::default()
        };
        assert_eq!(entry.effective_timestamp(), entry.updated);
    }

    #[test]
    fn test_zero_published_skipped() {
        let entry = FeedEntry {
            published: Some(DateTime::<Utc>::UNIX_EPOCH),
            updated: Some(ts("2024-01-05T00:00:00Z")),
            ..Default::default()
        };
        assert_eq!(entry.effective_timestamp(), entry.updated);
    }

    #[test]
    fn test_all_zero_has_no_timestamp() {
        let year_one = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();
        let entry = FeedEntry {
            published: Some(year_one),
            updated: Some(DateTime::<Utc>::UNIX_EPOCH),
            ..Default::default()
        };
        assert_eq!(entry.effective_timestamp(), None);
        assert_eq!(FeedEntry::default().effective_timestamp(), None);
    }
}
