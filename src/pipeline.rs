//! Fetch, filter and format for one category.
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::delivery::OutboundMessage;
use crate::feed::{FeedCategory, FeedEntry, FeedFetcher, FeedSource, FetchError};
use crate::format::PostFormatter;
use crate::window::WindowPolicy;

/// Default number of feeds fetched at once within a category.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Messages produced by one category run, plus counters for the run report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryBatch {
    /// Messages in source order.
    pub messages: Vec<OutboundMessage>,
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    /// Entries seen across all fetched feeds, before window filtering.
    pub entries_seen: usize,
}

/// Runs fetch, window filter and formatting over a category's sources.
#[derive(Debug, Clone)]
pub struct CategoryPipeline {
    fetcher: FeedFetcher,
    formatter: PostFormatter,
    window: WindowPolicy,
    concurrency: usize,
    sort_by_time: bool,
}

impl CategoryPipeline {
    pub fn new(fetcher: FeedFetcher, formatter: PostFormatter, window: WindowPolicy) -> Self {
        Self {
            fetcher,
            formatter,
            window,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            sort_by_time: false,
        }
    }

    /// Number of feeds fetched at once. Output order does not depend on it.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Stable-sort each batch oldest first instead of keeping source order.
    pub fn with_sort_by_time(mut self, sort_by_time: bool) -> Self {
        self.sort_by_time = sort_by_time;
        self
    }

    /// Builds the message batch for `category` using the window ending at `now`.
    ///
    /// A feed that fails to fetch or parse is logged and skipped; it never
    /// aborts the category.
    pub async fn run(&self, category: &FeedCategory, now: DateTime<Utc>) -> CategoryBatch {
        let window = self.window.at(now);
        let mut batch = CategoryBatch::default();
        let mut stamped = Vec::new();

        // Each fetch owns its source and a fetcher handle.
        let fetches: Vec<_> = category
            .sources
            .iter()
            .cloned()
            .map(|source| fetch_owned(self.fetcher.clone(), source))
            .collect();

        // `buffered` yields results in input order, so output matches the
        // configured source order regardless of which fetch finishes first.
        let mut results = stream::iter(fetches).buffered(self.concurrency);

        while let Some((source, result)) = results.next().await {
            let entries = match result {
                Ok(entries) => entries,
                Err(e) => {
                    batch.feeds_failed += 1;
                    tracing::warn!(
                        category = %category.name,
                        feed = %source.url,
                        title = %source.label(),
                        error = %e.kind,
                        "Skipping feed"
                    );
                    continue;
                }
            };

            batch.feeds_ok += 1;
            batch.entries_seen += entries.len();

            let before = stamped.len();
            for entry in entries.iter().filter(|e| window.includes(e)) {
                let text = self.formatter.format(entry, &source);
                stamped.push((entry.effective_timestamp(), text));
            }

            tracing::debug!(
                category = %category.name,
                feed = %source.url,
                entries = entries.len(),
                selected = stamped.len() - before,
                "Feed processed"
            );
        }

        if self.sort_by_time {
            stamped.sort_by_key(|(ts, _)| *ts);
        }

        batch.messages = stamped
            .into_iter()
            .map(|(_, text)| OutboundMessage {
                destination: category.channel_id,
                text,
            })
            .collect();

        tracing::info!(
            category = %category.name,
            feeds_ok = batch.feeds_ok,
            feeds_failed = batch.feeds_failed,
            selected = batch.messages.len(),
            window_start = %window.start,
            window_end = %window.end,
            "Category pipeline finished"
        );

        batch
    }
}

async fn fetch_owned(
    fetcher: FeedFetcher,
    source: FeedSource,
) -> (FeedSource, Result<Vec<FeedEntry>, FetchError>) {
    let result = fetcher.fetch(&source).await;
    (source, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ParseMode;
    use crate::retry::RetryPolicy;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn rss(items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, date)| {
                format!(
                    "<item><title>{t}</title><link>https://example.com/{t}</link><pubDate>{d}</pubDate></item>",
                    t = title,
                    d = date
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>F</title>{}</channel></rss>"#,
            items
        )
    }

    async fn mount_feed(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn pipeline() -> CategoryPipeline {
        let fetcher =
            FeedFetcher::new(reqwest::Client::new()).with_retry(RetryPolicy::immediate(0));
        CategoryPipeline::new(
            fetcher,
            PostFormatter::new(ParseMode::Html),
            WindowPolicy::default(),
        )
    }

    fn category(server: &MockServer, routes: &[&str]) -> FeedCategory {
        FeedCategory {
            name: "weekly".to_string(),
            channel_id: -42,
            sources: routes
                .iter()
                .map(|r| FeedSource::new(*r, format!("{}{}", server.uri(), r), false))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_window_boundaries_end_to_end() {
        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/a",
            rss(&[
                ("inside", "Mon, 01 Jan 2024 00:00:01 GMT"),
                ("at-start", "Mon, 01 Jan 2024 00:00:00 GMT"),
                ("before", "Sun, 31 Dec 2023 23:59:59 GMT"),
                ("at-end", "Tue, 02 Jan 2024 00:00:00 GMT"),
            ]),
        )
        .await;

        let batch = pipeline().run(&category(&server, &["/a"]), now()).await;
        let texts: Vec<&str> = batch.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "<b>inside</b>\n\nhttps://example.com/inside",
                "<b>at-start</b>\n\nhttps://example.com/at-start",
            ]
        );
        assert!(batch.messages.iter().all(|m| m.destination == -42));
        assert_eq!(batch.entries_seen, 4);
    }

    #[tokio::test]
    async fn test_failing_feed_is_isolated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&server)
            .await;
        mount_feed(
            &server,
            "/ok",
            rss(&[("fine", "Mon, 01 Jan 2024 12:00:00 GMT")]),
        )
        .await;

        let batch = pipeline()
            .run(&category(&server, &["/broken", "/ok"]), now())
            .await;
        assert_eq!(batch.feeds_failed, 1);
        assert_eq!(batch.feeds_ok, 1);
        assert_eq!(batch.messages.len(), 1);
        assert!(batch.messages[0].text.contains("fine"));
    }

    #[tokio::test]
    async fn test_source_order_preserved() {
        let server = MockServer::start().await;
        // The first feed answers slowly so it completes last.
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&[("slow", "Mon, 01 Jan 2024 01:00:00 GMT")]))
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        mount_feed(
            &server,
            "/fast",
            rss(&[("fast", "Mon, 01 Jan 2024 00:30:00 GMT")]),
        )
        .await;

        let batch = pipeline()
            .run(&category(&server, &["/slow", "/fast"]), now())
            .await;
        assert!(batch.messages[0].text.contains("slow"));
        assert!(batch.messages[1].text.contains("fast"));
    }

    #[tokio::test]
    async fn test_sort_by_time_orders_oldest_first() {
        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/a",
            rss(&[("late", "Mon, 01 Jan 2024 20:00:00 GMT")]),
        )
        .await;
        mount_feed(
            &server,
            "/b",
            rss(&[("early", "Mon, 01 Jan 2024 02:00:00 GMT")]),
        )
        .await;

        let batch = pipeline()
            .with_sort_by_time(true)
            .run(&category(&server, &["/a", "/b"]), now())
            .await;
        assert!(batch.messages[0].text.contains("early"));
        assert!(batch.messages[1].text.contains("late"));
    }

    #[tokio::test]
    async fn test_nothing_in_window_gives_empty_batch() {
        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/old",
            rss(&[("old", "Mon, 01 Jan 2018 00:00:00 GMT")]),
        )
        .await;

        let batch = pipeline().run(&category(&server, &["/old"]), now()).await;
        assert!(batch.messages.is_empty());
        assert_eq!(batch.feeds_ok, 1);
    }
}
