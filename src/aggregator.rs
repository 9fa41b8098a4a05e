use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::fetcher::{FetchError, Fetcher};
use crate::rss::{FeedItem, ItemSource};

/// Fetches every source and merges the results, newest first.
///
/// All requests are built before any is sent; a request that cannot be built
/// fails the whole aggregation. Once sending starts, a source that fails or
/// returns garbage only contributes zero items.
pub async fn aggregate(
    fetcher: &Fetcher,
    sources: &[SourceConfig],
    concurrency: usize,
) -> Result<Vec<FeedItem>, FetchError> {
    let requests = sources
        .iter()
        .map(|source| fetcher.prepare(source))
        .collect::<Result<Vec<_>, _>>()?;

    info!("Aggregating {} sources", sources.len());

    let fetches: Vec<_> = sources
        .iter()
        .zip(requests)
        .map(|(source, request)| async move {
            let result = fetcher
                .execute(request)
                .await
                .and_then(|bytes| Fetcher::parse_items(&bytes));

            let items = match result {
                Ok(items) => {
                    info!("Fetched {} items from '{}'", items.len(), source.name);
                    items
                }
                Err(e) => {
                    warn!("Skipping source '{}': {}", source.name, e);
                    Vec::new()
                }
            };
            (source, items)
        })
        .collect();

    // buffered() yields in input order, keeping the merge deterministic
    let batches: Vec<(&SourceConfig, Vec<FeedItem>)> = stream::iter(fetches)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let merged = merge(batches);
    info!("Aggregated feed has {} items", merged.len());
    Ok(merged)
}

/// Tags, concatenates, sorts and de-duplicates per-source item lists.
///
/// The sort is stable: items with equal dates keep source order, then
/// upstream order. Undated items go last. When two items share an identity
/// the one sorted first wins.
pub fn merge(batches: Vec<(&SourceConfig, Vec<FeedItem>)>) -> Vec<FeedItem> {
    let mut merged: Vec<FeedItem> = batches
        .into_iter()
        .flat_map(|(source, items)| {
            let tag = ItemSource {
                name: source.name.clone(),
                url: source.url.clone(),
            };
            items.into_iter().map(move |mut item| {
                item.source = Some(tag.clone());
                item
            })
        })
        .collect();

    // Option orders None first, so reversing puts undated items at the end
    merged.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

    let mut seen = HashSet::new();
    merged.retain(|item| seen.insert(item.identity().to_string()));

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            slug: name.to_lowercase(),
            url: format!("https://feeds.example.com/{}", name.to_lowercase()),
            homepage: None,
            description: None,
        }
    }

    fn item(title: &str, day: Option<u32>) -> FeedItem {
        FeedItem {
            title: title.to_string(),
            link: format!("https://example.com/{}", title.to_lowercase()),
            description: String::new(),
            pub_date: day.map(|d| Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap()),
            guid: None,
            source: None,
        }
    }

    fn titles(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn test_sorted_newest_first() {
            let inman = source("Inman");
            let nar = source("NAR");

            let merged = merge(vec![
                (&inman, vec![item("A", Some(1)), item("C", Some(3))]),
                (&nar, vec![item("B", Some(2)), item("D", Some(4))]),
            ]);

            assert_eq!(titles(&merged), vec!["D", "C", "B", "A"]);
        }

        #[test]
        fn test_every_item_tagged_with_its_source() {
            let inman = source("Inman");
            let nar = source("NAR");

            let merged = merge(vec![
                (&inman, vec![item("A", Some(1))]),
                (&nar, vec![item("B", Some(2))]),
            ]);

            let b = merged.iter().find(|i| i.title == "B").unwrap();
            let tag = b.source.as_ref().unwrap();
            assert_eq!(tag.name, "NAR");
            assert_eq!(tag.url, "https://feeds.example.com/nar");

            assert!(merged.iter().all(|i| i.source.is_some()));
        }

        #[test]
        fn test_ties_keep_source_order() {
            let first = source("First");
            let second = source("Second");

            let merged = merge(vec![
                (&first, vec![item("X", Some(5)), item("Y", Some(5))]),
                (&second, vec![item("Z", Some(5))]),
            ]);

            assert_eq!(titles(&merged), vec!["X", "Y", "Z"]);
        }

        #[test]
        fn test_undated_items_last() {
            let s = source("Inman");

            let merged = merge(vec![(
                &s,
                vec![item("Undated", None), item("Old", Some(1)), item("New", Some(9))],
            )]);

            assert_eq!(titles(&merged), vec!["New", "Old", "Undated"]);
        }

        #[test]
        fn test_duplicates_by_guid_dropped() {
            let a = source("A");
            let b = source("B");

            let mut older = item("Shared story", Some(1));
            older.guid = Some("wire-42".to_string());
            let mut newer = item("Shared story (updated)", Some(2));
            newer.link = "https://other.example.com/story".to_string();
            newer.guid = Some("wire-42".to_string());

            let merged = merge(vec![(&a, vec![older]), (&b, vec![newer])]);

            assert_eq!(merged.len(), 1);
            assert_eq!(merged[0].title, "Shared story (updated)");
            assert_eq!(merged[0].source.as_ref().unwrap().name, "B");
        }

        #[test]
        fn test_duplicates_by_link_dropped() {
            let a = source("A");

            let merged = merge(vec![(&a, vec![item("Same", Some(2)), item("Same", Some(1))])]);

            assert_eq!(merged.len(), 1);
            assert_eq!(merged[0].pub_date.unwrap().format("%d").to_string(), "02");
        }

        #[test]
        fn test_empty_batches() {
            let a = source("A");
            let b = source("B");

            assert!(merge(vec![(&a, vec![]), (&b, vec![])]).is_empty());
            assert!(merge(vec![]).is_empty());
        }
    }

    mod aggregate_tests {
        use super::*;
        use std::time::Duration;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn rss_with(title: &str, pub_date: &str) -> String {
            format!(
                r#"<?xml version="1.0"?>
                <rss version="2.0"><channel>
                    <title>Upstream</title><link>https://example.com</link><description>D</description>
                    <item>
                        <title>{title}</title>
                        <link>https://example.com/{slug}</link>
                        <pubDate>{pub_date}</pubDate>
                    </item>
                </channel></rss>"#,
                title = title,
                slug = title.to_lowercase().replace(' ', "-"),
                pub_date = pub_date,
            )
        }

        fn mock_source(server: &MockServer, name: &str) -> SourceConfig {
            SourceConfig {
                name: name.to_string(),
                slug: name.to_lowercase(),
                url: format!("{}/{}", server.uri(), name.to_lowercase()),
                homepage: None,
                description: None,
            }
        }

        #[tokio::test]
        async fn test_failing_source_contributes_nothing() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/good"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(rss_with("Good story", "Tue, 02 Jan 2024 10:00:00 GMT")),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/bad"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/garbage"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops"))
                .mount(&server)
                .await;

            let sources = vec![
                mock_source(&server, "Bad"),
                mock_source(&server, "Good"),
                mock_source(&server, "Garbage"),
            ];
            let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();

            let items = aggregate(&fetcher, &sources, 2).await.unwrap();

            assert_eq!(titles(&items), vec!["Good story"]);
            assert_eq!(items[0].source.as_ref().unwrap().name, "Good");
        }

        #[tokio::test]
        async fn test_unbuildable_request_fails_aggregation() {
            let server = MockServer::start().await;
            let mut broken = mock_source(&server, "Broken");
            broken.url = "not a url".to_string();
            let sources = vec![mock_source(&server, "Fine"), broken];
            let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();

            let result = aggregate(&fetcher, &sources, 6).await;

            assert!(matches!(result, Err(FetchError::Request(_))));
        }
    }
}
