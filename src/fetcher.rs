use std::collections::HashMap;
use std::time::Duration;

use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Request, StatusCode};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::rss::FeedItem;

const USER_AGENT: &str = "RealtyRss/1.0 (RSS Aggregator)";

#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be built, e.g. a malformed source URL
    #[error("Invalid request: {0}")]
    Request(reqwest::Error),
    /// Connection, TLS or timeout failure
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    #[error("HTTP error: status {0}")]
    Status(StatusCode),
    #[error("Parse error: {0}")]
    Parse(String),
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Builds the GET request for a source without sending it.
    pub fn prepare(&self, source: &SourceConfig) -> Result<Request, FetchError> {
        self.client
            .get(&source.url)
            .build()
            .map_err(FetchError::Request)
    }

    /// Sends a prepared request and returns the body of a 2xx response.
    pub async fn execute(&self, request: Request) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .execute(request)
            .await
            .map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await.map_err(FetchError::Network)?;
        Ok(bytes.to_vec())
    }

    pub async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<FeedItem>, FetchError> {
        info!("Fetching feed: {} ({})", source.name, source.url);

        let request = self.prepare(source)?;
        let bytes = self.execute(request).await?;
        let items = Self::parse_items(&bytes)?;

        info!("Parsed {} items for feed '{}'", items.len(), source.name);
        Ok(items)
    }

    pub fn parse_items(bytes: &[u8]) -> Result<Vec<FeedItem>, FetchError> {
        // feed_rs invents an id when <guid> is absent, so read the literal guids first
        let guids = Self::extract_guids_from_xml(bytes);

        let parsed = parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        let mut items = Vec::with_capacity(parsed.entries.len());
        for entry in parsed.entries {
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();

            if link.is_empty() {
                warn!("Skipping entry with no link: {}", title);
                continue;
            }

            let description = entry.summary.map(|s| s.content).unwrap_or_default();
            let pub_date = entry.published.or(entry.updated);
            let guid = guids.get(&link).cloned();

            items.push(FeedItem {
                title,
                link,
                description,
                pub_date,
                guid,
                source: None,
            });
        }

        Ok(items)
    }

    /// Map of item link to the item's literal `<guid>` text.
    pub fn extract_guids_from_xml(xml_bytes: &[u8]) -> HashMap<String, String> {
        let mut guids = HashMap::new();
        let mut reader = Reader::from_reader(xml_bytes);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        // Element depth, and the depth of the open <item> if any
        let mut depth = 0usize;
        let mut item_depth: Option<usize> = None;
        let mut field: Option<ItemField> = None;
        let mut link = String::new();
        let mut guid = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    // Only direct children of <item> count
                    let child_of_item = item_depth.map_or(false, |d| depth == d + 1);
                    field = None;
                    match e.name().as_ref() {
                        b"item" => {
                            item_depth = Some(depth);
                            link.clear();
                            guid.clear();
                        }
                        b"link" if child_of_item => field = Some(ItemField::Link),
                        b"guid" if child_of_item => field = Some(ItemField::Guid),
                        _ => {}
                    }
                    depth += 1;
                }
                Ok(Event::Text(t)) => {
                    if let Some(f) = field {
                        match t.unescape() {
                            Ok(text) => match f {
                                ItemField::Link => link.push_str(&text),
                                ItemField::Guid => guid.push_str(&text),
                            },
                            Err(e) => warn!("Skipping undecodable item text: {}", e),
                        }
                    }
                }
                Ok(Event::CData(c)) => {
                    if let Some(f) = field {
                        let text = String::from_utf8_lossy(&c);
                        match f {
                            ItemField::Link => link.push_str(text.trim()),
                            ItemField::Guid => guid.push_str(text.trim()),
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    depth = depth.saturating_sub(1);
                    if e.name().as_ref() == b"item" && item_depth == Some(depth) {
                        item_depth = None;
                        let (link, guid) = (link.trim(), guid.trim());
                        if !link.is_empty() && !guid.is_empty() {
                            guids.insert(link.to_string(), guid.to_string());
                        }
                    }
                    field = None;
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    // feed_rs reports the real error; keep what was read so far
                    warn!("Stopped scanning for guids: {}", e);
                    break;
                }
                _ => {}
            }
            buf.clear();
        }

        guids
    }
}

#[derive(Clone, Copy)]
enum ItemField {
    Link,
    Guid,
}
