use std::collections::HashSet;
use std::path::Path;

use anyhow::bail;
use serde::Deserialize;

use crate::rss::Channel;

/// Slug served by the aggregate handler; sources may not claim it.
pub const AGGREGATE_SLUG: &str = "news";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Per-request upstream timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_channel")]
    pub channel: Channel,
    pub sources: Vec<SourceConfig>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_max_concurrent_fetches() -> usize {
    6
}

fn default_channel() -> Channel {
    Channel {
        title: "Real Estate Industry News".to_string(),
        link: "https://example.com/news".to_string(),
        description: "Aggregated real estate industry news from leading sources".to_string(),
        language: Some("en-us".to_string()),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub slug: String,
    /// URL of the upstream RSS document
    pub url: String,
    pub homepage: Option<String>,
    pub description: Option<String>,
}

impl SourceConfig {
    /// Channel metadata used when this source is served on its own.
    pub fn channel(&self) -> Channel {
        Channel {
            title: self.name.clone(),
            link: self.homepage.clone().unwrap_or_else(|| self.url.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| format!("Latest news from {}", self.name)),
            language: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sources.is_empty() {
            bail!("at least one source must be configured");
        }
        if self.fetch_timeout == 0 {
            bail!("fetch_timeout must be positive");
        }
        if self.max_concurrent_fetches == 0 {
            bail!("max_concurrent_fetches must be positive");
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() || source.url.trim().is_empty() {
                bail!("source '{}' needs a name and a url", source.slug);
            }
            if source.slug == AGGREGATE_SLUG {
                bail!("slug '{}' is reserved for the aggregate feed", AGGREGATE_SLUG);
            }
            if !seen.insert(source.slug.as_str()) {
                bail!("duplicate source slug '{}'", source.slug);
            }
        }
        Ok(())
    }

    pub fn source(&self, slug: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.slug == slug)
    }
}
