/*!
common/src/lib.rs

Shared configuration types, data model and registry helpers for Paperscope.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file with default/override merging
- The shared article data model (FeedSource, Article, ArticleGroup)
- The feed-source registry store (trait + JSON file implementation)
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Feed source registry configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Path to the JSON registry file (e.g. "data/sources.json")
    pub path: Option<String>,
}

/// HTTP server bind configuration (merged into Rocket's figment at launch)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolitenessConfig {
    /// Gap between consecutive feed requests during an aggregation pass
    pub request_delay_ms: Option<u64>,
    pub fetch_timeout_seconds: Option<u64>,
    pub max_redirects: Option<usize>,
    pub max_response_bytes: Option<u64>,
}

/// Aggregation / caching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub cache_ttl_seconds: Option<u64>,
    pub max_articles_per_journal: Option<usize>,
    /// Cap on the held set kept by long-lived pollers (watch mode)
    pub merge_cap: Option<usize>,
    /// Drop journals that produced no articles, unless every journal is empty
    pub filter_empty_groups: Option<bool>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub sources: Option<SourcesConfig>,
    pub politeness: Option<PolitenessConfig>,
    pub aggregation: Option<AggregationConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Kind of feed behind a source URL. ScienceDirect feeds hide the real
/// publication period inside the item description HTML and need a separate
/// date-extraction path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Standard,
    Sciencedirect,
}

impl Default for FeedType {
    fn default() -> Self {
        FeedType::Standard
    }
}

/// One configured journal feed. `journal_name` is the unique key of the
/// registry; comparisons on add are case-insensitive.
///
/// Field names on the wire and on disk stay camelCase (`journalName`,
/// `type`) so existing registry files and UI clients keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    #[serde(rename = "journalName")]
    pub journal_name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub feed_type: FeedType,
}

/// A normalized article extracted from any supported feed format.
/// `link` is the identity key for deduplication. `publication_date` is a
/// best-effort string (it may be a literal issue period like "March 2025")
/// and is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    #[serde(rename = "publicationDate")]
    pub publication_date: String,
}

/// Articles of one journal, sorted newest-first and truncated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleGroup {
    #[serde(rename = "journalName")]
    pub journal_name: String,
    pub articles: Vec<Article>,
}

/// Compiled-in registry used when no sources file exists yet.
pub fn default_sources() -> Vec<FeedSource> {
    let entries: [(&str, &str, FeedType); 10] = [
        (
            "IEEE Transactions on Eng. Management",
            "https://ieeexplore.ieee.org/rss/TOC17.XML",
            FeedType::Standard,
        ),
        (
            "Int. Journal of Technology Management",
            "https://www.inderscienceonline.com/action/showFeed?type=etoc&feed=rss&jc=ijtm",
            FeedType::Standard,
        ),
        (
            "Int. Journal of Innovation Management",
            "https://www.worldscientific.com/action/showFeed?type=etoc&feed=rss&jc=ijim",
            FeedType::Standard,
        ),
        (
            "Computers in Industry",
            "https://rss.sciencedirect.com/publication/science/01663615",
            FeedType::Sciencedirect,
        ),
        (
            "Technovation, Technological Innovation",
            "https://rss.sciencedirect.com/publication/science/01664972",
            FeedType::Sciencedirect,
        ),
        (
            "Computers & Industrial Engineering",
            "https://rss.sciencedirect.com/publication/science/03608352",
            FeedType::Sciencedirect,
        ),
        (
            "Advanced Engineering Informatics",
            "https://rss.sciencedirect.com/publication/science/14740346",
            FeedType::Sciencedirect,
        ),
        (
            "Technological Forecasting & Social Change",
            "https://rss.sciencedirect.com/publication/science/00401625",
            FeedType::Sciencedirect,
        ),
        (
            "Technology in Society",
            "https://rss.sciencedirect.com/publication/science/0160791X",
            FeedType::Sciencedirect,
        ),
        (
            "World Patent Information",
            "https://rss.sciencedirect.com/publication/science/01722190",
            FeedType::Sciencedirect,
        ),
    ];

    entries
        .into_iter()
        .map(|(journal_name, url, feed_type)| FeedSource {
            journal_name: journal_name.to_string(),
            url: url.to_string(),
            feed_type,
        })
        .collect()
}

/// Read/write interface over the feed-source registry. The server owns an
/// `Arc<dyn SourceStore>` so tests and alternative deployments can inject
/// their own persistence.
#[async_trait::async_trait]
pub trait SourceStore: Send + Sync {
    async fn load_sources(&self) -> Result<Vec<FeedSource>>;
    async fn save_sources(&self, sources: &[FeedSource]) -> Result<()>;
}

/// JSON-file registry store. A missing file is not an error: the compiled-in
/// default list is returned until the first save creates the file.
pub struct FileSourceStore {
    path: PathBuf,
}

impl FileSourceStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl SourceStore for FileSourceStore {
    async fn load_sources(&self) -> Result<Vec<FeedSource>> {
        if !self.path.exists() {
            return Ok(default_sources());
        }
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read sources file: {}", self.path.display()))?;
        let sources: Vec<FeedSource> =
            serde_json::from_str(&data).context("Failed to parse sources file")?;
        Ok(sources)
    }

    async fn save_sources(&self, sources: &[FeedSource]) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!(
                        "Failed to create sources parent directory: {}",
                        parent.display()
                    )
                })?;
            }
        }

        let data =
            serde_json::to_string_pretty(sources).context("Failed to serialize sources")?;
        tokio::fs::write(&self.path, data)
            .await
            .with_context(|| format!("Failed to write sources file: {}", self.path.display()))?;
        Ok(())
    }
}

/// Convenience: sleep helper used by implementations (kept public for tests)
pub async fn sleep_millis(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_string() {
        // Minimal TOML to test parsing
        let toml = r#"
            [sources]
            path = "data/sources.json"

            [politeness]
            request_delay_ms = 500
            fetch_timeout_seconds = 15

            [aggregation]
            cache_ttl_seconds = 3600
            max_articles_per_journal = 12
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(
            cfg.sources.as_ref().and_then(|s| s.path.as_deref()),
            Some("data/sources.json")
        );
        assert_eq!(
            cfg.politeness.as_ref().and_then(|p| p.request_delay_ms),
            Some(500)
        );
        assert_eq!(
            cfg.aggregation.as_ref().and_then(|a| a.cache_ttl_seconds),
            Some(3600)
        );
        // Absent sections stay None
        assert!(cfg.server.is_none());
    }

    #[test]
    fn feed_source_wire_names() {
        let json = r#"{"journalName": "Acta Futura", "url": "https://example.com/feed", "type": "sciencedirect"}"#;
        let source: FeedSource = serde_json::from_str(json).expect("parse source");
        assert_eq!(source.journal_name, "Acta Futura");
        assert_eq!(source.feed_type, FeedType::Sciencedirect);

        // `type` defaults to standard when omitted
        let json = r#"{"journalName": "Acta Futura", "url": "https://example.com/feed"}"#;
        let source: FeedSource = serde_json::from_str(json).expect("parse source");
        assert_eq!(source.feed_type, FeedType::Standard);

        let out = serde_json::to_value(&source).expect("serialize source");
        assert_eq!(out["journalName"], "Acta Futura");
        assert_eq!(out["type"], "standard");
    }

    #[tokio::test]
    async fn file_store_roundtrip_and_default_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sources.json");
        let store = FileSourceStore::new(&path);

        // Missing file falls back to the compiled-in defaults
        let initial = store.load_sources().await.expect("load defaults");
        assert_eq!(initial.len(), default_sources().len());

        let sources = vec![FeedSource {
            journal_name: "Journal of Testing".to_string(),
            url: "https://example.com/feed.xml".to_string(),
            feed_type: FeedType::Standard,
        }];
        store.save_sources(&sources).await.expect("save");

        let loaded = store.load_sources().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].journal_name, "Journal of Testing");
    }
}
