/*!
Aggregation orchestrator.

Walks the feed-source registry sequentially, fetching and normalizing one
feed at a time with a politeness gap between requests. A failing feed
contributes an empty group and never aborts the batch. The assembled result
is cached as a single unit; concurrent cache misses are collapsed into one
refresh by a single-flight guard.
*/

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use common::{sleep_millis, Article, ArticleGroup, Config, FeedSource, SourceStore};

use crate::cache::AggregationCache;
use crate::ingestion::{self, FetchOptions};
use crate::processing;

pub const DEFAULT_REQUEST_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_ARTICLES_PER_JOURNAL: usize = 12;
pub const DEFAULT_MERGE_CAP: usize = 6;

/// Serve the aggregated article groups, refreshing on a cache miss.
///
/// The refresh guard makes the miss path single-flight: the first caller
/// holds the guard for the whole pass while latecomers queue on it and
/// re-check the cache once they acquire it, so a burst of misses costs one
/// upstream sweep instead of N.
pub async fn aggregate(
    config: &Config,
    store: &dyn SourceStore,
    cache: &AggregationCache,
    refresh_guard: &tokio::sync::Mutex<()>,
) -> Result<Vec<ArticleGroup>> {
    if let Some(groups) = cache.get() {
        debug!("serving cached aggregation result");
        return Ok(groups);
    }

    let _guard = refresh_guard.lock().await;
    if let Some(groups) = cache.get() {
        debug!("aggregation refreshed while waiting on the guard");
        return Ok(groups);
    }

    info!("aggregation cache miss, fetching fresh feed data");
    let sources = store
        .load_sources()
        .await
        .context("failed to load feed sources")?;

    let groups = refresh_groups(&sources, config).await;

    let filter = config
        .aggregation
        .as_ref()
        .and_then(|a| a.filter_empty_groups)
        .unwrap_or(true);
    let finals = if filter {
        apply_empty_filter(groups)
    } else {
        groups
    };

    cache.set(finals.clone());
    Ok(finals)
}

/// One full pass over the registry. Always returns one group per source, in
/// registry order; sorting and truncation happen per group, and failures
/// degrade to empty groups.
pub async fn refresh_groups(sources: &[FeedSource], config: &Config) -> Vec<ArticleGroup> {
    let delay_ms = config
        .politeness
        .as_ref()
        .and_then(|p| p.request_delay_ms)
        .unwrap_or(DEFAULT_REQUEST_DELAY_MS);
    let max_articles = config
        .aggregation
        .as_ref()
        .and_then(|a| a.max_articles_per_journal)
        .unwrap_or(DEFAULT_MAX_ARTICLES_PER_JOURNAL);
    let opts = FetchOptions::from_config(config);

    let mut groups = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        // Feeds are fetched one at a time with a settling gap so journal
        // hosts never see request bursts from this service.
        if index > 0 && delay_ms > 0 {
            sleep_millis(delay_ms).await;
        }

        let articles = match fetch_and_normalize(source, &opts).await {
            Ok(mut articles) => {
                processing::sort_articles_desc(&mut articles);
                articles.truncate(max_articles);
                info!(
                    "fetched {} articles from {}",
                    articles.len(),
                    source.journal_name
                );
                articles
            }
            Err(e) => {
                warn!("failed to fetch {}: {:#}", source.journal_name, e);
                Vec::new()
            }
        };

        groups.push(ArticleGroup {
            journal_name: source.journal_name.clone(),
            articles,
        });
    }

    groups
}

async fn fetch_and_normalize(source: &FeedSource, opts: &FetchOptions) -> Result<Vec<Article>> {
    let body = ingestion::fetch_feed_body(&source.url, opts).await?;
    processing::normalize_feed(&body, source.feed_type)
}

/// Drop journals that produced nothing, unless every journal is empty; an
/// all-empty registry is returned unfiltered so clients can still render
/// the journal headers.
pub fn apply_empty_filter(groups: Vec<ArticleGroup>) -> Vec<ArticleGroup> {
    let non_empty: Vec<ArticleGroup> = groups
        .iter()
        .filter(|g| !g.articles.is_empty())
        .cloned()
        .collect();
    if non_empty.is_empty() {
        groups
    } else {
        non_empty
    }
}

/// Merge freshly fetched articles into a held set kept across polling
/// cycles. New links are prepended, duplicates resolve to the fresh copy,
/// and the result is re-sorted and capped so a long-lived session never
/// grows without bound.
pub fn merge_articles(held: &[Article], fetched: &[Article], cap: usize) -> Vec<Article> {
    let held_links: HashSet<&str> = held.iter().map(|a| a.link.as_str()).collect();

    let mut merged: Vec<Article> = fetched
        .iter()
        .filter(|a| !held_links.contains(a.link.as_str()))
        .cloned()
        .collect();
    merged.extend_from_slice(held);

    let mut seen = HashSet::new();
    merged.retain(|a| seen.insert(a.link.clone()));

    processing::sort_articles_desc(&mut merged);
    merged.truncate(cap);
    merged
}
