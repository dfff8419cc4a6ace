//! Long-lived polling client: refreshes the registry feeds on an interval
//! and keeps a small per-journal set of the freshest articles across
//! cycles, merged by link. Newly seen articles are printed as they appear.
//!
//! Usage: watch_feeds [interval_seconds]

use std::collections::HashMap;

use common::{Article, Config, FileSourceStore, SourceStore};
use paperscope::aggregator::{self, DEFAULT_MERGE_CAP};

const DEFAULT_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let interval_secs = std::env::args()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_INTERVAL_SECS);

    let config = Config::default();
    let store = FileSourceStore::new("data/sources.json");

    // Held articles per journal, bounded by the merge cap
    let mut held: HashMap<String, Vec<Article>> = HashMap::new();

    println!("Watching feeds every {}s (ctrl-c to stop)", interval_secs);

    loop {
        let sources = match store.load_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                eprintln!("failed to load sources: {:#}", e);
                common::sleep_millis(interval_secs * 1000).await;
                continue;
            }
        };

        let groups = aggregator::refresh_groups(&sources, &config).await;

        for group in groups {
            let slot = held.entry(group.journal_name.clone()).or_default();
            let known: Vec<String> = slot.iter().map(|a| a.link.clone()).collect();

            let merged = aggregator::merge_articles(slot, &group.articles, DEFAULT_MERGE_CAP);

            for article in merged.iter().filter(|a| !known.contains(&a.link)) {
                println!(
                    "[{}] {} ({})",
                    group.journal_name, article.title, article.publication_date
                );
            }

            *slot = merged;
        }

        common::sleep_millis(interval_secs * 1000).await;
    }
}
