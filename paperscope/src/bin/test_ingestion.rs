//! Fetch and normalize one or more feed URLs from the command line and
//! print a short report. Useful for checking how a journal feed survives
//! the normalization pipeline before adding it to the registry.
//!
//! Usage: test_ingestion [URL ...]

use common::FeedType;
use paperscope::ingestion::{self, FetchOptions};
use paperscope::processing;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let urls: Vec<String> = if args.is_empty() {
        common::default_sources()
            .into_iter()
            .map(|s| s.url)
            .collect()
    } else {
        args
    };

    let opts = FetchOptions::default();

    for url in urls {
        println!("\n{}", "=".repeat(60));
        println!("Testing: {}", url);
        println!("{}", "=".repeat(60));

        // ScienceDirect hosts get their dedicated date extraction path
        let feed_type = if url.contains("sciencedirect") {
            FeedType::Sciencedirect
        } else {
            FeedType::Standard
        };

        let body = match ingestion::fetch_feed_body(&url, &opts).await {
            Ok(body) => body,
            Err(e) => {
                println!("✗ Fetch failed: {:#}", e);
                continue;
            }
        };

        match processing::normalize_feed(&body, feed_type) {
            Ok(articles) => {
                println!("✓ Success!");
                println!("  Articles: {}", articles.len());

                if !articles.is_empty() {
                    println!("\n  First 3 articles:");
                    for (i, article) in articles.iter().take(3).enumerate() {
                        println!("    {}. {}", i + 1, article.title);
                        println!("       Link: {}", article.link);
                        println!("       Date: {}", article.publication_date);
                        println!("       Description: {} chars", article.description.len());
                    }
                }
            }
            Err(e) => {
                println!("✗ Normalization failed: {:#}", e);
            }
        }
    }
}
