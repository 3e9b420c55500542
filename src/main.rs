use clap::{Parser, Subcommand};
use tracing::{error, info};

use alpen_scraper::config::Config;
use alpen_scraper::fetcher::PoliteFetcher;
use alpen_scraper::logging;
use alpen_scraper::orchestrator::EventCrawler;
use alpen_scraper::storage::{InMemoryStorage, Storage};
use chrono::{Duration, Utc};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "alpen_scraper")]
#[command(about = "Event calendar scraper for a regional Alpine tourism portal")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full crawl and persist the discovered events
    Run {
        /// Upper bound on listing pages to crawl
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Delete stale non-featured events and exit
    Cleanup {
        /// Delete events older than this many days
        #[arg(long, default_value_t = 1)]
        days: i64,
    },
    /// Check that the event source is reachable
    Check,
}

fn build_crawler(config: Config) -> EventCrawler {
    let fetcher = Arc::new(PoliteFetcher::new(&config.fetcher));
    // The production storage handle comes from the REST/database layer;
    // standalone invocations get the in-memory one.
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    EventCrawler::new(fetcher, storage, config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load_or_default();

    match cli.command {
        Commands::Run { max_pages } => {
            println!("🔄 Running event crawl...");
            let crawler = build_crawler(config);
            match crawler.run(max_pages).await {
                Ok(saved) => {
                    info!("Crawl finished with {} events", saved.len());
                    println!("\n📊 Crawl results:");
                    println!("   Saved events: {}", saved.len());
                    for event in saved.iter().take(10) {
                        println!(
                            "   - {} ({}, {})",
                            event.name,
                            event.start_date.format("%Y-%m-%d"),
                            event.category.as_str()
                        );
                    }
                    if saved.len() > 10 {
                        println!("   … and {} more", saved.len() - 10);
                    }
                }
                Err(e) => {
                    error!("Crawl failed: {}", e);
                    println!("❌ Crawl failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Cleanup { days } => {
            let crawler = build_crawler(config);
            let cutoff = Utc::now() - Duration::days(days);
            match crawler.cleanup(cutoff).await {
                Ok(deleted) => println!("🧹 Deleted {deleted} stale events"),
                Err(e) => {
                    error!("Cleanup failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Check => {
            let crawler = build_crawler(config);
            if crawler.test_connectivity().await {
                println!("✅ Event source reachable");
            } else {
                println!("❌ Event source not reachable");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
