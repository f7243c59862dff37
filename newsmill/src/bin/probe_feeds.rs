//! Fetches every configured feed once and prints what the pollers would see.

use clap::Parser;
use common::Config;
use std::path::PathBuf;

use newsmill::ingestion::build_client;
use newsmill::registry::SourceRegistry;

#[derive(Parser, Debug)]
#[command(name = "probe_feeds", about = "Fetch each configured feed once and list its entries")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Entries shown per feed
    #[arg(long, default_value_t = 3)]
    show: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(
        default_path.exists().then_some(default_path.as_path()),
        Some(args.config.as_path()),
    )
    .await?;

    let client = build_client(&config.user_agent(), config.fetch_timeout_seconds())?;
    let registry = SourceRegistry::from_config(&config.sources, client)?;

    for mut feed in registry.feed_sources() {
        println!("\n{}", "=".repeat(60));
        println!("[{}] {}", feed.source_id(), feed.feed_url());
        println!("{}", "=".repeat(60));

        match feed.fetch().await {
            Ok(Some(entries)) => {
                println!("✓ {} entries", entries.len());
                for (i, entry) in entries.iter().take(args.show).enumerate() {
                    println!("  {}. {}", i + 1, entry.title.as_deref().unwrap_or("(untitled)"));
                    println!("     key: {}", entry.dedup_key().unwrap_or_else(|| "none".into()));
                    println!("     link: {}", entry.link.as_deref().unwrap_or("none"));
                    let summary_len = entry.summary.as_deref().map(|s| s.chars().count()).unwrap_or(0);
                    println!("     summary: {} chars", summary_len);
                }
            }
            Ok(None) => println!("- not modified"),
            Err(e) => println!("✗ Failed: {:#}", e),
        }
    }
    Ok(())
}
