//! Database statistics.
//!
//! Prints a per-version overview of the knowledge base: how many source
//! files are recorded and how many chunks are stored, plus the size of
//! the SQLite file on disk.
//!
//! # Usage
//!
//! ```bash
//! dex stats
//! ```

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::VersionStats;
use crate::store::Store;

/// Print database statistics to stdout.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let stats = store.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Database Stats");
    println!("==============");
    println!();
    println!("  Path:       {}", config.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!();

    print!("{}", render_table(&stats));

    store.pool().close().await;
    Ok(())
}

fn render_table(stats: &[VersionStats]) -> String {
    if stats.is_empty() {
        return "  No versions ingested yet.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("  {:<10} {:>8} {:>8}\n", "VERSION", "SOURCES", "CHUNKS"));
    out.push_str(&format!("  {:<10} {:>8} {:>8}\n", "-------", "-------", "------"));
    for s in stats {
        out.push_str(&format!(
            "  {:<10} {:>8} {:>8}\n",
            s.version.to_string(),
            s.sources,
            s.chunks
        ));
    }
    let sources: i64 = stats.iter().map(|s| s.sources).sum();
    let chunks: i64 = stats.iter().map(|s| s.chunks).sum();
    out.push_str(&format!("  {:<10} {:>8} {:>8}\n", "total", sources, chunks));
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
