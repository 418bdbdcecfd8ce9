//! Database statistics overview.
//!
//! Row counts for every table in the catalog plus the database file size.
//! Used by `spx db stats` to confirm that loads landed where expected.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::migrate;

/// Row count of one catalog table. `rows` is `None` when the table has not
/// been created yet.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    pub name: &'static str,
    pub description: &'static str,
    pub rows: Option<i64>,
}

/// Count rows of every catalog table, in catalog order.
pub async fn collect_stats(pool: &SqlitePool) -> Result<Vec<TableStats>> {
    let mut out = Vec::with_capacity(migrate::TABLES.len());
    for t in migrate::TABLES {
        let rows = if migrate::table_exists(pool, t.name).await? {
            Some(migrate::count_rows(pool, t.name).await?)
        } else {
            None
        };
        out.push(TableStats {
            name: t.name,
            description: t.description,
            rows,
        });
    }
    Ok(out)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("S&P 500 Harness - Database Stats");
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  {:<26} {:>12}   {}", "TABLE", "ROWS", "DESCRIPTION");
    println!("  {}", "-".repeat(76));
    for s in &stats {
        let rows = match s.rows {
            Some(n) => crate::progress::format_number(n.max(0) as u64),
            None => "missing".to_string(),
        };
        println!("  {:<26} {:>12}   {}", s.name, rows, s.description);
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
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
