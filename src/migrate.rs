//! Table catalog and schema management.
//!
//! Every table the pipeline writes is declared once in [`TABLES`]. The
//! `spx db` commands (`init`, `create-table`, `drop-table`, `clear-table`,
//! `tables`) all resolve table names against this catalog, so an unknown
//! name fails with the list of available tables.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// One table definition: name, one-line description, and DDL statements.
///
/// The first statement creates the table; the rest create its indexes.
/// All statements are idempotent (`IF NOT EXISTS`).
pub struct TableDef {
    pub name: &'static str,
    pub description: &'static str,
    pub ddl: &'static [&'static str],
}

pub const TABLES: &[TableDef] = &[
    TableDef {
        name: "bronze_sec_facts",
        description: "Bronze SEC XBRL facts",
        ddl: &[
            r#"
            CREATE TABLE IF NOT EXISTS bronze_sec_facts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cik TEXT NOT NULL,
                taxonomy TEXT NOT NULL,
                tag TEXT NOT NULL,
                unit TEXT NOT NULL,
                val REAL NOT NULL,
                fy INTEGER,
                fp TEXT,
                start_date TEXT,
                end_date TEXT,
                frame TEXT,
                form TEXT,
                filed TEXT,
                accn TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_sec_facts_cik_tag ON bronze_sec_facts(cik, tag)",
        ],
    },
    TableDef {
        name: "bronze_sec_facts_dict",
        description: "Bronze SEC facts dictionary (taxonomy/tag labels)",
        ddl: &[r#"
            CREATE TABLE IF NOT EXISTS bronze_sec_facts_dict (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                taxonomy TEXT NOT NULL,
                tag TEXT NOT NULL,
                label TEXT,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(taxonomy, tag)
            )
            "#],
    },
    TableDef {
        name: "bronze_sec_submissions",
        description: "Bronze SEC filing submissions",
        ddl: &[
            r#"
            CREATE TABLE IF NOT EXISTS bronze_sec_submissions (
                cik TEXT NOT NULL,
                accession_number TEXT NOT NULL,
                filing_date TEXT NOT NULL,
                acceptance_datetime TEXT NOT NULL,
                report_date TEXT,
                act TEXT,
                form TEXT,
                file_number TEXT,
                film_number INTEGER,
                items TEXT,
                size INTEGER,
                is_xbrl INTEGER,
                is_inline_xbrl INTEGER,
                primary_document TEXT,
                primary_doc_description TEXT,
                PRIMARY KEY (cik, accession_number, filing_date, acceptance_datetime)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_sec_submissions_form ON bronze_sec_submissions(form)",
        ],
    },
    TableDef {
        name: "sp500_stooq_ohcl",
        description: "S&P 500 daily OHLC prices",
        ddl: &[
            r#"
            CREATE TABLE IF NOT EXISTS sp500_stooq_ohcl (
                ticker TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL,
                high REAL,
                low REAL,
                close REAL,
                volume INTEGER,
                PRIMARY KEY (ticker, date)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_ohcl_date ON sp500_stooq_ohcl(date)",
        ],
    },
    TableDef {
        name: "sp500_wik_list",
        description: "S&P 500 constituent list",
        ddl: &[r#"
            CREATE TABLE IF NOT EXISTS sp500_wik_list (
                symbol TEXT NOT NULL,
                date_added TEXT NOT NULL,
                security TEXT,
                gics_sector TEXT,
                gics_sub_ind TEXT,
                headquarters_loc TEXT,
                cik TEXT,
                founded TEXT,
                PRIMARY KEY (symbol, date_added)
            )
            "#],
    },
    TableDef {
        name: "selected_changes_sp500",
        description: "S&P 500 component changes",
        ddl: &[r#"
            CREATE TABLE IF NOT EXISTS selected_changes_sp500 (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                effective_date TEXT NOT NULL,
                added_ticker TEXT NOT NULL DEFAULT '',
                added_security TEXT,
                removed_ticker TEXT NOT NULL DEFAULT '',
                removed_security TEXT,
                reason TEXT,
                UNIQUE(effective_date, added_ticker, removed_ticker)
            )
            "#],
    },
    TableDef {
        name: "sp500_finnhub_news",
        description: "S&P 500 company news",
        ddl: &[
            r#"
            CREATE TABLE IF NOT EXISTS sp500_finnhub_news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                news_id TEXT NOT NULL,
                datetime TEXT NOT NULL,
                headline TEXT,
                summary TEXT,
                source TEXT,
                url TEXT,
                image TEXT,
                related TEXT,
                category TEXT,
                UNIQUE(symbol, news_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_news_datetime ON sp500_finnhub_news(datetime DESC)",
        ],
    },
    TableDef {
        name: "sp500_corporate_actions",
        description: "S&P 500 dividends and splits",
        ddl: &[r#"
            CREATE TABLE IF NOT EXISTS sp500_corporate_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                event_type TEXT NOT NULL,
                ex_date TEXT,
                record_date TEXT,
                pay_date TEXT,
                ratio TEXT,
                cash_amount REAL
            )
            "#],
    },
    TableDef {
        name: "conversations",
        description: "Chat sessions",
        ddl: &[r#"
            CREATE TABLE IF NOT EXISTS conversations (
                session_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                summary TEXT
            )
            "#],
    },
    TableDef {
        name: "chat_messages",
        description: "Chat session messages",
        ddl: &[
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES conversations(session_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, id)",
        ],
    },
];

/// Look up a table in the catalog, failing with the available names.
pub fn find_table(name: &str) -> Result<&'static TableDef> {
    TABLES.iter().find(|t| t.name == name).ok_or_else(|| {
        anyhow::anyhow!(
            "Table '{}' not found. Available tables: {}",
            name,
            table_names().join(", ")
        )
    })
}

pub fn table_names() -> Vec<&'static str> {
    TABLES.iter().map(|t| t.name).collect()
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_all(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_all(pool: &SqlitePool) -> Result<()> {
    for table in TABLES {
        create_def(pool, table).await?;
    }
    Ok(())
}

async fn create_def(pool: &SqlitePool, table: &TableDef) -> Result<()> {
    for stmt in table.ddl {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

pub async fn create_table(pool: &SqlitePool, name: &str) -> Result<()> {
    let table = find_table(name)?;
    create_def(pool, table).await
}

pub async fn drop_table(pool: &SqlitePool, name: &str) -> Result<()> {
    let table = find_table(name)?;
    // Catalog names are static identifiers, never user text.
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.name))
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every row from a table. Returns the number of rows removed.
pub async fn clear_table(pool: &SqlitePool, name: &str) -> Result<u64> {
    let table = find_table(name)?;
    if !table_exists(pool, table.name).await? {
        bail!("Table '{}' does not exist; run `spx db init` first", table.name);
    }
    let result = sqlx::query(&format!("DELETE FROM {}", table.name))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn count_rows(pool: &SqlitePool, name: &str) -> Result<i64> {
    let table = find_table(name)?;
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.name))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub fn list_tables() {
    println!("Available tables:");
    for t in TABLES {
        println!("  - {:<25} : {}", t.name, t.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = Config::with_db_path(tmp.path().join("t.sqlite"));
        let pool = db::connect(&cfg).await.unwrap();
        (tmp, pool)
    }

    #[tokio::test]
    async fn create_all_is_idempotent() {
        let (_tmp, pool) = temp_pool().await;
        create_all(&pool).await.unwrap();
        create_all(&pool).await.unwrap();
        for name in table_names() {
            assert!(table_exists(&pool, name).await.unwrap(), "{} missing", name);
        }
    }

    #[tokio::test]
    async fn drop_and_recreate_single_table() {
        let (_tmp, pool) = temp_pool().await;
        create_all(&pool).await.unwrap();
        drop_table(&pool, "sp500_wik_list").await.unwrap();
        assert!(!table_exists(&pool, "sp500_wik_list").await.unwrap());
        create_table(&pool, "sp500_wik_list").await.unwrap();
        assert!(table_exists(&pool, "sp500_wik_list").await.unwrap());
    }

    #[tokio::test]
    async fn clear_table_reports_deleted_rows() {
        let (_tmp, pool) = temp_pool().await;
        create_all(&pool).await.unwrap();
        sqlx::query("INSERT INTO sp500_stooq_ohcl (ticker, date) VALUES ('A', '2021-01-04'), ('B', '2021-01-04')")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(clear_table(&pool, "sp500_stooq_ohcl").await.unwrap(), 2);
        assert_eq!(count_rows(&pool, "sp500_stooq_ohcl").await.unwrap(), 0);
    }

    #[test]
    fn unknown_table_lists_available() {
        let err = find_table("nope").err().unwrap().to_string();
        assert!(err.contains("sp500_stooq_ohcl"));
    }
}
