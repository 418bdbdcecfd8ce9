//! CSV → table loads.
//!
//! Each loader follows the same path: read the CSV, check the required
//! columns, clean rows into typed records, then write them in transactions
//! of `batch_size` rows. A batch that fails is rolled back and counted as
//! errors; the remaining batches still run.
//!
//! Writes are idempotent. Keyed tables upsert on their primary or unique
//! key; `sp500_corporate_actions` has no natural key and is replaced whole.
//!
//! | Target | Table | Key |
//! |--------|-------|-----|
//! | `ohlc` | `sp500_stooq_ohcl` | `(ticker, date)` |
//! | `wiki-list` | `sp500_wik_list` | `(symbol, date_added)` |
//! | `changes` | `selected_changes_sp500` | `(effective_date, added_ticker, removed_ticker)` |
//! | `news` | `sp500_finnhub_news` | `(symbol, news_id)` |
//! | `corporate-actions` | `sp500_corporate_actions` | replace |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::migrate;
use crate::models::{
    date_text, datetime_text, ComponentChange, CorporateAction, NewsArticle, OhlcRecord,
    Sp500Company, OHLC_COLUMNS,
};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Rows loaded by `--test-mode` for the OHLC table.
pub const OHLC_TEST_ROWS: usize = 1000;

/// The CSV datasets `spx load` accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadTarget {
    Ohlc,
    WikiList,
    ComponentChanges,
    News,
    CorporateActions,
}

impl LoadTarget {
    pub fn table(&self) -> &'static str {
        match self {
            LoadTarget::Ohlc => "sp500_stooq_ohcl",
            LoadTarget::WikiList => "sp500_wik_list",
            LoadTarget::ComponentChanges => "selected_changes_sp500",
            LoadTarget::News => "sp500_finnhub_news",
            LoadTarget::CorporateActions => "sp500_corporate_actions",
        }
    }

    /// Columns that must be present in the input CSV header.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            LoadTarget::Ohlc => &OHLC_COLUMNS,
            LoadTarget::WikiList => &[
                "Symbol",
                "Security",
                "GICS Sub-Industry",
                "Headquarters Location",
                "Date added",
                "CIK",
                "Founded",
            ],
            LoadTarget::ComponentChanges => &[
                "Effective Date",
                "added_Ticker",
                "added_Security",
                "removed_Ticker",
                "removed_ecurity",
                "Reason",
            ],
            LoadTarget::News => &[
                "symbol", "id", "datetime", "headline", "summary", "source", "url", "image",
                "related", "category",
            ],
            LoadTarget::CorporateActions => &[
                "symbol",
                "event_type",
                "ex_date",
                "record_date",
                "pay_date",
                "ratio",
                "cash_amount",
            ],
        }
    }

    pub const ALL: [LoadTarget; 5] = [
        LoadTarget::Ohlc,
        LoadTarget::WikiList,
        LoadTarget::ComponentChanges,
        LoadTarget::News,
        LoadTarget::CorporateActions,
    ];

    /// CLI name of the target.
    pub fn name(&self) -> &'static str {
        match self {
            LoadTarget::Ohlc => "ohlc",
            LoadTarget::WikiList => "wiki-list",
            LoadTarget::ComponentChanges => "changes",
            LoadTarget::News => "news",
            LoadTarget::CorporateActions => "corporate-actions",
        }
    }

    /// Resolve a CLI name or table name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == name || t.table() == name)
            .with_context(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|t| t.name()).collect();
                format!(
                    "Unknown load target: '{}'. Available: {}",
                    name,
                    names.join(", ")
                )
            })
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub test_mode: bool,
    pub verify: bool,
}

/// Outcome of one table load.
#[derive(Debug)]
pub struct LoadSummary {
    pub table: &'static str,
    /// Clean rows handed to the writer.
    pub total: usize,
    pub inserted: usize,
    /// Rows in batches that failed and were rolled back.
    pub errors: usize,
    /// Input rows removed by cleaning (bad values, missing keys, duplicates).
    pub dropped: usize,
    pub duration: Duration,
    /// Table row count after the load, when `--verify` was requested.
    pub verified_count: Option<i64>,
}

impl LoadSummary {
    pub fn verification_matches(&self) -> Option<bool> {
        self.verified_count.map(|c| c == self.inserted as i64)
    }

    pub fn print(&self) {
        let secs = self.duration.as_secs_f64();
        let rate = if secs > 0.0 {
            self.inserted as f64 / secs
        } else {
            0.0
        };
        println!("Load {} complete:", self.table);
        println!("  rows:     {}", self.total);
        println!("  inserted: {}", self.inserted);
        println!("  errors:   {}", self.errors);
        println!("  dropped:  {}", self.dropped);
        println!("  duration: {:.2}s ({:.0} rows/s)", secs, rate);
        if let (Some(count), Some(ok)) = (self.verified_count, self.verification_matches()) {
            println!(
                "  verify:   table has {} rows, inserted {} ... {}",
                count,
                self.inserted,
                if ok { "MATCH" } else { "MISMATCH" }
            );
        }
    }
}

// ---------------------------------------------------------------------------
// CSV input
// ---------------------------------------------------------------------------

/// A CSV file held in memory as text cells.
///
/// Cells are decoded as UTF-8 when valid and as Latin-1 otherwise, so
/// Wikipedia exports with mixed encodings still load.
#[derive(Debug)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let headers = reader
            .byte_headers()?
            .iter()
            .map(|h| decode_cell(h).trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.byte_records() {
            let record = record.with_context(|| format!("Failed to read {}", path.display()))?;
            rows.push(record.iter().map(decode_cell).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// First present column among `names`.
    pub fn column_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.column(n))
    }

    /// Fail with every missing column named.
    pub fn require(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|c| self.column(c).is_none())
            .collect();
        if !missing.is_empty() {
            bail!(
                "Missing columns: {} (found: {})",
                missing.join(", "),
                self.headers.join(", ")
            );
        }
        Ok(())
    }
}

fn decode_cell(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|s| s.trim()).unwrap_or("")
}

/// Trimmed text, with blank and pandas-style `nan` treated as absent.
fn opt_text(row: &[String], idx: usize) -> Option<String> {
    let v = cell(row, idx);
    if v.is_empty() || v.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(v.to_string())
    }
}

/// Parse a date in any of the formats the source datasets use.
pub fn parse_flexible_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    const FORMATS: [&str; 7] = [
        "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d", "%B %d, %Y", "%b %d, %Y", "%d-%b-%Y",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
        .or_else(|| parse_flexible_datetime(text).map(|dt| dt.date()))
}

/// Parse unix seconds, RFC 3339, or a naive date-time.
pub fn parse_flexible_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

/// Cleaned records plus the number of input rows that were removed.
pub struct Cleaned<T> {
    pub records: Vec<T>,
    pub dropped: usize,
}

/// Parse the normalized OHLC CSV. Rows with an unparseable field are
/// dropped; duplicate `(ticker, date)` rows keep the last occurrence.
pub fn clean_ohlc(table: &CsvTable) -> Result<Cleaned<OhlcRecord>> {
    table.require(&OHLC_COLUMNS)?;
    let idx: Vec<usize> = OHLC_COLUMNS
        .iter()
        .filter_map(|c| table.column(c))
        .collect();

    let mut records: Vec<OhlcRecord> = Vec::with_capacity(table.rows.len());
    let mut positions: HashMap<(String, NaiveDate), usize> = HashMap::new();
    let mut dropped = 0;

    for row in &table.rows {
        let parsed = (|| {
            let ticker = opt_text(row, idx[0])?;
            let date = NaiveDate::parse_from_str(cell(row, idx[1]), "%Y-%m-%d").ok()?;
            let num = |i: usize| cell(row, idx[i]).parse::<f64>().ok().filter(|f| f.is_finite());
            Some(OhlcRecord {
                ticker,
                date,
                open: num(2)?,
                high: num(3)?,
                low: num(4)?,
                close: num(5)?,
                volume: num(6)? as i64,
            })
        })();

        let Some(record) = parsed else {
            dropped += 1;
            continue;
        };
        match positions.get(&(record.ticker.clone(), record.date)) {
            Some(&pos) => {
                records[pos] = record;
                dropped += 1;
            }
            None => {
                positions.insert((record.ticker.clone(), record.date), records.len());
                records.push(record);
            }
        }
    }
    Ok(Cleaned { records, dropped })
}

/// Clean the Wikipedia constituent list.
pub fn clean_wiki_list(table: &CsvTable) -> Result<Cleaned<Sp500Company>> {
    table.require(LoadTarget::WikiList.required_columns())?;
    let sector = table
        .column_any(&["GICS\u{00ca}Sector", "GICS Sector", "GICS\u{00a0}Sector"])
        .context("Missing columns: GICS Sector")?;
    let col = |name: &str| table.column(name).unwrap_or(usize::MAX);
    let (symbol, security, sub_ind, hq, added, cik, founded) = (
        col("Symbol"),
        col("Security"),
        col("GICS Sub-Industry"),
        col("Headquarters Location"),
        col("Date added"),
        col("CIK"),
        col("Founded"),
    );

    let mut records = Vec::new();
    let mut dropped = 0;
    for row in &table.rows {
        let (Some(sym), Some(date_added)) = (
            opt_text(row, symbol),
            parse_flexible_date(cell(row, added)),
        ) else {
            dropped += 1;
            continue;
        };
        records.push(Sp500Company {
            symbol: sym,
            date_added,
            security: opt_text(row, security),
            gics_sector: opt_text(row, sector),
            gics_sub_ind: opt_text(row, sub_ind),
            headquarters_loc: opt_text(row, hq),
            cik: normalize_cik_text(cell(row, cik)),
            founded: first_year(cell(row, founded)),
        });
    }
    Ok(Cleaned { records, dropped })
}

/// `CIK` + the digits of `text` zero-padded to ten.
fn normalize_cik_text(text: &str) -> Option<String> {
    let text = text.strip_suffix(".0").unwrap_or(text);
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("CIK{:0>10}", digits))
    }
}

/// First run of four digits, e.g. `"1902 (1889)"` → `"1902"`.
fn first_year(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    bytes
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .map(|i| text[i..i + 4].to_string())
}

/// Clean index membership changes.
pub fn clean_component_changes(table: &CsvTable) -> Result<Cleaned<ComponentChange>> {
    let required = LoadTarget::ComponentChanges.required_columns();
    table.require(required)?;
    let idx: Vec<usize> = required.iter().filter_map(|c| table.column(c)).collect();

    let mut records = Vec::new();
    let mut dropped = 0;
    for row in &table.rows {
        let Some(effective_date) = parse_flexible_date(cell(row, idx[0])) else {
            dropped += 1;
            continue;
        };
        let added_ticker = opt_text(row, idx[1]).unwrap_or_default();
        let removed_ticker = opt_text(row, idx[3]).unwrap_or_default();
        if added_ticker.is_empty() && removed_ticker.is_empty() {
            dropped += 1;
            continue;
        }
        records.push(ComponentChange {
            effective_date,
            added_ticker,
            added_security: opt_text(row, idx[2]),
            removed_ticker,
            removed_security: opt_text(row, idx[4]),
            reason: opt_text(row, idx[5]),
        });
    }
    Ok(Cleaned { records, dropped })
}

/// Clean Finnhub company news.
pub fn clean_news(table: &CsvTable) -> Result<Cleaned<NewsArticle>> {
    let required = LoadTarget::News.required_columns();
    table.require(required)?;
    let idx: Vec<usize> = required.iter().filter_map(|c| table.column(c)).collect();

    let mut records = Vec::new();
    let mut dropped = 0;
    for row in &table.rows {
        let (Some(symbol), Some(news_id), Some(datetime)) = (
            opt_text(row, idx[0]),
            opt_text(row, idx[1]),
            parse_flexible_datetime(cell(row, idx[2])),
        ) else {
            dropped += 1;
            continue;
        };
        records.push(NewsArticle {
            symbol,
            news_id,
            datetime,
            headline: opt_text(row, idx[3]),
            summary: opt_text(row, idx[4]),
            source: opt_text(row, idx[5]),
            url: opt_text(row, idx[6]),
            image: opt_text(row, idx[7]),
            related: opt_text(row, idx[8]),
            category: opt_text(row, idx[9]),
        });
    }
    Ok(Cleaned { records, dropped })
}

/// Clean dividends and splits.
pub fn clean_corporate_actions(table: &CsvTable) -> Result<Cleaned<CorporateAction>> {
    let required = LoadTarget::CorporateActions.required_columns();
    table.require(required)?;
    let idx: Vec<usize> = required.iter().filter_map(|c| table.column(c)).collect();

    let mut records = Vec::new();
    let mut dropped = 0;
    for row in &table.rows {
        let Some(symbol) = opt_text(row, idx[0]) else {
            dropped += 1;
            continue;
        };
        records.push(CorporateAction {
            symbol,
            event_type: opt_text(row, idx[1]).unwrap_or_default(),
            ex_date: parse_flexible_date(cell(row, idx[2])),
            record_date: parse_flexible_date(cell(row, idx[3])),
            pay_date: parse_flexible_date(cell(row, idx[4])),
            ratio: opt_text(row, idx[5]),
            cash_amount: cell(row, idx[6]).parse::<f64>().ok().filter(|f| f.is_finite()),
        });
    }
    Ok(Cleaned { records, dropped })
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// A record that knows how to write itself into its table.
#[async_trait]
pub trait LoadRow: Send + Sync {
    async fn upsert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()>;
}

#[async_trait]
impl LoadRow for OhlcRecord {
    async fn upsert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sp500_stooq_ohcl (ticker, date, open, high, low, close, volume)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker, date) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume
            "#,
        )
        .bind(&self.ticker)
        .bind(self.date.format("%Y-%m-%d").to_string())
        .bind(self.open)
        .bind(self.high)
        .bind(self.low)
        .bind(self.close)
        .bind(self.volume)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LoadRow for Sp500Company {
    async fn upsert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sp500_wik_list
                (symbol, date_added, security, gics_sector, gics_sub_ind, headquarters_loc, cik, founded)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, date_added) DO UPDATE SET
                security = excluded.security,
                gics_sector = excluded.gics_sector,
                gics_sub_ind = excluded.gics_sub_ind,
                headquarters_loc = excluded.headquarters_loc,
                cik = excluded.cik,
                founded = excluded.founded
            "#,
        )
        .bind(&self.symbol)
        .bind(self.date_added.format("%Y-%m-%d").to_string())
        .bind(&self.security)
        .bind(&self.gics_sector)
        .bind(&self.gics_sub_ind)
        .bind(&self.headquarters_loc)
        .bind(&self.cik)
        .bind(&self.founded)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LoadRow for ComponentChange {
    async fn upsert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO selected_changes_sp500
                (effective_date, added_ticker, added_security, removed_ticker, removed_security, reason)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(effective_date, added_ticker, removed_ticker) DO UPDATE SET
                added_security = excluded.added_security,
                removed_security = excluded.removed_security,
                reason = excluded.reason
            "#,
        )
        .bind(self.effective_date.format("%Y-%m-%d").to_string())
        .bind(&self.added_ticker)
        .bind(&self.added_security)
        .bind(&self.removed_ticker)
        .bind(&self.removed_security)
        .bind(&self.reason)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LoadRow for NewsArticle {
    async fn upsert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sp500_finnhub_news
                (symbol, news_id, datetime, headline, summary, source, url, image, related, category)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, news_id) DO UPDATE SET
                datetime = excluded.datetime,
                headline = excluded.headline,
                summary = excluded.summary,
                source = excluded.source,
                url = excluded.url,
                image = excluded.image,
                related = excluded.related,
                category = excluded.category
            "#,
        )
        .bind(&self.symbol)
        .bind(&self.news_id)
        .bind(datetime_text(self.datetime))
        .bind(&self.headline)
        .bind(&self.summary)
        .bind(&self.source)
        .bind(&self.url)
        .bind(&self.image)
        .bind(&self.related)
        .bind(&self.category)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LoadRow for CorporateAction {
    async fn upsert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sp500_corporate_actions
                (symbol, event_type, ex_date, record_date, pay_date, ratio, cash_amount)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.symbol)
        .bind(&self.event_type)
        .bind(date_text(self.ex_date))
        .bind(date_text(self.record_date))
        .bind(date_text(self.pay_date))
        .bind(&self.ratio)
        .bind(self.cash_amount)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

/// Counts from [`write_batches`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteCounts {
    pub inserted: usize,
    pub errors: usize,
}

/// Write `rows` in transactions of `batch_size`. A failing batch is rolled
/// back and counted as errors; later batches still run.
pub async fn write_batches<T: LoadRow>(
    pool: &SqlitePool,
    table: &str,
    rows: &[T],
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<WriteCounts> {
    let mut counts = WriteCounts::default();
    let total = rows.len() as u64;

    for (i, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        let mut tx = pool.begin().await?;
        let mut failure = None;
        for row in batch {
            if let Err(e) = row.upsert(&mut *tx).await {
                failure = Some(e);
                break;
            }
        }

        match failure {
            None => {
                tx.commit().await?;
                counts.inserted += batch.len();
            }
            Some(e) => {
                tracing::warn!(table, batch = i + 1, error = %e, "batch failed, rolled back");
                tx.rollback().await?;
                counts.errors += batch.len();
            }
        }

        progress.report(ProgressEvent::Advance {
            task: format!("load {}", table),
            n: (counts.inserted + counts.errors) as u64,
            total,
            unit: "rows",
        });
    }
    Ok(counts)
}

/// Replace the contents of `table` with `rows` in a single transaction. A
/// failing row rolls back the delete as well, so the previous contents stay.
/// An empty `rows` leaves the table untouched.
pub async fn replace_all<T: LoadRow>(
    pool: &SqlitePool,
    table: &str,
    rows: &[T],
    progress: &dyn ProgressReporter,
) -> Result<WriteCounts> {
    if rows.is_empty() {
        tracing::warn!(table, "no rows after cleaning, keeping existing contents");
        return Ok(WriteCounts::default());
    }

    let mut tx = pool.begin().await?;
    let cleared = sqlx::query(&format!("DELETE FROM {}", table))
        .execute(&mut *tx)
        .await?
        .rows_affected();
    for (i, row) in rows.iter().enumerate() {
        if let Err(e) = row.upsert(&mut *tx).await {
            tracing::warn!(table, row = i + 1, error = %e, "replace failed, rolled back");
            tx.rollback().await?;
            return Ok(WriteCounts {
                inserted: 0,
                errors: rows.len(),
            });
        }
    }
    tx.commit().await?;
    tracing::info!(table, cleared, inserted = rows.len(), "replaced table contents");

    progress.report(ProgressEvent::Advance {
        task: format!("load {}", table),
        n: rows.len() as u64,
        total: rows.len() as u64,
        unit: "rows",
    });
    Ok(WriteCounts {
        inserted: rows.len(),
        errors: 0,
    })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Load one CSV into its target table.
pub async fn load_csv(
    pool: &SqlitePool,
    target: LoadTarget,
    input: &Path,
    opts: &LoadOptions,
    progress: &dyn ProgressReporter,
) -> Result<LoadSummary> {
    if opts.batch_size == 0 {
        bail!("batch_size must be > 0");
    }
    if !input.exists() {
        bail!("Input file not found: {}", input.display());
    }
    let table = target.table();
    if !migrate::table_exists(pool, table).await? {
        bail!("Table '{}' does not exist; run `spx db init` first", table);
    }

    progress.report(ProgressEvent::Stage {
        task: format!("load {}", table),
        stage: "reading".to_string(),
    });
    let csv = CsvTable::read(input)?;
    let start = Instant::now();

    let test_rows = match target {
        LoadTarget::Ohlc => OHLC_TEST_ROWS,
        _ => opts.batch_size,
    };
    let limit = |n: usize| if opts.test_mode { n.min(test_rows) } else { n };

    let (total, dropped, counts) = match target {
        LoadTarget::Ohlc => {
            let c = clean_ohlc(&csv)?;
            let rows = &c.records[..limit(c.records.len())];
            let w = write_batches(pool, table, rows, opts.batch_size, progress).await?;
            (rows.len(), c.dropped, w)
        }
        LoadTarget::WikiList => {
            let c = clean_wiki_list(&csv)?;
            let rows = &c.records[..limit(c.records.len())];
            let w = write_batches(pool, table, rows, opts.batch_size, progress).await?;
            (rows.len(), c.dropped, w)
        }
        LoadTarget::ComponentChanges => {
            let c = clean_component_changes(&csv)?;
            let rows = &c.records[..limit(c.records.len())];
            let w = write_batches(pool, table, rows, opts.batch_size, progress).await?;
            (rows.len(), c.dropped, w)
        }
        LoadTarget::News => {
            let c = clean_news(&csv)?;
            let rows = &c.records[..limit(c.records.len())];
            let w = write_batches(pool, table, rows, opts.batch_size, progress).await?;
            (rows.len(), c.dropped, w)
        }
        LoadTarget::CorporateActions => {
            let c = clean_corporate_actions(&csv)?;
            let rows = &c.records[..limit(c.records.len())];
            let w = replace_all(pool, table, rows, progress).await?;
            (rows.len(), c.dropped, w)
        }
    };

    let verified_count = if opts.verify {
        Some(migrate::count_rows(pool, table).await?)
    } else {
        None
    };

    Ok(LoadSummary {
        table,
        total,
        inserted: counts.inserted,
        errors: counts.errors,
        dropped,
        duration: start.elapsed(),
        verified_count,
    })
}
