//! SEC JSON directory → bronze tables.
//!
//! Each file is extracted, then written in a single transaction that is
//! retried with exponential backoff (1s, 2s, 4s…) when the database write
//! fails. A file that still fails is recorded in the report and the run
//! moves on to the next file.
//!
//! Company facts have no natural key, so a file replaces every fact of its
//! CIK. Dictionary entries upsert on `(taxonomy, tag)` and submissions
//! upsert on their composite primary key.

use anyhow::Result;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::SqlitePool;

use crate::models::{date_text, datetime_text, SecFact, SecFactDictEntry, SecSubmission};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::scan;
use crate::sec_facts::{self, FactsExtract};
use crate::sec_submissions::{self, SubmissionsExtract};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecKind {
    Facts,
    Submissions,
}

impl SecKind {
    pub fn label(&self) -> &'static str {
        match self {
            SecKind::Facts => "sec-facts",
            SecKind::Submissions => "sec-submissions",
        }
    }
}

/// Result of ingesting one file.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub file: PathBuf,
    pub cik: Option<String>,
    pub error: Option<String>,
    /// Facts or filings extracted from the document.
    pub extracted: usize,
    /// Facts or filings written.
    pub inserted: usize,
    pub dict_extracted: usize,
    pub dict_inserted: usize,
    /// Points or rows skipped during extraction.
    pub skipped: usize,
}

impl FileResult {
    fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            cik: None,
            error: None,
            extracted: 0,
            inserted: 0,
            dict_extracted: 0,
            dict_inserted: 0,
            skipped: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-file results for a directory run, plus the distinct keys written so
/// table counts can be validated afterwards.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files: Vec<FileResult>,
    pub dict_keys: HashSet<(String, String)>,
    pub submission_keys: HashSet<(String, String, String, String)>,
}

impl IngestReport {
    pub fn processed(&self) -> usize {
        self.files.len()
    }
    pub fn successful(&self) -> usize {
        self.files.iter().filter(|f| f.is_success()).count()
    }
    pub fn failed(&self) -> usize {
        self.processed() - self.successful()
    }
    pub fn extracted(&self) -> usize {
        self.files.iter().map(|f| f.extracted).sum()
    }
    pub fn inserted(&self) -> usize {
        self.files.iter().map(|f| f.inserted).sum()
    }
    pub fn dict_extracted(&self) -> usize {
        self.files.iter().map(|f| f.dict_extracted).sum()
    }
    pub fn dict_inserted(&self) -> usize {
        self.files.iter().map(|f| f.dict_inserted).sum()
    }
    pub fn skipped(&self) -> usize {
        self.files.iter().map(|f| f.skipped).sum()
    }
}

/// Run `op` up to `max_retries` times, sleeping `2^attempt` seconds between
/// attempts.
pub async fn with_retry<T, F, Fut>(max_retries: u32, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_retries.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    tracing::error!(what, attempts, error = %e, "all attempts failed");
                    return Err(e);
                }
                let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(
                    what,
                    attempt,
                    attempts,
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "database write failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Write one company's facts and dictionary entries in one transaction.
pub async fn save_facts(pool: &SqlitePool, cik: &str, extract: &FactsExtract) -> Result<()> {
    let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let mut tx = pool.begin().await?;

    for entry in &extract.dict {
        upsert_dict_entry(&mut *tx, entry, &now).await?;
    }

    sqlx::query("DELETE FROM bronze_sec_facts WHERE cik = ?")
        .bind(cik)
        .execute(&mut *tx)
        .await?;
    for fact in &extract.facts {
        insert_fact(&mut *tx, fact).await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn upsert_dict_entry(
    conn: &mut sqlx::SqliteConnection,
    entry: &SecFactDictEntry,
    now: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bronze_sec_facts_dict (taxonomy, tag, label, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(taxonomy, tag) DO UPDATE SET
            label = excluded.label,
            description = excluded.description,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&entry.taxonomy)
    .bind(&entry.tag)
    .bind(&entry.label)
    .bind(&entry.description)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_fact(conn: &mut sqlx::SqliteConnection, fact: &SecFact) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bronze_sec_facts
            (cik, taxonomy, tag, unit, val, fy, fp, start_date, end_date, frame, form, filed, accn)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&fact.cik)
    .bind(&fact.taxonomy)
    .bind(&fact.tag)
    .bind(&fact.unit)
    .bind(fact.val)
    .bind(fact.fy)
    .bind(&fact.fp)
    .bind(date_text(fact.start_date))
    .bind(date_text(fact.end_date))
    .bind(&fact.frame)
    .bind(&fact.form)
    .bind(date_text(fact.filed))
    .bind(&fact.accn)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Upsert filings in one transaction.
pub async fn save_submissions(pool: &SqlitePool, extract: &SubmissionsExtract) -> Result<()> {
    let mut tx = pool.begin().await?;
    for filing in &extract.filings {
        upsert_submission(&mut *tx, filing).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn upsert_submission(conn: &mut sqlx::SqliteConnection, s: &SecSubmission) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bronze_sec_submissions
            (cik, accession_number, filing_date, acceptance_datetime, report_date, act, form,
             file_number, film_number, items, size, is_xbrl, is_inline_xbrl,
             primary_document, primary_doc_description)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(cik, accession_number, filing_date, acceptance_datetime) DO UPDATE SET
            report_date = excluded.report_date,
            act = excluded.act,
            form = excluded.form,
            file_number = excluded.file_number,
            film_number = excluded.film_number,
            items = excluded.items,
            size = excluded.size,
            is_xbrl = excluded.is_xbrl,
            is_inline_xbrl = excluded.is_inline_xbrl,
            primary_document = excluded.primary_document,
            primary_doc_description = excluded.primary_doc_description
        "#,
    )
    .bind(&s.cik)
    .bind(&s.accession_number)
    .bind(s.filing_date.format("%Y-%m-%d").to_string())
    .bind(datetime_text(s.acceptance_datetime))
    .bind(date_text(s.report_date))
    .bind(&s.act)
    .bind(&s.form)
    .bind(&s.file_number)
    .bind(s.film_number)
    .bind(&s.items)
    .bind(s.size)
    .bind(s.is_xbrl)
    .bind(s.is_inline_xbrl)
    .bind(&s.primary_document)
    .bind(&s.primary_doc_description)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Extract and load one company-facts file.
pub async fn ingest_facts_file(
    pool: &SqlitePool,
    path: &Path,
    max_retries: u32,
    report: &mut IngestReport,
) -> FileResult {
    let mut result = FileResult::new(path);
    let (cik, extract) = match sec_facts::read_facts_file(path) {
        Ok(v) => v,
        Err(e) => {
            result.error = Some(format!("{:#}", e));
            return result;
        }
    };
    let cik_text = cik.prefixed();
    result.cik = Some(cik_text.clone());
    result.extracted = extract.facts.len();
    result.dict_extracted = extract.dict.len();
    result.skipped = extract.skipped;

    let label = path.display().to_string();
    match with_retry(max_retries, &label, || save_facts(pool, &cik_text, &extract)).await {
        Ok(()) => {
            result.inserted = extract.facts.len();
            result.dict_inserted = extract.dict.len();
            report
                .dict_keys
                .extend(extract.dict.iter().map(|d| (d.taxonomy.clone(), d.tag.clone())));
        }
        Err(e) => result.error = Some(format!("{:#}", e)),
    }
    result
}

/// Extract and load one submissions file.
pub async fn ingest_submissions_file(
    pool: &SqlitePool,
    path: &Path,
    max_retries: u32,
    report: &mut IngestReport,
) -> FileResult {
    let mut result = FileResult::new(path);
    let (cik, extract) = match sec_submissions::read_submissions_file(path) {
        Ok(v) => v,
        Err(e) => {
            result.error = Some(format!("{:#}", e));
            return result;
        }
    };
    result.cik = Some(cik.padded());
    result.extracted = extract.filings.len();
    result.skipped = extract.dropped;

    let label = path.display().to_string();
    match with_retry(max_retries, &label, || save_submissions(pool, &extract)).await {
        Ok(()) => {
            result.inserted = extract.filings.len();
            report.submission_keys.extend(extract.filings.iter().map(|s| {
                (
                    s.cik.clone(),
                    s.accession_number.clone(),
                    s.filing_date.format("%Y-%m-%d").to_string(),
                    datetime_text(s.acceptance_datetime),
                )
            }));
        }
        Err(e) => result.error = Some(format!("{:#}", e)),
    }
    result
}

/// Ingest every `*.json` file in `dir`.
pub async fn ingest_dir(
    pool: &SqlitePool,
    dir: &Path,
    kind: SecKind,
    max_retries: u32,
    progress: &dyn ProgressReporter,
) -> Result<IngestReport> {
    progress.report(ProgressEvent::Stage {
        task: kind.label().to_string(),
        stage: "scanning".to_string(),
    });
    let files = scan::list_json_files(dir)?;
    tracing::info!(dir = %dir.display(), files = files.len(), "found JSON files");

    let mut report = IngestReport::default();
    let total = files.len() as u64;
    for (i, path) in files.iter().enumerate() {
        let result = match kind {
            SecKind::Facts => ingest_facts_file(pool, path, max_retries, &mut report).await,
            SecKind::Submissions => {
                ingest_submissions_file(pool, path, max_retries, &mut report).await
            }
        };
        if let Some(err) = &result.error {
            tracing::error!(file = %path.display(), error = %err, "failed to ingest file");
        }
        report.files.push(result);
        progress.report(ProgressEvent::Advance {
            task: kind.label().to_string(),
            n: (i + 1) as u64,
            total,
            unit: "files",
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::migrate;
    use crate::progress::NoProgress;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn temp_pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = Config::with_db_path(tmp.path().join("t.sqlite"));
        let pool = db::connect(&cfg).await.unwrap();
        migrate::create_all(&pool).await.unwrap();
        (tmp, pool)
    }

    fn facts_doc(val: f64) -> serde_json::Value {
        json!({"facts": {"us-gaap": {
            "Revenues": {"label": "Revenues", "units": {"USD": [
                {"end": "2021-09-25", "val": val, "fy": 2021},
                {"end": "2022-09-24", "val": val * 2.0, "fy": 2022}
            ]}},
            "Assets": {"label": "Assets", "units": {"USD": [{"end": "2022-09-24", "val": 1.0}]}}
        }}})
    }

    #[tokio::test]
    async fn facts_reingest_replaces_rows_for_cik() {
        let (tmp, pool) = temp_pool().await;
        let dir = tmp.path().join("facts");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("CIK0000320193.json"), facts_doc(10.0).to_string()).unwrap();
        std::fs::write(dir.join("CIK0000789019.json"), facts_doc(5.0).to_string()).unwrap();
        std::fs::write(dir.join("CIK0000000001.json"), "not json").unwrap();

        for _ in 0..2 {
            let report = ingest_dir(&pool, &dir, SecKind::Facts, 1, &NoProgress)
                .await
                .unwrap();
            assert_eq!(report.processed(), 3);
            assert_eq!(report.successful(), 2);
            assert_eq!(report.failed(), 1);
            assert_eq!(report.inserted(), 6);
            assert_eq!(report.dict_keys.len(), 2);
        }
        assert_eq!(migrate::count_rows(&pool, "bronze_sec_facts").await.unwrap(), 6);
        assert_eq!(migrate::count_rows(&pool, "bronze_sec_facts_dict").await.unwrap(), 2);

        let cik: String = sqlx::query_scalar("SELECT cik FROM bronze_sec_facts ORDER BY cik LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(cik, "CIK0000320193");
    }

    #[tokio::test]
    async fn nan_value_does_not_fail_the_file() {
        let (tmp, pool) = temp_pool().await;
        let path = tmp.path().join("CIK0000320193.json");
        let doc = json!({"facts": {"us-gaap": {"Assets": {"units": {"USD": [
            {"end": "2021-09-25", "val": 1.0},
            {"end": "2022-09-24", "val": "NaN"}
        ]}}}}});
        std::fs::write(&path, doc.to_string()).unwrap();

        let mut report = IngestReport::default();
        let result = ingest_facts_file(&pool, &path, 0, &mut report).await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.inserted, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(migrate::count_rows(&pool, "bronze_sec_facts").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn submissions_upsert_is_idempotent() {
        let (tmp, pool) = temp_pool().await;
        let dir = tmp.path().join("subs");
        std::fs::create_dir(&dir).unwrap();
        let doc = json!({"filings": {"recent": {
            "accessionNumber": ["a-1", "a-2"],
            "filingDate": ["2024-01-02", "2024-02-01"],
            "acceptanceDateTime": ["2024-01-02T16:30:01.000Z", "2024-02-01T18:01:14.000Z"],
            "form": ["10-K", "8-K"]
        }}});
        std::fs::write(dir.join("CIK0000320193.json"), doc.to_string()).unwrap();
        let paged = json!({
            "accessionNumber": ["a-0"],
            "filingDate": ["2001-01-02"],
            "acceptanceDateTime": ["2001-01-02T10:00:00.000Z"]
        });
        std::fs::write(dir.join("CIK0000320193-submissions-001.json"), paged.to_string()).unwrap();

        for _ in 0..2 {
            let report = ingest_dir(&pool, &dir, SecKind::Submissions, 1, &NoProgress)
                .await
                .unwrap();
            assert_eq!(report.successful(), 2);
            assert_eq!(report.inserted(), 3);
        }
        assert_eq!(
            migrate::count_rows(&pool, "bronze_sec_submissions").await.unwrap(),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = with_retry(3, "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("locked")
                }
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(2, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("down") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
