//! Scheduler task bodies.
//!
//! An external scheduler orders the stages; each `spx pipeline …` command
//! runs one task end to end: scan → extract/load → validate → report.
//!
//! Validation compares table row counts with what the run says it wrote and
//! prints `MATCH` or `MISMATCH`. A mismatch is informational (tables may hold
//! rows from earlier runs of other directories). The task fails when no
//! input was found or when every input failed.
//!
//! The report is printed to stdout as `key: value` lines ending with a
//! single `RESULT task=<name> status=<ok|failed>` line for log scraping.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::ingest_sec::{self, IngestReport, SecKind};
use crate::load::{self, LoadOptions, LoadSummary, LoadTarget};
use crate::migrate;
use crate::ohlc::{self, NormalizeOptions, NormalizeSummary};
use crate::progress::{ProgressEvent, ProgressReporter};

/// One table count compared with the count the run expected.
#[derive(Debug, Clone, PartialEq)]
pub struct CountCheck {
    pub table: &'static str,
    pub expected: usize,
    pub actual: i64,
}

impl CountCheck {
    pub fn matches(&self) -> bool {
        self.actual == self.expected as i64
    }

    pub fn status(&self) -> &'static str {
        if self.matches() {
            "MATCH"
        } else {
            "MISMATCH"
        }
    }
}

/// Outcome of a `sec-facts` or `sec-submissions` run.
#[derive(Debug)]
pub struct SecPipelineReport {
    pub kind: SecKind,
    pub dir: PathBuf,
    pub ingest: IngestReport,
    pub checks: Vec<CountCheck>,
    pub duration: Duration,
}

impl SecPipelineReport {
    pub fn succeeded(&self) -> bool {
        self.ingest.successful() > 0
    }

    pub fn print(&self) {
        let r = &self.ingest;
        println!("PIPELINE {}", self.kind.label());
        println!("  directory:          {}", self.dir.display());
        println!("  files_processed:    {}", r.processed());
        println!("  files_successful:   {}", r.successful());
        println!("  files_failed:       {}", r.failed());
        println!("  file_success_rate:  {}", percent(r.successful(), r.processed()));
        println!("  records_extracted:  {}", r.extracted());
        println!("  records_inserted:   {}", r.inserted());
        println!("  records_skipped:    {}", r.skipped());
        println!("  insert_rate:        {}", percent(r.inserted(), r.extracted()));
        if self.kind == SecKind::Facts {
            println!("  dict_extracted:     {}", r.dict_extracted());
            println!("  dict_inserted:      {}", r.dict_inserted());
        }
        for c in &self.checks {
            println!(
                "  validate {}: expected={} actual={} diff={} {}",
                c.table,
                c.expected,
                c.actual,
                c.actual - c.expected as i64,
                c.status()
            );
        }
        let failures: Vec<_> = r.files.iter().filter(|f| !f.is_success()).collect();
        for f in failures.iter().take(10) {
            println!(
                "  failed: {} ({})",
                f.file.display(),
                f.error.as_deref().unwrap_or("unknown error")
            );
        }
        if failures.len() > 10 {
            println!("  ... and {} more failed files", failures.len() - 10);
        }
        println!("  duration:           {:.2}s", self.duration.as_secs_f64());
        print_result(self.kind.label(), self.succeeded());
    }
}

/// Run a SEC ingestion task over `dir` (or the configured directory).
pub async fn run_sec(
    config: &Config,
    pool: &SqlitePool,
    kind: SecKind,
    dir: Option<&Path>,
    progress: &dyn ProgressReporter,
) -> Result<SecPipelineReport> {
    let dir = match (dir, kind) {
        (Some(d), _) => d.to_path_buf(),
        (None, SecKind::Facts) => config.paths.company_facts_dir.clone(),
        (None, SecKind::Submissions) => config.paths.submissions_dir.clone(),
    };
    let start = Instant::now();
    migrate::create_all(pool).await?;

    let ingest =
        ingest_sec::ingest_dir(pool, &dir, kind, config.load.max_retries, progress).await?;

    progress.report(ProgressEvent::Stage {
        task: kind.label().to_string(),
        stage: "validating".to_string(),
    });
    let checks = validate_sec(pool, kind, &ingest).await?;

    Ok(SecPipelineReport {
        kind,
        dir,
        ingest,
        checks,
        duration: start.elapsed(),
    })
}

async fn validate_sec(
    pool: &SqlitePool,
    kind: SecKind,
    ingest: &IngestReport,
) -> Result<Vec<CountCheck>> {
    let checks = match kind {
        SecKind::Facts => vec![
            CountCheck {
                table: "bronze_sec_facts",
                expected: ingest.inserted(),
                actual: migrate::count_rows(pool, "bronze_sec_facts").await?,
            },
            CountCheck {
                table: "bronze_sec_facts_dict",
                expected: ingest.dict_keys.len(),
                actual: migrate::count_rows(pool, "bronze_sec_facts_dict").await?,
            },
        ],
        SecKind::Submissions => vec![CountCheck {
            table: "bronze_sec_submissions",
            expected: ingest.submission_keys.len(),
            actual: migrate::count_rows(pool, "bronze_sec_submissions").await?,
        }],
    };
    for c in &checks {
        if !c.matches() {
            tracing::warn!(
                table = c.table,
                expected = c.expected,
                actual = c.actual,
                "table count differs from processing metrics"
            );
        }
    }
    Ok(checks)
}

/// Outcome of the OHLC normalize + load task.
#[derive(Debug)]
pub struct OhlcPipelineReport {
    pub normalize: NormalizeSummary,
    pub sha256: String,
    pub load: LoadSummary,
    pub duration: Duration,
}

impl OhlcPipelineReport {
    pub fn succeeded(&self) -> bool {
        self.normalize.processed > 0 && self.load.errors == 0
    }

    pub fn print(&self) {
        let n = &self.normalize;
        let l = &self.load;
        println!("PIPELINE ohlc");
        println!("  files_normalized:   {}", n.processed);
        println!("  files_failed:       {}", n.failed);
        println!("  file_success_rate:  {}", percent(n.processed, n.processed + n.failed));
        println!("  records_written:    {}", n.records);
        println!("  output:             {}", n.output.display());
        println!("  output_sha256:      {}", self.sha256);
        println!("  rows_loaded:        {}", l.inserted);
        println!("  rows_dropped:       {}", l.dropped);
        println!("  rows_errored:       {}", l.errors);
        println!("  insert_rate:        {}", percent(l.inserted, l.total));
        if let Some(count) = l.verified_count {
            let check = CountCheck {
                table: l.table,
                expected: l.inserted,
                actual: count,
            };
            println!(
                "  validate {}: expected={} actual={} {}",
                check.table,
                check.expected,
                check.actual,
                check.status()
            );
        }
        println!("  duration:           {:.2}s", self.duration.as_secs_f64());
        print_result("ohlc", self.succeeded());
    }
}

/// Normalize the Stooq files, then load the merged CSV into the OHLC table.
pub async fn run_ohlc(
    config: &Config,
    pool: &SqlitePool,
    opts: &NormalizeOptions,
    progress: &dyn ProgressReporter,
) -> Result<OhlcPipelineReport> {
    let start = Instant::now();
    let normalize = ohlc::run_normalize(config, opts, progress)?;
    let sha256 = file_sha256(&normalize.output)?;

    migrate::create_all(pool).await?;
    let load_opts = LoadOptions {
        batch_size: config.load.batch_size,
        test_mode: false,
        verify: true,
    };
    let load = load::load_csv(pool, LoadTarget::Ohlc, &normalize.output, &load_opts, progress)
        .await?;

    Ok(OhlcPipelineReport {
        normalize,
        sha256,
        load,
        duration: start.elapsed(),
    })
}

/// Hex SHA-256 of a file's contents.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn percent(part: usize, whole: usize) -> String {
    if whole == 0 {
        "n/a".to_string()
    } else {
        format!("{:.1}%", part as f64 * 100.0 / whole as f64)
    }
}

fn print_result(task: &str, ok: bool) {
    println!(
        "RESULT task={} status={}",
        task,
        if ok { "ok" } else { "failed" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::progress::NoProgress;
    use serde_json::json;
    use std::fs;

    async fn setup() -> (tempfile::TempDir, Config, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("p.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        (tmp, config, pool)
    }

    #[test]
    fn percent_handles_zero() {
        assert_eq!(percent(0, 0), "n/a");
        assert_eq!(percent(1, 4), "25.0%");
    }

    #[test]
    fn sha256_of_known_content() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("x.txt");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn sec_facts_run_validates_counts() {
        let (tmp, config, pool) = setup().await;
        let dir = tmp.path().join("facts");
        fs::create_dir(&dir).unwrap();
        let doc = json!({"facts": {"dei": {"EntityCommonStockSharesOutstanding": {
            "label": "Shares", "units": {"shares": [
                {"end": "2023-10-20", "val": 15550061000u64, "fy": 2023, "fp": "FY", "form": "10-K"}
            ]}
        }}}});
        fs::write(dir.join("CIK0000320193.json"), doc.to_string()).unwrap();

        let report = run_sec(&config, &pool, SecKind::Facts, Some(&dir), &NoProgress)
            .await
            .unwrap();
        assert!(report.succeeded());
        assert_eq!(report.checks.len(), 2);
        assert!(report.checks.iter().all(CountCheck::matches));
    }

    #[tokio::test]
    async fn sec_run_with_only_bad_files_fails() {
        let (tmp, config, pool) = setup().await;
        let dir = tmp.path().join("subs");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("CIK0000320193.json"), "{").unwrap();

        let report = run_sec(&config, &pool, SecKind::Submissions, Some(&dir), &NoProgress)
            .await
            .unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.ingest.failed(), 1);
    }

    #[tokio::test]
    async fn ohlc_run_normalizes_and_loads() {
        let (tmp, config, pool) = setup().await;
        let input = tmp.path().join("stooq");
        fs::create_dir(&input).unwrap();
        fs::write(
            input.join("aapl.us.txt"),
            "<TICKER>,<PER>,<DATE>,<TIME>,<OPEN>,<HIGH>,<LOW>,<CLOSE>,<VOL>,<OPENINT>\n\
             AAPL.US,D,20210104,000000,133.5,133.6,126.7,129.4,143301900,0\n\
             AAPL.US,D,20210105,000000,128.9,131.7,128.4,131.0,97664900,0\n",
        )
        .unwrap();
        let opts = NormalizeOptions {
            input_dir: Some(input),
            output_dir: Some(tmp.path().join("out")),
            ..NormalizeOptions::default()
        };

        let report = run_ohlc(&config, &pool, &opts, &NoProgress).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.normalize.records, 2);
        assert_eq!(report.load.inserted, 2);
        assert_eq!(report.load.verified_count, Some(2));
        assert_eq!(report.sha256.len(), 64);
    }
}
