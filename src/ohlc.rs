//! Stooq OHLC normalization.
//!
//! Stooq daily downloads are one text file per ticker with the header
//! `<TICKER>,<PER>,<DATE>,<TIME>,<OPEN>,<HIGH>,<LOW>,<CLOSE>,<VOL>,<OPENINT>`
//! and `YYYYMMDD` dates. Normalization keeps the seven price columns,
//! reformats dates to ISO, applies an inclusive date window and merges every
//! file into one `normalized_sp500_data.csv`.
//!
//! ```text
//! ohlc_dir/*.txt ──▶ file_names.csv ──▶ normalize (batch_size files) ──▶ normalized_sp500_data.csv
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::config::{parse_date_opt, Config};
use crate::models::{OhlcRow, OHLC_COLUMNS};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::scan;

/// Name of the merged output file.
pub const OUTPUT_FILE: &str = "normalized_sp500_data.csv";

/// Source header names, in the order of [`OHLC_COLUMNS`].
const SOURCE_COLUMNS: [&str; 7] = [
    "<TICKER>", "<DATE>", "<OPEN>", "<HIGH>", "<LOW>", "<CLOSE>", "<VOL>",
];

/// Inclusive date window. An unset bound is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                bail!("start date {} is after end date {}", s, e);
            }
        }
        Ok(Self { start, end })
    }

    /// Build from optional `YYYY-MM-DD` strings.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        Self::new(
            parse_date_opt(start, "start_date")?,
            parse_date_opt(end, "end_date")?,
        )
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Outcome of a normalization run.
#[derive(Debug)]
pub struct NormalizeSummary {
    pub processed: usize,
    pub failed: usize,
    pub records: usize,
    pub output: PathBuf,
}

impl NormalizeSummary {
    pub fn print(&self) {
        println!("Normalization complete:");
        println!("  files normalized: {}", self.processed);
        println!("  files failed:     {}", self.failed);
        println!("  records written:  {}", self.records);
        println!("  output:           {}", self.output.display());
    }
}

/// Normalize one Stooq file, keeping rows whose date falls inside `range`.
pub fn normalize_file(path: &Path, range: &DateRange) -> Result<Vec<OhlcRow>> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let mut idx = [0usize; 7];
    for (slot, name) in idx.iter_mut().zip(SOURCE_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("{} is missing column {}", path.display(), name))?;
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
        let field = |i: usize| record.get(idx[i]).unwrap_or("").to_string();

        let raw_date = field(1);
        let date = NaiveDate::parse_from_str(&raw_date, "%Y%m%d").with_context(|| {
            format!("{}: bad date '{}' on row {}", path.display(), raw_date, line + 2)
        })?;
        if !range.contains(date) {
            continue;
        }

        rows.push(OhlcRow {
            ticker: field(0),
            date: date.format("%Y-%m-%d").to_string(),
            open: field(2),
            high: field(3),
            low: field(4),
            close: field(5),
            volume: field(6),
        });
    }
    Ok(rows)
}

/// Normalize every file in `file_names` (resolved under `input_dir`) into
/// `out_dir/normalized_sp500_data.csv`.
///
/// Rows are buffered and flushed after each `batch_size` successfully
/// normalized files. A failing file is logged and counted, never fatal.
pub fn normalize_all(
    input_dir: &Path,
    file_names: &[String],
    out_dir: &Path,
    batch_size: usize,
    range: &DateRange,
    progress: &dyn ProgressReporter,
) -> Result<NormalizeSummary> {
    if batch_size == 0 {
        bail!("batch_size must be > 0");
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let output = out_dir.join(OUTPUT_FILE);

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    writer.write_record(OHLC_COLUMNS)?;

    let mut summary = NormalizeSummary {
        processed: 0,
        failed: 0,
        records: 0,
        output: output.clone(),
    };
    let mut batch: Vec<OhlcRow> = Vec::new();
    let mut files_in_batch = 0;

    for (i, name) in file_names.iter().enumerate() {
        match normalize_file(&input_dir.join(name), range) {
            Ok(rows) => {
                batch.extend(rows);
                files_in_batch += 1;
                summary.processed += 1;
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "skipping file");
                summary.failed += 1;
            }
        }

        if files_in_batch >= batch_size || i + 1 == file_names.len() {
            for row in batch.drain(..) {
                writer.serialize(row)?;
                summary.records += 1;
            }
            writer.flush()?;
            files_in_batch = 0;
            progress.report(ProgressEvent::Advance {
                task: "normalize ohlc".to_string(),
                n: (i + 1) as u64,
                total: file_names.len() as u64,
                unit: "files",
            });
        }
    }

    writer.flush()?;
    Ok(summary)
}

/// Overrides for the normalize pipeline; `None` falls back to config.
#[derive(Debug, Default, Clone)]
pub struct NormalizeOptions {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub batch_size: Option<usize>,
}

/// Full normalization: list input files, write the manifest, normalize.
pub fn run_normalize(
    config: &Config,
    opts: &NormalizeOptions,
    progress: &dyn ProgressReporter,
) -> Result<NormalizeSummary> {
    let input_dir = opts.input_dir.as_deref().unwrap_or(&config.paths.ohlc_dir);
    let out_dir = opts
        .output_dir
        .as_deref()
        .unwrap_or(&config.paths.normalized_dir);
    let batch_size = opts.batch_size.unwrap_or(config.normalize.batch_size);
    let range = DateRange::parse(
        opts.start_date
            .as_deref()
            .or(config.normalize.start_date.as_deref()),
        opts.end_date
            .as_deref()
            .or(config.normalize.end_date.as_deref()),
    )?;

    progress.report(ProgressEvent::Stage {
        task: "normalize ohlc".to_string(),
        stage: "scanning".to_string(),
    });
    let names = scan::list_file_names(input_dir, &config.normalize.include_globs)?;
    let manifest = scan::write_manifest(&names, out_dir, scan::MANIFEST_FILE)?;
    tracing::info!(files = names.len(), manifest = %manifest.display(), "wrote file manifest");

    let names = scan::read_manifest(&manifest)?;
    normalize_all(input_dir, &names, out_dir, batch_size, &range, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::fs;

    const HEADER: &str = "<TICKER>,<PER>,<DATE>,<TIME>,<OPEN>,<HIGH>,<LOW>,<CLOSE>,<VOL>,<OPENINT>\n";

    fn stooq_file(dir: &Path, name: &str, ticker: &str, dates: &[&str]) {
        let mut body = HEADER.to_string();
        for d in dates {
            body.push_str(&format!("{},D,{},000000,10.0,11.5,9.5,11.0,12345,0\n", ticker, d));
        }
        fs::write(dir.join(name), body).unwrap();
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let r = DateRange::new(Some(date("2021-01-01")), Some(date("2021-12-31"))).unwrap();
        assert!(r.contains(date("2021-01-01")));
        assert!(r.contains(date("2021-12-31")));
        assert!(!r.contains(date("2020-12-31")));
        assert!(!r.contains(date("2022-01-01")));
        assert!(DateRange::default().contains(date("1990-01-01")));
        assert!(DateRange::parse(Some("2022-01-01"), Some("2021-01-01")).is_err());
    }

    #[test]
    fn normalize_file_selects_and_reformats() {
        let tmp = tempfile::TempDir::new().unwrap();
        stooq_file(tmp.path(), "aapl.us.txt", "AAPL.US", &["20210104", "20210105"]);
        let rows = normalize_file(&tmp.path().join("aapl.us.txt"), &DateRange::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ticker, "AAPL.US");
        assert_eq!(rows[0].date, "2021-01-04");
        assert_eq!(rows[0].high, "11.5");
        assert_eq!(rows[0].volume, "12345");
    }

    #[test]
    fn normalize_file_rejects_missing_column_and_bad_date() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.txt"), "<TICKER>,<DATE>\nX,20210104\n").unwrap();
        assert!(normalize_file(&tmp.path().join("bad.txt"), &DateRange::default()).is_err());

        stooq_file(tmp.path(), "x.txt", "X", &["2021-01-04"]);
        assert!(normalize_file(&tmp.path().join("x.txt"), &DateRange::default()).is_err());
    }

    #[test]
    fn merges_two_tickers_filtered_to_2021() {
        let input = tempfile::TempDir::new().unwrap();
        let out = tempfile::TempDir::new().unwrap();
        let dates = ["20200615", "20201231", "20210101", "20210630", "20211231", "20220103", "20230602"];
        stooq_file(input.path(), "aapl.us.txt", "AAPL.US", &dates);
        stooq_file(input.path(), "msft.us.txt", "MSFT.US", &dates);

        let range = DateRange::parse(Some("2021-01-01"), Some("2021-12-31")).unwrap();
        let names = vec!["aapl.us.txt".to_string(), "msft.us.txt".to_string()];
        let summary =
            normalize_all(input.path(), &names, out.path(), 1, &range, &NoProgress).unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.records, 6);

        let mut reader = csv::Reader::from_path(&summary.output).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, OHLC_COLUMNS);
        let rows: Vec<OhlcRow> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 6);
        for row in &rows {
            assert!(row.date.as_str() >= "2021-01-01" && row.date.as_str() <= "2021-12-31");
        }
        assert_eq!(rows.iter().filter(|r| r.ticker == "AAPL.US").count(), 3);
        assert_eq!(rows.iter().filter(|r| r.ticker == "MSFT.US").count(), 3);
    }

    #[test]
    fn failed_files_are_counted_not_fatal() {
        let input = tempfile::TempDir::new().unwrap();
        let out = tempfile::TempDir::new().unwrap();
        stooq_file(input.path(), "ok.txt", "OK", &["20210104"]);
        let names = vec!["missing.txt".to_string(), "ok.txt".to_string()];
        let summary = normalize_all(
            input.path(),
            &names,
            out.path(),
            50,
            &DateRange::default(),
            &NoProgress,
        )
        .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.records, 1);
    }

    #[test]
    fn pipeline_writes_manifest_and_output() {
        let input = tempfile::TempDir::new().unwrap();
        let out = tempfile::TempDir::new().unwrap();
        stooq_file(input.path(), "aapl.us.txt", "AAPL.US", &["20210104"]);
        let config = Config::with_db_path(out.path().join("db.sqlite"));
        let opts = NormalizeOptions {
            input_dir: Some(input.path().to_path_buf()),
            output_dir: Some(out.path().to_path_buf()),
            ..Default::default()
        };
        let summary = run_normalize(&config, &opts, &NoProgress).unwrap();
        assert_eq!(summary.records, 1);
        assert!(out.path().join(scan::MANIFEST_FILE).exists());
    }
}
