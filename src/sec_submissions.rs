//! SEC submissions JSON normalization.
//!
//! EDGAR submission files store filings column-wise: each field of
//! `filings.recent` is an array, and row `i` of the table is made from
//! element `i` of every array. Paged files (`CIK…-submissions-001.json`)
//! carry the same arrays at the top level.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::path::Path;

use crate::cik::{cik_from_filename, Cik, FileKind};
use crate::models::SecSubmission;
use crate::sec_facts::{json_date, json_i64, json_text, read_json};

/// Columns read from the filings arrays, in record-field order.
const COLUMNS: [&str; 14] = [
    "accessionNumber",
    "filingDate",
    "reportDate",
    "acceptanceDateTime",
    "act",
    "form",
    "fileNumber",
    "filmNumber",
    "items",
    "size",
    "isXBRL",
    "isInlineXBRL",
    "primaryDocument",
    "primaryDocDescription",
];

/// Filing rows extracted from one submissions document.
#[derive(Debug, Default)]
pub struct SubmissionsExtract {
    pub filings: Vec<SecSubmission>,
    /// Rows dropped for lacking accession number, filing date or acceptance time.
    pub dropped: usize,
}

/// Flatten a parsed submissions document.
pub fn extract_submissions(doc: &Value, cik: Cik) -> SubmissionsExtract {
    let mut out = SubmissionsExtract::default();

    let recent = doc
        .get("filings")
        .and_then(|f| f.get("recent"))
        .filter(|r| r.as_object().is_some_and(|o| !o.is_empty()));
    let source = match recent {
        Some(r) => r,
        None if doc.get("accessionNumber").is_some() => doc,
        None => return out,
    };

    let columns: Vec<&[Value]> = COLUMNS
        .iter()
        .map(|c| {
            source
                .get(*c)
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[])
        })
        .collect();
    let rows = columns.iter().map(|c| c.len()).max().unwrap_or(0);
    let cik_text = cik.padded();

    for i in 0..rows {
        let cell = |col: usize| columns[col].get(i).filter(|v| !v.is_null());

        let accession = cell(0).and_then(json_text);
        let filing_date = cell(1).and_then(json_date);
        let accepted = cell(3).and_then(|v| v.as_str()).and_then(parse_acceptance);
        let (Some(accession_number), Some(filing_date), Some(acceptance_datetime)) =
            (accession, filing_date, accepted)
        else {
            out.dropped += 1;
            continue;
        };

        out.filings.push(SecSubmission {
            cik: cik_text.clone(),
            accession_number,
            filing_date,
            acceptance_datetime,
            report_date: cell(2).and_then(json_date),
            act: cell(4).and_then(json_text),
            form: cell(5).and_then(json_text),
            file_number: cell(6).and_then(json_text),
            film_number: cell(7).and_then(json_i64),
            items: cell(8).and_then(json_text),
            size: cell(9).and_then(json_i64),
            is_xbrl: cell(10).and_then(json_i64),
            is_inline_xbrl: cell(11).and_then(json_i64),
            primary_document: cell(12).and_then(json_text),
            primary_doc_description: cell(13).and_then(json_text),
        });
    }
    out
}

/// Parse `acceptanceDateTime`: RFC 3339 (`Z` or offset, normalized to UTC)
/// or a naive `YYYY-MM-DDTHH:MM:SS[.fff]`.
pub fn parse_acceptance(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Read and flatten one submissions file. The CIK comes from the filename.
pub fn read_submissions_file(path: &Path) -> Result<(Cik, SubmissionsExtract)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let cik = cik_from_filename(&name, FileKind::Submissions)
        .with_context(|| format!("Not a submissions filename: {}", name))?;
    let doc = read_json(path)?;
    Ok((cik, extract_submissions(&doc, cik)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn zips_columns_to_longest_array() {
        let doc = json!({
            "cik": "320193",
            "filings": {
                "recent": {
                    "accessionNumber": ["0000320193-24-000001", "0000320193-24-000002", "0000320193-24-000003"],
                    "filingDate": ["2024-01-02", "2024-02-01", "2024-03-01"],
                    "acceptanceDateTime": ["2024-01-02T16:30:01.000Z", "2024-02-01T18:01:14.000Z", "2024-03-01T06:00:00-05:00"],
                    "form": ["10-K", "8-K"],
                    "size": [1234, "5678", 9],
                    "isXBRL": [1, 0, true],
                    "reportDate": ["2023-12-30", "", null],
                    "filmNumber": ["241234567"]
                }
            }
        });
        let out = extract_submissions(&doc, Cik::new(320193));
        assert_eq!(out.filings.len(), 3);
        assert_eq!(out.dropped, 0);

        let first = &out.filings[0];
        assert_eq!(first.cik, "0000320193");
        assert_eq!(first.film_number, Some(241234567));
        assert_eq!(first.report_date, NaiveDate::from_ymd_opt(2023, 12, 30));

        let third = &out.filings[2];
        assert_eq!(third.form, None);
        assert_eq!(third.size, Some(9));
        assert_eq!(third.is_xbrl, Some(1));
        assert_eq!(third.report_date, None);
        assert_eq!(
            third.acceptance_datetime,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(11, 0, 0).unwrap()
        );
        assert_eq!(out.filings[1].size, Some(5678));
    }

    #[test]
    fn paged_files_use_top_level_arrays_and_drop_incomplete_rows() {
        let doc = json!({
            "accessionNumber": ["0000001800-01-000001", "0000001800-01-000002", null],
            "filingDate": ["2001-05-01", "2001-06-01", "2001-07-01"],
            "acceptanceDateTime": ["2001-05-01T12:00:00", "", "2001-07-01T12:00:00"]
        });
        let out = extract_submissions(&doc, Cik::new(1800));
        assert_eq!(out.filings.len(), 1);
        assert_eq!(out.dropped, 2);
        assert_eq!(out.filings[0].cik, "0000001800");
    }

    #[test]
    fn unknown_shape_yields_nothing() {
        let out = extract_submissions(&json!({"name": "x"}), Cik::new(1));
        assert!(out.filings.is_empty());
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn acceptance_formats() {
        assert!(parse_acceptance("2024-01-02T16:30:01.000Z").is_some());
        assert!(parse_acceptance("2024-01-02T16:30:01").is_some());
        assert!(parse_acceptance("2024-01-02 16:30:01").is_some());
        assert!(parse_acceptance("yesterday").is_none());
    }
}
