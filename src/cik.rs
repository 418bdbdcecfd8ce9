//! SEC Central Index Key handling.
//!
//! A CIK shows up in three spellings across the inputs: bare digits from the
//! constituent list (`320193`), ten-digit padded in submission records
//! (`0000320193`), and `CIK`-prefixed in EDGAR bulk filenames
//! (`CIK0000320193.json`). [`Cik`] keeps the numeric value and renders
//! whichever form a caller needs.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// A SEC Central Index Key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cik(u64);

impl Cik {
    pub fn new(value: u64) -> Self {
        Cik(value)
    }

    /// Parse any of the accepted spellings. A fractional part is dropped and
    /// other non-digit characters are stripped, so `CIK0000320193`,
    /// `0000320193` and `320193.00` all parse.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let whole = match trimmed.split_once('.') {
            Some((whole, frac)) if frac.bytes().all(|b| b == b'0') => whole,
            Some(_) => return None,
            None => trimmed,
        };
        let digits: String = whole.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() || digits.len() > 10 {
            return None;
        }
        digits.parse().ok().map(Cik)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Ten-digit zero-padded form, e.g. `0000320193`.
    pub fn padded(&self) -> String {
        format!("{:010}", self.0)
    }

    /// `CIK`-prefixed form, e.g. `CIK0000320193`.
    pub fn prefixed(&self) -> String {
        format!("CIK{:010}", self.0)
    }
}

impl fmt::Display for Cik {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefixed())
    }
}

/// The two EDGAR bulk file families the copy commands handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// `CIK##########.json`
    CompanyFacts,
    /// `CIK##########`, `CIK##########-submissions-…` or `CIK##########.…`
    Submissions,
}

/// Extract the CIK from an EDGAR bulk filename, or `None` when the name does
/// not follow the naming rule for `kind`.
pub fn cik_from_filename(name: &str, kind: FileKind) -> Option<Cik> {
    let rest = name.strip_prefix("CIK")?;
    let digits = rest.get(..10)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let tail = &rest[10..];

    let matches = match kind {
        FileKind::CompanyFacts => tail == ".json",
        FileKind::Submissions => {
            tail.is_empty() || tail.starts_with("-submissions-") || tail.starts_with('.')
        }
    };
    if !matches {
        return None;
    }
    digits.parse().ok().map(Cik)
}

/// Load the reference CIK list from the `CIK` column of a constituent CSV.
///
/// The file is decoded as Latin-1, so Wikipedia exports with stray non-UTF-8
/// bytes still load. Blank or unparseable entries are skipped and duplicates
/// are dropped, keeping first-seen order.
pub fn load_reference_ciks(path: &Path) -> Result<Vec<Cik>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CIK list: {}", path.display()))?;

    let headers: Vec<String> = reader.byte_headers()?.iter().map(latin1).collect();
    let idx = match headers.iter().position(|h| h.trim() == "CIK") {
        Some(i) => i,
        None => bail!(
            "{} has no CIK column (found: {})",
            path.display(),
            headers.join(", ")
        ),
    };

    let mut seen = HashSet::new();
    let mut ciks = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let Some(field) = record.get(idx) else {
            continue;
        };
        if let Some(cik) = Cik::parse(&latin1(field)) {
            if seen.insert(cik) {
                ciks.push(cik);
            }
        }
    }
    Ok(ciks)
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
