//! Copy EDGAR bulk files whose CIK is in the S&P 500 reference list.
//!
//! The EDGAR bulk archives hold files for every registrant (hundreds of
//! thousands of submissions files). These commands select the subset
//! belonging to index constituents and copy it into the pipeline's working
//! directories. A file is copied iff the CIK extracted from its name is in
//! the reference list; per-file copy errors are counted and logged.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::cik::{cik_from_filename, Cik, FileKind};
use crate::progress::{ProgressEvent, ProgressReporter};

/// How many missing CIKs the summary lists before eliding the rest.
const MISSING_PREVIEW: usize = 10;

/// Outcome of a copy run.
#[derive(Debug, Default)]
pub struct CopySummary {
    /// Destination paths of successfully copied files.
    pub copied: Vec<PathBuf>,
    /// Files whose CIK matched but whose copy failed.
    pub failed: usize,
    /// Directory entries examined.
    pub scanned: usize,
    /// Reference CIKs with at least one matching file.
    pub found: BTreeSet<Cik>,
    /// Reference CIKs with no matching file, in reference-list order.
    pub missing: Vec<Cik>,
    /// Size of the reference list.
    pub total_ciks: usize,
}

impl CopySummary {
    pub fn print(&self, label: &str) {
        println!("{} copy complete:", label);
        println!("  files scanned: {}", self.scanned);
        println!("  files copied:  {}", self.copied.len());
        println!("  copy errors:   {}", self.failed);
        println!("  CIKs found:    {}/{}", self.found.len(), self.total_ciks);
        if !self.missing.is_empty() {
            println!("  missing CIKs ({}):", self.missing.len());
            for cik in self.missing.iter().take(MISSING_PREVIEW) {
                println!("    - {}", cik.padded());
            }
            if self.missing.len() > MISSING_PREVIEW {
                println!("    ... and {} more", self.missing.len() - MISSING_PREVIEW);
            }
        }
    }
}

/// Copy `CIK##########.json` company-facts files for every reference CIK.
pub fn copy_company_facts(
    source: &Path,
    dest: &Path,
    ciks: &[Cik],
    progress: &dyn ProgressReporter,
) -> Result<CopySummary> {
    let entries = list_source(source)?;
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    progress.report(ProgressEvent::Stage {
        task: "copy company-facts".to_string(),
        stage: "matching".to_string(),
    });

    let wanted: HashSet<Cik> = ciks.iter().copied().collect();
    let mut summary = CopySummary {
        total_ciks: ciks.len(),
        ..Default::default()
    };
    copy_batch(
        source,
        dest,
        &entries,
        FileKind::CompanyFacts,
        &wanted,
        &mut summary,
    );
    summary.missing = missing_ciks(ciks, &summary.found);
    Ok(summary)
}

/// Copy submission files for every reference CIK, `batch_size` directory
/// entries at a time.
pub fn copy_submissions(
    source: &Path,
    dest: &Path,
    ciks: &[Cik],
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<CopySummary> {
    if batch_size == 0 {
        bail!("batch_size must be > 0");
    }
    let entries = list_source(source)?;
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let total_batches = entries.len().div_ceil(batch_size);
    tracing::info!(
        files = entries.len(),
        batches = total_batches,
        batch_size,
        "copying submission files"
    );

    let wanted: HashSet<Cik> = ciks.iter().copied().collect();
    let mut summary = CopySummary {
        total_ciks: ciks.len(),
        ..Default::default()
    };

    for (i, batch) in entries.chunks(batch_size).enumerate() {
        let before = summary.copied.len();
        copy_batch(
            source,
            dest,
            batch,
            FileKind::Submissions,
            &wanted,
            &mut summary,
        );
        tracing::debug!(
            batch = i + 1,
            copied = summary.copied.len() - before,
            "batch complete"
        );
        progress.report(ProgressEvent::Advance {
            task: "copy submissions".to_string(),
            n: (i + 1) as u64,
            total: total_batches as u64,
            unit: "batches",
        });
    }

    summary.missing = missing_ciks(ciks, &summary.found);
    Ok(summary)
}

fn list_source(source: &Path) -> Result<Vec<String>> {
    if !source.is_dir() {
        bail!("Data source folder does not exist: {}", source.display());
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn copy_batch(
    source: &Path,
    dest: &Path,
    names: &[String],
    kind: FileKind,
    wanted: &HashSet<Cik>,
    summary: &mut CopySummary,
) {
    for name in names {
        summary.scanned += 1;
        let Some(cik) = cik_from_filename(name, kind) else {
            continue;
        };
        if !wanted.contains(&cik) {
            continue;
        }
        let target = dest.join(name);
        match std::fs::copy(source.join(name), &target) {
            Ok(_) => {
                summary.found.insert(cik);
                summary.copied.push(target);
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "copy failed");
                summary.failed += 1;
            }
        }
    }
}

fn missing_ciks(ciks: &[Cik], found: &BTreeSet<Cik>) -> Vec<Cik> {
    let mut seen = HashSet::new();
    ciks.iter()
        .filter(|c| !found.contains(c) && seen.insert(**c))
        .copied()
        .collect()
}
