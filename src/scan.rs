use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the manifest written by the OHLC pipeline's first step.
pub const MANIFEST_FILE: &str = "file_names.csv";

/// List regular files directly inside `dir` whose names match `include_globs`.
///
/// Hidden files (leading `.`) are skipped. Names are returned sorted so
/// every run processes files in the same order.
pub fn list_file_names(dir: &Path, include_globs: &[String]) -> Result<Vec<String>> {
    if !dir.is_dir() {
        bail!("Input directory does not exist: {}", dir.display());
    }

    let include_set = build_globset(include_globs)?;
    let mut names = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if !include_set.is_match(&name) {
            continue;
        }
        names.push(name);
    }

    names.sort();
    Ok(names)
}

/// List `*.json` files directly inside `dir`, sorted by name.
pub fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let names = list_file_names(dir, &["*.json".to_string()])?;
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

/// Write a one-column `file_name` CSV listing `names`.
pub fn write_manifest(names: &[String], out_dir: &Path, file: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let path = out_dir.join(file);
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer.write_record(["file_name"])?;
    for name in names {
        writer.write_record([name])?;
    }
    writer.flush()?;
    Ok(path)
}

/// Read back a manifest written by [`write_manifest`].
pub fn read_manifest(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        bail!(
            "File names manifest not found: {} (run the scan step first)",
            path.display()
        );
    }
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let idx = headers
        .iter()
        .position(|h| h == "file_name")
        .ok_or_else(|| anyhow::anyhow!("{} has no file_name column", path.display()))?;

    let mut names = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(name) = record.get(idx) {
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
