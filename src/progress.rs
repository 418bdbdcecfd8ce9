//! Pipeline progress reporting.
//!
//! Long-running commands (`spx normalize`, `spx copy`, `spx load`, `spx pipeline`)
//! report which stage they are in and how far along they are. Progress is
//! emitted on **stderr** so stdout remains parseable for schedulers that grep
//! the final summary.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A task entered a new stage (scan, extract, load...). Total unknown.
    Stage { task: String, stage: String },
    /// `n` of `total` units (files, rows, batches) processed.
    Advance {
        task: String,
        n: u64,
        total: u64,
        unit: &'static str,
    },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "load sp500_stooq_ohcl  12,000 / 50,000 rows".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Stage { task, stage } => format!("{}  {}...\n", task, stage),
            ProgressEvent::Advance {
                task,
                n,
                total,
                unit,
            } => format!(
                "{}  {} / {} {}\n",
                task,
                format_number(*n),
                format_number(*total),
                unit
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Stage { task, stage } => serde_json::json!({
                "event": "progress",
                "task": task,
                "stage": stage
            }),
            ProgressEvent::Advance {
                task,
                n,
                total,
                unit,
            } => serde_json::json!({
                "event": "progress",
                "task": task,
                "n": n,
                "total": total,
                "unit": unit
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Format an integer with thousands separators (`1234567` → `1,234,567`).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Resolve the `--progress` flag value (`auto`, `human`, `json`, `off`).
    pub fn from_flag(flag: &str) -> anyhow::Result<Self> {
        match flag {
            "auto" => Ok(Self::default_for_tty()),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            "off" => Ok(ProgressMode::Off),
            other => anyhow::bail!(
                "Unknown progress mode: '{}'. Must be auto, human, json or off.",
                other
            ),
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_flag_parsing() {
        assert_eq!(ProgressMode::from_flag("json").unwrap(), ProgressMode::Json);
        assert_eq!(ProgressMode::from_flag("off").unwrap(), ProgressMode::Off);
        assert!(ProgressMode::from_flag("loud").is_err());
    }
}
