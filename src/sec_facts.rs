//! SEC company-facts JSON normalization.
//!
//! A company-facts file (`CIK##########.json`) nests XBRL data points as
//! `facts.<taxonomy>.<tag>.units.<unit>[]`. Flattening yields one dictionary
//! entry per (taxonomy, tag) and one fact per data point.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::path::Path;

use crate::cik::{cik_from_filename, Cik, FileKind};
use crate::models::{SecFact, SecFactDictEntry};

/// Everything extracted from one company-facts document.
#[derive(Debug, Default)]
pub struct FactsExtract {
    pub dict: Vec<SecFactDictEntry>,
    pub facts: Vec<SecFact>,
    /// Data points dropped because `val` was absent or not numeric.
    pub skipped: usize,
}

/// Flatten a parsed company-facts document.
pub fn extract_facts(doc: &Value, cik: Cik) -> FactsExtract {
    let mut out = FactsExtract::default();
    let cik_text = cik.prefixed();

    let Some(taxonomies) = doc.get("facts").and_then(Value::as_object) else {
        return out;
    };

    for (taxonomy, tags) in taxonomies {
        let Some(tags) = tags.as_object() else {
            continue;
        };
        for (tag, tag_data) in tags {
            let Some(tag_data) = tag_data.as_object() else {
                continue;
            };
            out.dict.push(SecFactDictEntry {
                taxonomy: taxonomy.clone(),
                tag: tag.clone(),
                label: tag_data.get("label").and_then(json_text),
                description: tag_data.get("description").and_then(json_text),
            });

            let Some(units) = tag_data.get("units").and_then(Value::as_object) else {
                continue;
            };
            for (unit, points) in units {
                let Some(points) = points.as_array() else {
                    continue;
                };
                for point in points {
                    let Some(val) = point.get("val").and_then(json_f64) else {
                        out.skipped += 1;
                        continue;
                    };
                    out.facts.push(SecFact {
                        cik: cik_text.clone(),
                        taxonomy: taxonomy.clone(),
                        tag: tag.clone(),
                        unit: unit.clone(),
                        val,
                        fy: point.get("fy").and_then(json_i64),
                        fp: point.get("fp").and_then(json_text),
                        start_date: point.get("start").and_then(json_date),
                        end_date: point.get("end").and_then(json_date),
                        frame: point.get("frame").and_then(json_text),
                        form: point.get("form").and_then(json_text),
                        filed: point.get("filed").and_then(json_date),
                        accn: point.get("accn").and_then(json_text),
                    });
                }
            }
        }
    }
    out
}

/// Read and flatten one company-facts file. The CIK comes from the filename.
pub fn read_facts_file(path: &Path) -> Result<(Cik, FactsExtract)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let cik = cik_from_filename(&name, FileKind::CompanyFacts)
        .with_context(|| format!("Not a company-facts filename: {}", name))?;
    let doc = read_json(path)?;
    Ok((cik, extract_facts(&doc, cik)))
}

pub(crate) fn read_json(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Non-empty string, or a number rendered as text.
pub(crate) fn json_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Finite float from a number or numeric string. `NaN` and infinities are
/// rejected since SQLite stores a NaN as NULL.
pub(crate) fn json_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

/// Integer from a number, numeric string or boolean.
pub(crate) fn json_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub(crate) fn json_date(v: &Value) -> Option<NaiveDate> {
    v.as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "cik": 320193,
            "entityName": "Apple Inc.",
            "facts": {
                "dei": {
                    "EntityCommonStockSharesOutstanding": {
                        "label": "Entity Common Stock, Shares Outstanding",
                        "description": "Shares outstanding",
                        "units": {
                            "shares": [
                                {"end": "2009-10-16", "val": 895816758, "accn": "0001193125-09-214859",
                                 "fy": 2009, "fp": "FY", "form": "10-K", "filed": "2009-10-27", "frame": "CY2009Q3I"},
                                {"end": "2010-01-15", "val": "906794105", "fy": "2010", "fp": "Q1",
                                 "form": "10-Q", "filed": "not-a-date"},
                                {"end": "2010-04-09", "fy": 2010}
                            ]
                        }
                    }
                },
                "us-gaap": {
                    "Revenues": {
                        "label": "Revenues",
                        "units": {
                            "USD": [
                                {"start": "2020-09-27", "end": "2021-09-25", "val": 365817000000.0, "fy": 2021}
                            ]
                        }
                    },
                    "Broken": "not an object"
                }
            }
        })
    }

    #[test]
    fn flattens_taxonomy_tag_unit_points() {
        let out = extract_facts(&sample(), Cik::new(320193));
        assert_eq!(out.dict.len(), 2);
        assert_eq!(out.facts.len(), 3);
        assert_eq!(out.skipped, 1);

        let first = &out.facts[0];
        assert_eq!(first.cik, "CIK0000320193");
        assert_eq!(first.taxonomy, "dei");
        assert_eq!(first.unit, "shares");
        assert_eq!(first.val, 895816758.0);
        assert_eq!(first.fy, Some(2009));
        assert_eq!(first.filed, NaiveDate::from_ymd_opt(2009, 10, 27));
        assert_eq!(first.start_date, None);

        let second = &out.facts[1];
        assert_eq!(second.val, 906794105.0);
        assert_eq!(second.fy, Some(2010));
        assert_eq!(second.filed, None);

        let revenues = out.dict.iter().find(|d| d.tag == "Revenues").unwrap();
        assert_eq!(revenues.description, None);
    }

    #[test]
    fn non_finite_values_skip_only_that_point() {
        let doc = json!({
            "facts": {"us-gaap": {"Assets": {"units": {"USD": [
                {"end": "2021-09-25", "val": 1.0},
                {"end": "2021-12-25", "val": "NaN"},
                {"end": "2022-03-26", "val": "inf"},
                {"end": "2022-06-25", "val": " 2.5 "}
            ]}}}}
        });
        let out = extract_facts(&doc, Cik::new(320193));
        let vals: Vec<f64> = out.facts.iter().map(|f| f.val).collect();
        assert_eq!(vals, vec![1.0, 2.5]);
        assert_eq!(out.skipped, 2);
    }

    #[test]
    fn document_without_facts_is_empty() {
        let out = extract_facts(&json!({"cik": 1}), Cik::new(1));
        assert!(out.dict.is_empty());
        assert!(out.facts.is_empty());
    }

    #[test]
    fn read_file_takes_cik_from_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("CIK0000320193.json");
        std::fs::write(&path, sample().to_string()).unwrap();
        let (cik, out) = read_facts_file(&path).unwrap();
        assert_eq!(cik, Cik::new(320193));
        assert_eq!(out.facts.len(), 3);

        let other = tmp.path().join("facts.json");
        std::fs::write(&other, "{}").unwrap();
        assert!(read_facts_file(&other).is_err());
    }
}
