//! Flat record types that flow through the normalization and load pipeline.
//!
//! Each struct mirrors one target table (or one normalized CSV layout).
//! Dates are carried as `chrono` types and rendered as ISO text on write.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One row of the merged, normalized OHLC CSV.
///
/// Price and volume fields are kept verbatim from the source file; they are
/// only parsed when loaded into the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcRow {
    #[serde(rename = "Ticker")]
    pub ticker: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Open")]
    pub open: String,
    #[serde(rename = "High")]
    pub high: String,
    #[serde(rename = "Low")]
    pub low: String,
    #[serde(rename = "Close")]
    pub close: String,
    #[serde(rename = "Volume")]
    pub volume: String,
}

/// Column header of the normalized OHLC output, in order.
pub const OHLC_COLUMNS: [&str; 7] = ["Ticker", "Date", "Open", "High", "Low", "Close", "Volume"];

/// Typed OHLC record for `sp500_stooq_ohcl`.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Constituent row for `sp500_wik_list`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sp500Company {
    pub symbol: String,
    pub date_added: NaiveDate,
    pub security: Option<String>,
    pub gics_sector: Option<String>,
    pub gics_sub_ind: Option<String>,
    pub headquarters_loc: Option<String>,
    pub cik: Option<String>,
    pub founded: Option<String>,
}

/// Index membership change for `selected_changes_sp500`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentChange {
    pub effective_date: NaiveDate,
    pub added_ticker: String,
    pub added_security: Option<String>,
    pub removed_ticker: String,
    pub removed_security: Option<String>,
    pub reason: Option<String>,
}

/// News item for `sp500_finnhub_news`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsArticle {
    pub symbol: String,
    pub news_id: String,
    pub datetime: NaiveDateTime,
    pub headline: Option<String>,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub related: Option<String>,
    pub category: Option<String>,
}

/// Dividend or split for `sp500_corporate_actions`.
#[derive(Debug, Clone, PartialEq)]
pub struct CorporateAction {
    pub symbol: String,
    pub event_type: String,
    pub ex_date: Option<NaiveDate>,
    pub record_date: Option<NaiveDate>,
    pub pay_date: Option<NaiveDate>,
    pub ratio: Option<String>,
    pub cash_amount: Option<f64>,
}

/// One XBRL data point for `bronze_sec_facts`.
#[derive(Debug, Clone, PartialEq)]
pub struct SecFact {
    pub cik: String,
    pub taxonomy: String,
    pub tag: String,
    pub unit: String,
    pub val: f64,
    pub fy: Option<i64>,
    pub fp: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub frame: Option<String>,
    pub form: Option<String>,
    pub filed: Option<NaiveDate>,
    pub accn: Option<String>,
}

/// Label and description of a taxonomy tag for `bronze_sec_facts_dict`.
#[derive(Debug, Clone, PartialEq)]
pub struct SecFactDictEntry {
    pub taxonomy: String,
    pub tag: String,
    pub label: Option<String>,
    pub description: Option<String>,
}

/// One filing for `bronze_sec_submissions`.
#[derive(Debug, Clone, PartialEq)]
pub struct SecSubmission {
    pub cik: String,
    pub accession_number: String,
    pub filing_date: NaiveDate,
    pub acceptance_datetime: NaiveDateTime,
    pub report_date: Option<NaiveDate>,
    pub act: Option<String>,
    pub form: Option<String>,
    pub file_number: Option<String>,
    pub film_number: Option<i64>,
    pub items: Option<String>,
    pub size: Option<i64>,
    pub is_xbrl: Option<i64>,
    pub is_inline_xbrl: Option<i64>,
    pub primary_document: Option<String>,
    pub primary_doc_description: Option<String>,
}

/// ISO `YYYY-MM-DD` text for an optional date column.
pub fn date_text(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%Y-%m-%d").to_string())
}

/// ISO `YYYY-MM-DD HH:MM:SS` text for a date-time column.
pub fn datetime_text(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
