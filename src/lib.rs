//! # S&P 500 Harness
//!
//! Data-engineering glue for an S&P 500 analytics database.
//!
//! The harness prepares raw datasets (Stooq daily prices, SEC EDGAR bulk
//! JSON, Wikipedia and Finnhub CSV exports), loads them into SQLite tables,
//! and relays natural-language questions from a chat UI to an LLM that
//! answers them with SQL over those tables.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Raw files   │──▶│  Normalize   │──▶│  SQLite   │
//! │ Stooq/EDGAR │   │ Copy / Load  │   │  tables   │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │  (spx)   │        │  (/ask)  │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! spx db init                                  # create tables
//! spx normalize ohlc --start-date 2021-01-01   # merge Stooq files
//! spx load ohlc --input data/normalised_data/normalized_sp500_data.csv
//! spx pipeline sec-facts                       # load company facts
//! spx serve                                    # start the chat API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Table catalog and DDL |
//! | [`models`] | Row types |
//! | [`scan`] | Directory listing and file manifests |
//! | [`ohlc`] | Stooq OHLC normalization with date filtering |
//! | [`cik`] | CIK parsing and filename matching |
//! | [`cik_copy`] | Copy EDGAR files for reference CIKs |
//! | [`sec_facts`] | Company-facts JSON extraction |
//! | [`sec_submissions`] | Submissions JSON extraction |
//! | [`load`] | CSV cleaning and batched table loads |
//! | [`ingest_sec`] | SEC JSON directory loads with retry |
//! | [`pipeline`] | Scheduler task bodies |
//! | [`progress`] | Progress reporting on stderr |
//! | [`stats`] | Row counts and database size |
//! | [`llm`] | Chat-completion provider abstraction |
//! | [`sql_guard`] | Read-only SQL validation |
//! | [`chat`] | Question → SQL → rows → reply relay |
//! | [`server`] | Chat API HTTP server |
//! | [`logging`] | Tracing subscriber setup |

pub mod chat;
pub mod cik;
pub mod cik_copy;
pub mod config;
pub mod db;
pub mod ingest_sec;
pub mod llm;
pub mod load;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod ohlc;
pub mod pipeline;
pub mod progress;
pub mod scan;
pub mod sec_facts;
pub mod sec_submissions;
pub mod server;
pub mod sql_guard;
pub mod stats;
