//! # S&P 500 Harness CLI (`spx`)
//!
//! The `spx` binary drives the data-engineering glue: normalizing Stooq
//! price files, selecting EDGAR bulk files for index constituents, loading
//! CSV and JSON datasets into SQLite, and serving the chat API.
//!
//! ## Usage
//!
//! ```bash
//! spx --config ./config/spx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `spx db init` | Create every table (idempotent) |
//! | `spx db tables` | List the table catalog |
//! | `spx normalize ohlc` | Merge Stooq files into one normalized CSV |
//! | `spx copy company-facts` | Copy constituent company-facts JSON files |
//! | `spx copy submissions` | Copy constituent submissions JSON files |
//! | `spx load <target>` | Load a CSV into its table |
//! | `spx pipeline <task>` | Run a scheduler task end to end |
//! | `spx serve` | Start the chat API |
//! | `spx stats` | Row counts and database size |
//!
//! ## Examples
//!
//! ```bash
//! # Normalize 2021 prices only
//! spx normalize ohlc --start-date 2021-01-01 --end-date 2021-12-31
//!
//! # Select constituent submissions from an EDGAR bulk extract
//! spx copy submissions --source ~/edgar/submissions
//!
//! # Load the Wikipedia constituent list and check the row count
//! spx load wiki-list --input data/sp500_wik_list.csv --verify
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sp500_harness::cik;
use sp500_harness::cik_copy;
use sp500_harness::config;
use sp500_harness::db;
use sp500_harness::ingest_sec::SecKind;
use sp500_harness::load::{self, LoadOptions, LoadTarget};
use sp500_harness::logging;
use sp500_harness::migrate;
use sp500_harness::ohlc::{self, NormalizeOptions};
use sp500_harness::pipeline;
use sp500_harness::progress::ProgressMode;
use sp500_harness::server;
use sp500_harness::stats;

/// S&P 500 Harness CLI: normalize, load, and query S&P 500 market and SEC
/// filing data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/spx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "spx",
    about = "S&P 500 Harness: normalize, load, and query S&P 500 market and SEC filing data",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/spx.toml")]
    config: PathBuf,

    /// Emit diagnostic logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Progress output on stderr: `auto`, `human`, `json`, or `off`.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage database tables.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Normalize raw datasets.
    Normalize {
        #[command(subcommand)]
        dataset: NormalizeDataset,
    },

    /// Copy EDGAR bulk files whose CIK is in the reference list.
    Copy {
        #[command(subcommand)]
        kind: CopyKind,
    },

    /// Load a CSV file into its table.
    ///
    /// Targets: `ohlc`, `wiki-list`, `changes`, `news`, `corporate-actions`.
    /// Reloading the same file does not duplicate rows.
    Load {
        /// Dataset to load.
        target: String,

        /// Input CSV file.
        #[arg(long)]
        input: PathBuf,

        /// Rows per transaction. Defaults to `[load].batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Load only the first rows (1000 for OHLC, one batch otherwise).
        #[arg(long)]
        test_mode: bool,

        /// Compare the table row count with the inserted count afterwards.
        #[arg(long)]
        verify: bool,
    },

    /// Run a scheduler task: scan → extract → validate → report.
    ///
    /// Exits non-zero when the task fails.
    Pipeline {
        #[command(subcommand)]
        task: PipelineTask,
    },

    /// Start the chat API server.
    ///
    /// Binds to `[server].bind`. Without an LLM API key, `/ask` answers
    /// with the offline reply.
    Serve,

    /// Show row counts per table and the database size.
    Stats,
}

#[derive(Subcommand)]
enum DbAction {
    /// Create every table. Safe to run repeatedly.
    Init,
    /// Create one table.
    CreateTable { name: String },
    /// Drop one table.
    DropTable {
        name: String,
        /// Confirm the drop.
        #[arg(long)]
        yes: bool,
    },
    /// Delete every row of one table.
    ClearTable {
        name: String,
        /// Confirm the delete.
        #[arg(long)]
        yes: bool,
    },
    /// List the table catalog.
    Tables,
    /// Show row counts per table and the database size.
    Stats,
}

#[derive(Subcommand)]
enum NormalizeDataset {
    /// Merge Stooq daily files into `normalized_sp500_data.csv`.
    Ohlc {
        #[command(flatten)]
        args: NormalizeArgs,
    },
}

#[derive(clap::Args, Clone)]
struct NormalizeArgs {
    /// Directory of Stooq files. Defaults to `[paths].ohlc_dir`.
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Output directory. Defaults to `[paths].normalized_dir`.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// First date to keep (YYYY-MM-DD, inclusive).
    #[arg(long)]
    start_date: Option<String>,

    /// Last date to keep (YYYY-MM-DD, inclusive).
    #[arg(long)]
    end_date: Option<String>,

    /// Files per output flush. Defaults to `[normalize].batch_size`.
    #[arg(long)]
    batch_size: Option<usize>,
}

impl From<NormalizeArgs> for NormalizeOptions {
    fn from(a: NormalizeArgs) -> Self {
        NormalizeOptions {
            input_dir: a.input_dir,
            output_dir: a.output_dir,
            start_date: a.start_date,
            end_date: a.end_date,
            batch_size: a.batch_size,
        }
    }
}

#[derive(Subcommand)]
enum CopyKind {
    /// Copy `CIK##########.json` company-facts files.
    CompanyFacts {
        #[command(flatten)]
        args: CopyArgs,
    },
    /// Copy submissions files, processing the source in batches.
    Submissions {
        #[command(flatten)]
        args: CopyArgs,

        /// Directory entries per batch. Defaults to `[normalize].copy_batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(clap::Args)]
struct CopyArgs {
    /// Directory holding the EDGAR bulk extract.
    #[arg(long)]
    source: PathBuf,

    /// Destination directory. Defaults to the configured pipeline directory.
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Reference CSV with a `CIK` column. Defaults to `[paths].sp500_list`.
    #[arg(long)]
    ciks: Option<PathBuf>,
}

#[derive(Subcommand)]
enum PipelineTask {
    /// Load company-facts JSON into the bronze facts tables.
    SecFacts {
        /// JSON directory. Defaults to `[paths].company_facts_dir`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Load submissions JSON into the bronze submissions table.
    SecSubmissions {
        /// JSON directory. Defaults to `[paths].submissions_dir`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Normalize Stooq files, then load them into the OHLC table.
    Ohlc {
        #[command(flatten)]
        args: NormalizeArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json);
    let progress = ProgressMode::from_flag(&cli.progress)?.reporter();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Db { action } => match action {
            DbAction::Init => {
                migrate::run_migrations(&cfg).await?;
                println!("Database initialized successfully.");
            }
            DbAction::CreateTable { name } => {
                let pool = db::connect(&cfg).await?;
                migrate::create_table(&pool, &name).await?;
                println!("Table '{}' created.", name);
            }
            DbAction::DropTable { name, yes } => {
                migrate::find_table(&name)?;
                if !yes {
                    anyhow::bail!("Refusing to drop '{}' without --yes", name);
                }
                let pool = db::connect(&cfg).await?;
                migrate::drop_table(&pool, &name).await?;
                println!("Table '{}' dropped.", name);
            }
            DbAction::ClearTable { name, yes } => {
                migrate::find_table(&name)?;
                if !yes {
                    anyhow::bail!("Refusing to clear '{}' without --yes", name);
                }
                let pool = db::connect(&cfg).await?;
                let removed = migrate::clear_table(&pool, &name).await?;
                println!("Table '{}' cleared ({} rows deleted).", name, removed);
            }
            DbAction::Tables => migrate::list_tables(),
            DbAction::Stats => stats::run_stats(&cfg).await?,
        },
        Commands::Normalize { dataset } => match dataset {
            NormalizeDataset::Ohlc { args } => {
                let summary = ohlc::run_normalize(&cfg, &args.into(), progress.as_ref())?;
                summary.print();
            }
        },
        Commands::Copy { kind } => {
            let (args, label) = match &kind {
                CopyKind::CompanyFacts { args } => (args, "company-facts"),
                CopyKind::Submissions { args, .. } => (args, "submissions"),
            };
            let list = args.ciks.as_deref().unwrap_or(&cfg.paths.sp500_list);
            let ciks = cik::load_reference_ciks(list)?;
            tracing::info!(ciks = ciks.len(), list = %list.display(), "loaded reference CIKs");

            let summary = match &kind {
                CopyKind::CompanyFacts { args } => {
                    let dest = args.dest.as_deref().unwrap_or(&cfg.paths.company_facts_dir);
                    cik_copy::copy_company_facts(&args.source, dest, &ciks, progress.as_ref())?
                }
                CopyKind::Submissions { args, batch_size } => {
                    let dest = args.dest.as_deref().unwrap_or(&cfg.paths.submissions_dir);
                    let batch = batch_size.unwrap_or(cfg.normalize.copy_batch_size);
                    cik_copy::copy_submissions(
                        &args.source,
                        dest,
                        &ciks,
                        batch,
                        progress.as_ref(),
                    )?
                }
            };
            summary.print(label);
        }
        Commands::Load {
            target,
            input,
            batch_size,
            test_mode,
            verify,
        } => {
            let target = LoadTarget::from_name(&target)?;
            let opts = LoadOptions {
                batch_size: batch_size.unwrap_or(cfg.load.batch_size),
                test_mode,
                verify,
            };
            let pool = db::connect(&cfg).await?;
            let summary =
                load::load_csv(&pool, target, &input, &opts, progress.as_ref()).await?;
            summary.print();
        }
        Commands::Pipeline { task } => {
            let pool = db::connect(&cfg).await?;
            let ok = match task {
                PipelineTask::SecFacts { dir } => {
                    let report = pipeline::run_sec(
                        &cfg,
                        &pool,
                        SecKind::Facts,
                        dir.as_deref(),
                        progress.as_ref(),
                    )
                    .await?;
                    report.print();
                    report.succeeded()
                }
                PipelineTask::SecSubmissions { dir } => {
                    let report = pipeline::run_sec(
                        &cfg,
                        &pool,
                        SecKind::Submissions,
                        dir.as_deref(),
                        progress.as_ref(),
                    )
                    .await?;
                    report.print();
                    report.succeeded()
                }
                PipelineTask::Ohlc { args } => {
                    let report =
                        pipeline::run_ohlc(&cfg, &pool, &args.into(), progress.as_ref()).await?;
                    report.print();
                    report.succeeded()
                }
            };
            pool.close().await;
            if !ok {
                anyhow::bail!("pipeline task failed");
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
