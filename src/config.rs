use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Fixed input/output locations used by the pipeline commands.
///
/// Every path can be overridden per command with a CLI flag.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_ohlc_dir")]
    pub ohlc_dir: PathBuf,
    #[serde(default = "default_normalized_dir")]
    pub normalized_dir: PathBuf,
    #[serde(default = "default_sp500_list")]
    pub sp500_list: PathBuf,
    #[serde(default = "default_company_facts_dir")]
    pub company_facts_dir: PathBuf,
    #[serde(default = "default_submissions_dir")]
    pub submissions_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ohlc_dir: default_ohlc_dir(),
            normalized_dir: default_normalized_dir(),
            sp500_list: default_sp500_list(),
            company_facts_dir: default_company_facts_dir(),
            submissions_dir: default_submissions_dir(),
        }
    }
}

fn default_ohlc_dir() -> PathBuf {
    PathBuf::from("./data/sp500_ohcl")
}
fn default_normalized_dir() -> PathBuf {
    PathBuf::from("./data/normalised_data")
}
fn default_sp500_list() -> PathBuf {
    PathBuf::from("./data/S_and_P_500_component_stocks.csv")
}
fn default_company_facts_dir() -> PathBuf {
    PathBuf::from("./data/company_facts")
}
fn default_submissions_dir() -> PathBuf {
    PathBuf::from("./data/submissions_facts")
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizeConfig {
    /// Number of input files whose rows are flushed to the output together.
    #[serde(default = "default_normalize_batch")]
    pub batch_size: usize,
    #[serde(default = "default_ohlc_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Batch size for submission-file copies (directory entries per batch).
    #[serde(default = "default_copy_batch")]
    pub copy_batch_size: usize,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_normalize_batch(),
            include_globs: default_ohlc_globs(),
            start_date: None,
            end_date: None,
            copy_batch_size: default_copy_batch(),
        }
    }
}

fn default_normalize_batch() -> usize {
    50
}
fn default_ohlc_globs() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_copy_batch() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadConfig {
    #[serde(default = "default_load_batch")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_load_batch(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_load_batch() -> usize {
    1000
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_rows: default_max_rows(),
            history_limit: default_history_limit(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_rows() -> usize {
    200
}
fn default_history_limit() -> i64 {
    8
}
fn default_max_attachment_bytes() -> usize {
    64 * 1024
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Parse an optional `YYYY-MM-DD` string.
pub fn parse_date_opt(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>> {
    match value {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .with_context(|| format!("{} must be YYYY-MM-DD, got '{}'", field, s)),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.normalize.batch_size == 0 {
        anyhow::bail!("normalize.batch_size must be > 0");
    }
    if config.normalize.copy_batch_size == 0 {
        anyhow::bail!("normalize.copy_batch_size must be > 0");
    }
    if config.load.batch_size == 0 {
        anyhow::bail!("load.batch_size must be > 0");
    }

    let start = parse_date_opt(config.normalize.start_date.as_deref(), "normalize.start_date")?;
    let end = parse_date_opt(config.normalize.end_date.as_deref(), "normalize.end_date")?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            anyhow::bail!("normalize.start_date must not be after normalize.end_date");
        }
    }

    if config.llm.max_rows == 0 {
        anyhow::bail!("llm.max_rows must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

impl Config {
    /// Configuration with every section at its default, rooted at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            paths: PathsConfig::default(),
            normalize: NormalizeConfig::default(),
            load: LoadConfig::default(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let f = write_config("[db]\npath = \"./x.sqlite\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.normalize.batch_size, 50);
        assert_eq!(cfg.load.batch_size, 1000);
        assert_eq!(cfg.server.bind, "127.0.0.1:5000");
        assert!(!cfg.llm.is_enabled());
        assert_eq!(cfg.server.allowed_origins.len(), 2);
    }

    #[test]
    fn rejects_inverted_date_range() {
        let f = write_config(
            "[db]\npath = \"x\"\n[normalize]\nstart_date = \"2022-01-01\"\nend_date = \"2021-01-01\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let f = write_config("[db]\npath = \"x\"\n[llm]\nprovider = \"gemini\"\n");
        let err = load_config(f.path()).unwrap_err().to_string();
        assert!(err.contains("Unknown llm provider"));
    }

    #[test]
    fn parse_date_opt_handles_blank() {
        assert_eq!(parse_date_opt(Some("  "), "x").unwrap(), None);
        assert!(parse_date_opt(Some("2021/01/01"), "x").is_err());
    }
}
