use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn spx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("spx");
    path
}

const STOOQ_HEADER: &str = "<TICKER>,<PER>,<DATE>,<TIME>,<OPEN>,<HIGH>,<LOW>,<CLOSE>,<VOL>,<OPENINT>\n";

fn stooq_file(dir: &Path, name: &str, ticker: &str) {
    let mut body = STOOQ_HEADER.to_string();
    for date in ["20201231", "20210104", "20210630", "20211231", "20220103"] {
        body.push_str(&format!(
            "{},D,{},000000,100.0,101.5,99.0,100.5,1000000,0\n",
            ticker, date
        ));
    }
    fs::write(dir.join(name), body).unwrap();
}

fn setup_test_env_with_bind(bind: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let ohlc_dir = root.join("stooq");
    fs::create_dir_all(&ohlc_dir).unwrap();
    stooq_file(&ohlc_dir, "aapl.us.txt", "AAPL.US");
    stooq_file(&ohlc_dir, "msft.us.txt", "MSFT.US");

    fs::write(
        root.join("sp500.csv"),
        "Symbol,Security,CIK\nAAPL,Apple Inc.,320193\nMSFT,Microsoft,789019\nNVDA,Nvidia,1045810\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/spx.sqlite"

[paths]
ohlc_dir = "{root}/stooq"
normalized_dir = "{root}/normalized"
sp500_list = "{root}/sp500.csv"
company_facts_dir = "{root}/company_facts"
submissions_dir = "{root}/submissions"

[normalize]
batch_size = 1

[load]
batch_size = 100
max_retries = 1

[server]
bind = "{bind}"

[llm]
provider = "disabled"
"#,
        root = root.display(),
        bind = bind,
    );

    let config_path = config_dir.join("spx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn setup_test_env() -> (TempDir, PathBuf) {
    setup_test_env_with_bind("127.0.0.1:5000")
}

fn run_spx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = spx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run spx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_db_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_spx(&config_path, &["db", "init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_spx(&config_path, &["db", "init"]);
    assert!(success2, "Second init failed (not idempotent)");

    let (stdout, _, success) = run_spx(&config_path, &["db", "tables"]);
    assert!(success);
    assert!(stdout.contains("sp500_stooq_ohcl"));
    assert!(stdout.contains("bronze_sec_submissions"));
}

#[test]
fn test_unknown_table_lists_available() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_spx(&config_path, &["db", "create-table", "prices"]);
    assert!(!success);
    assert!(stderr.contains("Available tables"));
}

#[test]
fn test_destructive_commands_require_yes() {
    let (_tmp, config_path) = setup_test_env();
    run_spx(&config_path, &["db", "init"]);

    let (_, stderr, success) = run_spx(&config_path, &["db", "drop-table", "sp500_wik_list"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, _, success) = run_spx(
        &config_path,
        &["db", "clear-table", "sp500_wik_list", "--yes"],
    );
    assert!(success);
    assert!(stdout.contains("0 rows deleted"));
}

#[test]
fn test_normalize_ohlc_with_date_range() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_spx(
        &config_path,
        &[
            "normalize",
            "ohlc",
            "--start-date",
            "2021-01-01",
            "--end-date",
            "2021-12-31",
        ],
    );
    assert!(success, "normalize failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files normalized: 2"));
    assert!(stdout.contains("records written:  6"));

    let out = fs::read_to_string(tmp.path().join("normalized/normalized_sp500_data.csv")).unwrap();
    let mut lines = out.lines();
    assert_eq!(lines.next(), Some("Ticker,Date,Open,High,Low,Close,Volume"));
    let dates: Vec<&str> = lines.map(|l| l.split(',').nth(1).unwrap()).collect();
    assert_eq!(dates.len(), 6);
    assert!(dates.iter().all(|d| d.starts_with("2021-")));
    assert!(dates.contains(&"2021-12-31"));

    let manifest = fs::read_to_string(tmp.path().join("normalized/file_names.csv")).unwrap();
    assert!(manifest.contains("aapl.us.txt"));
}

#[test]
fn test_normalize_rejects_inverted_range() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success) = run_spx(
        &config_path,
        &[
            "normalize",
            "ohlc",
            "--start-date",
            "2022-01-01",
            "--end-date",
            "2021-01-01",
        ],
    );
    assert!(!success);
}

#[test]
fn test_copy_company_facts_matches_reference_ciks() {
    let (tmp, config_path) = setup_test_env();
    let source = tmp.path().join("edgar");
    fs::create_dir_all(&source).unwrap();
    for name in [
        "CIK0000320193.json",
        "CIK0000789019.json",
        "CIK0000000042.json",
        "CIK0000320193-submissions-001.json",
    ] {
        fs::write(source.join(name), "{}").unwrap();
    }

    let (stdout, stderr, success) = run_spx(
        &config_path,
        &["copy", "company-facts", "--source", source.to_str().unwrap()],
    );
    assert!(success, "copy failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files copied:  2"));
    assert!(stdout.contains("CIKs found:    2/3"));
    assert!(stdout.contains("0001045810"));

    let dest = tmp.path().join("company_facts");
    assert!(dest.join("CIK0000320193.json").exists());
    assert!(dest.join("CIK0000789019.json").exists());
    assert!(!dest.join("CIK0000000042.json").exists());
}

#[test]
fn test_copy_submissions_in_batches() {
    let (tmp, config_path) = setup_test_env();
    let source = tmp.path().join("edgar_subs");
    fs::create_dir_all(&source).unwrap();
    for name in [
        "CIK0000320193.json",
        "CIK0000320193-submissions-001.json",
        "CIK0000789019-submissions-002.json",
        "CIK0000000042.json",
    ] {
        fs::write(source.join(name), "{}").unwrap();
    }

    let (stdout, stderr, success) = run_spx(
        &config_path,
        &[
            "copy",
            "submissions",
            "--source",
            source.to_str().unwrap(),
            "--batch-size",
            "2",
        ],
    );
    assert!(success, "copy failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files copied:  3"));
    assert!(tmp
        .path()
        .join("submissions/CIK0000789019-submissions-002.json")
        .exists());
}

#[test]
fn test_load_twice_does_not_duplicate() {
    let (tmp, config_path) = setup_test_env();
    run_spx(&config_path, &["db", "init"]);

    let input = tmp.path().join("wiki.csv");
    fs::write(
        &input,
        "Symbol,Security,GICS Sector,GICS Sub-Industry,Headquarters Location,Date added,CIK,Founded\n\
         AAPL,Apple Inc.,Information Technology,Technology Hardware,\"Cupertino, California\",1982-11-30,320193,1977\n\
         MSFT,Microsoft,Information Technology,Systems Software,\"Redmond, Washington\",1994-06-01,789019,1975\n\
         ,Missing Symbol,Energy,Oil,\"Nowhere\",2000-01-01,1,1900\n",
    )
    .unwrap();

    for _ in 0..2 {
        let (stdout, stderr, success) = run_spx(
            &config_path,
            &["load", "wiki-list", "--input", input.to_str().unwrap(), "--verify"],
        );
        assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
        assert!(stdout.contains("inserted: 2"));
        assert!(stdout.contains("dropped:  1"));
        assert!(stdout.contains("MATCH"));
        assert!(!stdout.contains("MISMATCH"));
    }
}

#[test]
fn test_load_missing_columns_fails() {
    let (tmp, config_path) = setup_test_env();
    run_spx(&config_path, &["db", "init"]);
    let input = tmp.path().join("bad.csv");
    fs::write(&input, "Ticker,Date\nAAPL,2021-01-04\n").unwrap();

    let (_, stderr, success) =
        run_spx(&config_path, &["load", "ohlc", "--input", input.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Missing columns"));
}

#[test]
fn test_pipeline_ohlc_reports_result() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_spx(&config_path, &["pipeline", "ohlc"]);
    assert!(success, "pipeline failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout
        .lines()
        .any(|l| l.split_whitespace().eq(["rows_loaded:", "10"])));
    assert!(stdout.contains("RESULT task=ohlc status=ok"));
}

#[test]
fn test_pipeline_sec_facts_fails_on_missing_dir() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope");
    let (_, _, success) = run_spx(
        &config_path,
        &["pipeline", "sec-facts", "--dir", missing.to_str().unwrap()],
    );
    assert!(!success);
}

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn test_serve_ask_falls_back_without_llm() {
    let port = free_port();
    let bind = format!("127.0.0.1:{}", port);
    let (_tmp, config_path) = setup_test_env_with_bind(&bind);

    let child = Command::new(spx_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let _guard = ServerGuard(child);

    let client = reqwest::blocking::Client::new();
    let base = format!("http://{}", bind);
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Ok(resp) = client.get(format!("{}/health", base)).send() {
            if resp.status().is_success() {
                break;
            }
        }
        assert!(Instant::now() < deadline, "server did not start");
        std::thread::sleep(Duration::from_millis(100));
    }

    let resp = client
        .post(format!("{}/ask", base))
        .json(&serde_json::json!({"question": "Which tickers were added in 2021?"}))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["reply"], "hello");

    let resp = client
        .post(format!("{}/ask", base))
        .json(&serde_json::json!({"question": "  "}))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}
