use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const HANDBOOK: &str = "# Overview\nThis service uploads files to storage.\n\n\
# Retries\nThe retry policy uses exponential backoff with jitter.\n\n\
# Limits\nUploads are capped at 5 GB.\n\n\
# Operations\nOperators can change the retry policy at runtime.\n";

fn sweep_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sweep"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("sweep.toml");
    fs::write(
        &config_path,
        r#"[engine]
wave_size = 2
min_chunk_size = 50
max_chunk_size = 80
chunk_timeout_secs = 10

[analyzer]
provider = "keyword"
"#,
    )
    .unwrap();

    fs::write(root.join("handbook.md"), HANDBOOK).unwrap();
    let log: String = (0..6)
        .map(|i| format!("2024-03-01T10:00:0{}Z INFO worker {} heartbeat\n", i, i))
        .collect();
    fs::write(root.join("events"), log).unwrap();

    (tmp, config_path)
}

fn run_sweep(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sweep_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sweep binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_detect_infers_log_without_extension() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("events");
    let (stdout, stderr, ok) = run_sweep(&config, &["detect", path_arg(&file)]);
    assert!(ok, "detect failed: {}", stderr);
    assert!(stdout.contains("content type: timestamped-log"), "{}", stdout);
    assert!(stdout.contains("boundaries: 5"), "{}", stdout);
}

#[test]
fn test_plan_json_covers_document() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("handbook.md");
    let (stdout, stderr, ok) = run_sweep(&config, &["plan", path_arg(&file), "--format", "json"]);
    assert!(ok, "plan failed: {}", stderr);

    let chunks: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[0]["start"], 0);
    assert_eq!(chunks[3]["end"], HANDBOOK.len());
    for pair in chunks.windows(2) {
        assert_eq!(pair[0]["end"], pair[1]["start"]);
    }
}

#[test]
fn test_plan_text_summary() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("handbook.md");
    let (stdout, _, ok) = run_sweep(&config, &["plan", path_arg(&file), "--size", "10000"]);
    assert!(ok);
    assert!(stdout.starts_with("1 chunks for"), "{}", stdout);
    assert!(stdout.contains("heading-sectioned"));
}

#[test]
fn test_run_keyword_json_and_records() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("handbook.md");
    let records = tmp.path().join("records.jsonl");
    let (stdout, stderr, ok) = run_sweep(
        &config,
        &[
            "run",
            path_arg(&file),
            "--query",
            "retry policy",
            "--format",
            "json",
            "--progress",
            "off",
            "--records",
            path_arg(&records),
        ],
    );
    assert!(ok, "run failed: {}", stderr);

    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["query"], "retry policy");
    assert_eq!(result["chunks_processed"], 4);
    assert_eq!(result["total_chunks"], 4);
    assert_eq!(result["wave_count"], 2);
    assert_eq!(result["terminated_early"], false);
    let findings = result["findings"].as_array().unwrap();
    assert!(findings
        .iter()
        .any(|f| f["point"].as_str().unwrap().contains("retry policy uses")));
    assert_eq!(result["answer_source"], "composed");

    let lines = fs::read_to_string(&records).unwrap();
    assert_eq!(lines.lines().count(), 4);
    let first: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
    assert_eq!(first["chunk_id"], 0);
    assert_eq!(first["content_type"], "heading-sectioned");
}

#[test]
fn test_run_text_output() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("handbook.md");
    let (stdout, stderr, ok) = run_sweep(
        &config,
        &["run", path_arg(&file), "-q", "retry policy", "--progress", "off"],
    );
    assert!(ok, "run failed: {}", stderr);
    assert!(stdout.starts_with("Query: retry policy"));
    assert!(stdout.contains("Answer:"));
    assert!(stdout.contains("Findings:"));
}

#[test]
fn test_run_with_disabled_analyzer_reports_unobtainable() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("handbook.md");
    let (stdout, stderr, ok) = run_sweep(
        &config,
        &[
            "run",
            path_arg(&file),
            "-q",
            "retry policy",
            "--analyzer",
            "disabled",
            "--format",
            "json",
            "--progress",
            "off",
        ],
    );
    assert!(ok, "run failed: {}", stderr);
    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["failed_chunks"], result["chunks_processed"]);
    assert_eq!(result["answer_source"], "none");
    assert!(result["answer"]
        .as_str()
        .unwrap()
        .contains("could not be obtained"));
}

#[test]
fn test_unknown_content_type_errors() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("handbook.md");
    let (_, stderr, ok) = run_sweep(
        &config,
        &["run", path_arg(&file), "-q", "x", "--content-type", "spreadsheet"],
    );
    assert!(!ok);
    assert!(stderr.contains("Unknown content type"), "{}", stderr);
}

#[test]
fn test_invalid_wave_size_errors() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("handbook.md");
    let (_, stderr, ok) = run_sweep(
        &config,
        &["run", path_arg(&file), "-q", "x", "--wave-size", "0", "--progress", "off"],
    );
    assert!(!ok);
    assert!(stderr.contains("wave_size"), "{}", stderr);
}

#[test]
fn test_explicit_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let doc = tmp.path().join("doc.txt");
    fs::write(&doc, "hello").unwrap();
    let (_, stderr, ok) = run_sweep(&missing, &["detect", path_arg(&doc)]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[test]
fn test_unknown_format_lists_choices() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("handbook.md");
    let (_, stderr, ok) = run_sweep(&config, &["plan", path_arg(&file), "--format", "yaml"]);
    assert!(!ok);
    assert!(stderr.contains("possible values: text, json"), "{}", stderr);

    let (_, stderr, ok) = run_sweep(
        &config,
        &["run", path_arg(&file), "-q", "retry policy", "--progress", "loud"],
    );
    assert!(!ok);
    assert!(stderr.contains("possible values: off, human, json"), "{}", stderr);
}
