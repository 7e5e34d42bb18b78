use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dex");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let content = root.join("raw/versions/18.0/content");
    fs::create_dir_all(content.join("sales")).unwrap();
    fs::write(
        content.join("sales/quotes.rst"),
        "======\nQuotes\n======\n\nCreate a quotation from the :guilabel:`Sales` app.\n\nTemplates\n=========\n\n.. note::\n   Templates are optional.\n",
    )
    .unwrap();
    fs::write(
        content.join("overview.md"),
        "# Overview\n\nThe sales documentation.\n",
    )
    .unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[db]
path = "{root}/data/docs.sqlite"

[paths]
raw_dir = "{root}/raw"
markdown_dir = "{root}/markdown"

[docs]
versions = ["18.0"]
base_url = "https://docs.example.com"

[embedding]
provider = "disabled"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("docs-expert.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("BEARER_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_dex(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/docs.sqlite").exists());

    let (_, stderr, ok) = run_dex(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_check_and_dry_run_list_new_sources() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_dex(&config, &["check"]);
    assert!(ok, "check failed: {}", stderr);
    assert!(stdout.contains("version 18.0"));
    assert!(stdout.contains("new: 2"));
    assert!(stdout.contains("+ sales/quotes.rst"));
    assert!(stdout.contains("updates pending"));

    let (stdout, stderr, ok) = run_dex(&config, &["process", "--dry-run", "--version", "18.0"]);
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("process 18.0 (dry-run)"));
    assert!(stdout.contains("new: 2"));
}

#[test]
fn test_process_rejects_unknown_version() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_dex(&config, &["process", "--version", "12.0"]);
    assert!(!ok);
    assert!(stderr.contains("not listed"));
}

#[test]
fn test_process_without_embeddings_reports_failures() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_dex(&config, &["process", "--progress", "off"]);
    assert!(ok, "process failed: {}", stderr);
    assert!(stdout.contains("process 18.0"));
    assert!(stdout.contains("chunks written: 0"));
    assert!(stdout.contains("chunks failed:"));
    assert!(stdout.contains("done with failures"));

    // Nothing was recorded, so the sources are still pending.
    let (stdout, _, _) = run_dex(&config, &["check"]);
    assert!(stdout.contains("new: 2"));
}

#[test]
fn test_convert_writes_markdown() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_dex(&config, &["convert"]);
    assert!(ok, "convert failed: {}", stderr);
    assert!(stdout.contains("converted: 2"));

    let quotes = tmp.path().join("markdown/versions/18.0/content/sales/quotes.md");
    let markdown = fs::read_to_string(quotes).unwrap();
    assert!(markdown.starts_with("# Quotes"));
    assert!(markdown.contains("**Sales**"));
    assert!(markdown.contains("## Templates"));
    assert!(markdown.contains("Note: Templates are optional."));
}

#[test]
fn test_stats_on_empty_database() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_dex(&config, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("Database Stats"));
    assert!(stdout.contains("No versions ingested yet."));
}

#[test]
fn test_missing_config_fails() {
    let (stdout, stderr, ok) = run_dex(Path::new("/nonexistent/docs-expert.toml"), &["stats"]);
    assert!(!ok);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Failed to read config file"));
}
