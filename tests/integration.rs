use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docchat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docchat"))
}

fn setup_test_env(extra_config: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("faq")).unwrap();
    fs::write(
        files_dir.join("returns.txt"),
        "Items can be returned within 30 days of delivery.\n\nRefunds are issued to the original payment method.",
    )
    .unwrap();
    fs::write(
        files_dir.join("faq/shipping.md"),
        "# Shipping\n\nStandard shipping takes 3-5 business days.\n\nExpress shipping takes 1 day.",
    )
    .unwrap();
    fs::write(files_dir.join("logo.png"), [0u8, 1, 2, 3]).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docchat.sqlite"

[documents]
root = "{root}/files"

[chunking]
size = 40
overlap = 5

[logging]
level = "warn"

{extra_config}
"#,
        root = root.display(),
    );

    let config_path = config_dir.join("docchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_docchat(&config_path, &["init"]);
    assert!(success, "init failed: {stderr}");
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/docchat.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_docchat(&config_path, &["init"]);
    assert!(success, "second init failed: {stderr}");
}

#[test]
fn test_ingest_dry_run_counts_documents() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_docchat(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: {stderr}");
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("documents found: 2"), "stdout: {stdout}");
}

#[test]
fn test_ingest_requires_embedding_provider() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, stderr, success) = run_docchat(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("Embedding provider is disabled"), "stderr: {stderr}");
}

#[test]
fn test_profiles_lists_builtins_and_custom() {
    let (_tmp, config_path) = setup_test_env(
        r#"[profiles]
default = "legal"

[profiles.templates]
legal = "You are a careful legal research assistant. Cite statutes."
"#,
    );

    let (stdout, stderr, success) = run_docchat(&config_path, &["profiles"]);
    assert!(success, "profiles failed: {stderr}");
    for name in ["customer_service", "technical_support", "faq", "legal"] {
        assert!(stdout.contains(name), "missing {name} in {stdout}");
    }
    let default_line = stdout.lines().find(|l| l.starts_with('*')).unwrap();
    assert!(default_line.contains("legal"));
    assert!(default_line.contains("You are a careful legal research assistant."));
}

#[test]
fn test_stats_on_fresh_database() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_docchat(&config_path, &["stats"]);
    assert!(success, "stats failed: {stderr}");
    assert!(stdout.contains("Documents:   0"));
    assert!(stdout.contains("Queries:     0"));
}

#[test]
fn test_ask_with_disabled_providers_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) =
        run_docchat(&config_path, &["ask", "How long do refunds take?"]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("embedding provider is disabled"), "stderr: {stderr}");
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env("");
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("overlap = 5", "overlap = 40");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_docchat(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("chunking.overlap must be < chunking.size"), "stderr: {stderr}");
}

#[test]
fn test_missing_explicit_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docchat(&tmp.path().join("nope.toml"), &["profiles"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
