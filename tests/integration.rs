//! End-to-end CLI integration tests: spawns the built `ragforge` binary
//! against a temporary config and data directory, mirroring the teacher's
//! own `Command::new(binary)` integration-test shape but against the new
//! `init`/`generate`/`introspect` command surface.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragforge_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragforge");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.",
    )
    .unwrap();

    let config_content = format!(
        r#"[graph]
sqlite_path = "{data}/ragforge.sqlite"

[chunking]
max_tokens = 700
overlap_tokens = 80

[retrieval]
final_limit = 12

[server]
bind = "127.0.0.1:7331"

[connectors.filesystem]
root = "{files}"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []
follow_symlinks = false
"#,
        data = root.join("data").display(),
        files = files_dir.display(),
    );

    let config_path = root.join("config").join("ragforge.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragforge(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragforge_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragforge binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn init_creates_the_graph_store() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_ragforge(&config_path, &["init"]);
    assert!(success, "init failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("initialized"));
}

#[test]
fn introspect_lists_generated_tools() {
    let (_tmp, config_path) = setup_test_env();
    run_ragforge(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ragforge(&config_path, &["introspect"]);
    assert!(success, "introspect failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("describe_schema"));
    assert!(stdout.contains("raw_cypher"));
}

#[test]
fn generate_ingests_configured_filesystem_connector() {
    let (_tmp, config_path) = setup_test_env();
    run_ragforge(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ragforge(&config_path, &["generate"]);
    assert!(success, "generate failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("scanned=3"), "expected 3 scanned items: {stdout}");
}

#[test]
fn generate_is_idempotent_on_unchanged_files() {
    let (_tmp, config_path) = setup_test_env();
    run_ragforge(&config_path, &["init"]);
    run_ragforge(&config_path, &["generate"]);
    let (stdout, _, success) = run_ragforge(&config_path, &["generate"]);
    assert!(success);
    assert!(stdout.contains("unchanged="), "expected an unchanged count on resync: {stdout}");
}

#[test]
fn embeddings_index_validates_without_a_provider() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_ragforge(&config_path, &["embeddings:index"]);
    assert!(success, "embeddings:index failed: stdout={stdout}, stderr={stderr}");
}

#[test]
fn tui_prints_notice_and_exits_zero() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_ragforge(&config_path, &["tui"]);
    assert!(success);
    assert!(stdout.contains("not built here"));
}
