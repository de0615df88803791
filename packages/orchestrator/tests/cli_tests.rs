//! The `orchestrate` binary, run as a child process.

use std::path::{Path, PathBuf};
use std::process::Command;

use orchestrator::LinkResult;
use uuid::Uuid;

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("orchestrate-cli-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn orchestrate(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_orchestrate"));
    cmd.current_dir(dir)
        .env_remove("ORCHESTRATOR_CONFIG")
        .env_remove("DEDUP_WINDOW_DAYS")
        .env_remove("CHECKPOINT_RETENTION_DAYS")
        .env("ORCHESTRATOR_DB", dir.join("state.db"))
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn link_command_rewrites_markup_without_touching_the_database() {
    let dir = scratch_dir();
    let markup = dir.join("article.html");
    let candidates = dir.join("candidates.json");
    std::fs::write(&markup, "<p>Every morning my espresso machine hums.</p>").unwrap();
    std::fs::write(
        &candidates,
        r#"{
            "internal": [
                {"url": "https://blog.example/espresso", "title": "Espresso Machines", "anchors": ["espresso machine"]}
            ],
            "primary_subject": "home espresso"
        }"#,
    )
    .unwrap();

    let out = orchestrate(&dir)
        .arg("link")
        .arg("--markup")
        .arg(&markup)
        .arg("--candidates")
        .arg(&candidates)
        .output()
        .unwrap();

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let result: LinkResult = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(result.stats.total_inserted, 1);
    assert!(result
        .html
        .contains(r#"<a href="https://blog.example/espresso">espresso machine</a>"#));
    assert!(!dir.join("state.db").exists());

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn check_duplicate_on_a_fresh_database_reports_none() {
    let dir = scratch_dir();

    let out = orchestrate(&dir)
        .args(["check-duplicate", "--scope", "tenant", "--subject", "cortado"])
        .output()
        .unwrap();

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["status"], "no_duplicate");
    assert!(dir.join("state.db").exists());

    std::fs::remove_dir_all(dir).unwrap();
}
