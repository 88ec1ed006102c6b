use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn sift(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("sift");
    cmd.current_dir(home)
        .env("SIFT_HOME", home)
        .env("SIFT_ANALYSIS_PROVIDER", "local")
        .env("SIFT_SUMMARIZE_PAGES", "0")
        .env("SIFT_LOG", "error")
        .env_remove("SIFT_CONFIG_PATH")
        .env_remove("SIFT_DB_PATH")
        .env_remove("SIFT_LOGS_DIR");
    cmd
}

#[test]
fn status_reports_layout_and_backlog() {
    let tmp = tempdir().expect("tempdir");
    sift(tmp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("status: ok"))
        .stdout(predicate::str::contains("schema_version=2"))
        .stdout(predicate::str::contains("events.pending=0"))
        .stdout(predicate::str::contains("state.last_cycle_status=none"))
        .stdout(predicate::str::contains("batch.ready=false"));
}

#[test]
fn status_flags_unknown_sift_variables() {
    let tmp = tempdir().expect("tempdir");
    sift(tmp.path())
        .env("SIFT_BATCH_MAX_TOKEN", "10")
        .arg("status")
        .assert()
        .code(2)
        .stdout(predicate::str::contains(
            "issue: unknown environment variable SIFT_BATCH_MAX_TOKEN",
        ));
}

#[test]
fn toml_config_is_read_from_sift_home() {
    let tmp = tempdir().expect("tempdir");
    std::fs::write(
        tmp.path().join("sift.toml"),
        "[batch]\nmin_events = 1\ninterval_hours = 0\n",
    )
    .expect("write config");

    sift(tmp.path())
        .args([
            "ingest",
            "--source",
            "shell",
            "--event-type",
            "command",
            "--occurred-at",
            "2024-03-01T10:00:00Z",
        ])
        .assert()
        .success();

    sift(tmp.path())
        .arg("batch")
        .assert()
        .success()
        .stdout(predicate::str::contains("min_events:1"))
        .stdout(predicate::str::contains("gate=ready"))
        .stdout(predicate::str::contains("next_batch.events=1"));
}

#[test]
fn cache_cleanup_records_its_run() {
    let tmp = tempdir().expect("tempdir");
    sift(tmp.path())
        .arg("cache-cleanup")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed=0"));

    let state =
        std::fs::read_to_string(tmp.path().join("state/sift_state.json")).expect("state file");
    assert!(state.contains("last_cache_cleanup_epoch_secs"));

    sift(tmp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "audit.last=cache-cleanup status=ok gate=- run=-",
        ));
}
