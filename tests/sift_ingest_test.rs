use predicates::prelude::*;
use std::fs;
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
fn ingest_single_event_dedupes_identical_payloads() {
    let tmp = tempdir().expect("tempdir");
    let args = [
        "ingest",
        "--source",
        "chrome",
        "--event-type",
        "visit",
        "--occurred-at",
        "2024-01-15T10:00:00Z",
        "--payload",
        r#"{"url":"https://docs.rs","title":"Docs"}"#,
    ];

    sift(tmp.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("inserted=1"))
        .stdout(predicate::str::contains("pending_events=1"));

    sift(tmp.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("duplicates=1"))
        .stdout(predicate::str::contains("pending_events=1"));

    assert!(tmp.path().join("sift.db").exists());
}

#[test]
fn ingest_file_reports_bad_lines_and_keeps_good_ones() {
    let tmp = tempdir().expect("tempdir");
    let file = tmp.path().join("events.jsonl");
    fs::write(
        &file,
        concat!(
            r#"{"source":"git","event_type":"commit","payload":{"message":"one"},"occurred_at":"2024-01-15T10:00:00Z"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"source":"git","event_type":"commit","payload":{"message":"two"},"occurred_at":"sometime"}"#,
            "\n",
        ),
    )
    .expect("write events");

    sift(tmp.path())
        .arg("ingest")
        .arg("--file")
        .arg(&file)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("inserted=2"))
        .stdout(predicate::str::contains("unparsed_timestamps=1"))
        .stdout(predicate::str::contains("issue: line 2"));
}

#[test]
fn ingest_without_source_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    sift(tmp.path())
        .args(["ingest", "--event-type", "visit"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("need --source and --event-type"));

    sift(tmp.path())
        .args([
            "ingest",
            "--source",
            "chrome",
            "--event-type",
            "visit",
            "--payload",
            "{broken",
        ])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("invalid --payload json"));
}

#[test]
fn group_assigns_sessions_once() {
    let tmp = tempdir().expect("tempdir");
    for at in [
        "2024-01-15T10:00:00Z",
        "2024-01-15T10:30:00Z",
        "2024-01-15T12:00:00Z",
        "2024-01-15T12:10:00Z",
    ] {
        sift(tmp.path())
            .args([
                "ingest",
                "--source",
                "shell",
                "--event-type",
                "command",
                "--occurred-at",
                at,
            ])
            .assert()
            .success();
    }

    sift(tmp.path())
        .arg("group")
        .assert()
        .success()
        .stdout(predicate::str::contains("sessions_created=2"));

    sift(tmp.path())
        .arg("group")
        .assert()
        .success()
        .stdout(predicate::str::contains("sessions_created=0"))
        .stdout(predicate::str::contains("sessions_total=2"));
}
