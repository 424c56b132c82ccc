//! Smoke tests -- verify the binary runs and key subcommands work.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

/// Config pointing models and storage into `dir`.
fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("slawatch.toml");
    let body = format!(
        "[storage]\ndb_path = '{}'\n\n[models]\ndir = '{}'\n",
        dir.join("slawatch.db").display(),
        dir.join("models").display()
    );
    std::fs::write(&path, body).unwrap();
    path
}

fn slawatch() -> Command {
    Command::cargo_bin("slawatch").unwrap()
}

#[test]
fn test_cli_help() {
    slawatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("SLA violation prediction"));
}

#[test]
fn test_cli_version() {
    slawatch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("slawatch"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "train", "predict", "models", "export", "prune"] {
        slawatch().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_predict_uses_fallback_without_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    slawatch()
        .arg("--config")
        .arg(&cfg)
        .args([
            "predict",
            "--bandwidth", "50",
            "--throughput", "5",
            "--congestion", "90",
            "--packet-loss", "8",
            "--latency", "25",
            "--jitter", "6",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"model_version\": \"fallback-v1.0\""))
        .stdout(predicate::str::contains("\"is_anomaly\": true"));
}

#[test]
fn test_predict_rejects_invalid_vector() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    slawatch()
        .arg("--config")
        .arg(&cfg)
        .args([
            "predict",
            "--bandwidth", "50",
            "--throughput", "5",
            "--congestion", "190",
            "--packet-loss", "8",
            "--latency", "25",
            "--jitter", "6",
        ])
        .assert()
        .failure();
}

#[test]
fn test_models_reports_fallback_inventory() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    slawatch()
        .arg("--config")
        .arg(&cfg)
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("sla_predictor"))
        .stdout(predicate::str::contains("\"loaded\": true"));
}

#[test]
fn test_export_and_prune_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    slawatch()
        .arg("--config")
        .arg(&cfg)
        .args(["export", "sla-metrics", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));

    slawatch()
        .arg("--config")
        .arg(&cfg)
        .args(["prune", "--days", "30"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 0 telemetry records"));
}

#[test]
fn test_train_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    let data = dir.path().join("telemetry.csv");
    let mut csv = String::from("Bandwidth,Throughput,Congestion,Packet_Loss,Latency,Jitter\n");
    for i in 0..120u32 {
        let bandwidth = 100.0 + f64::from(i % 7) * 10.0;
        let throughput = bandwidth * (0.35 + f64::from(i % 13) * 0.05);
        let congestion = f64::from((i * 7) % 85);
        let loss = f64::from(i % 11) * 0.6;
        let latency = f64::from((i * 3) % 21);
        let jitter = f64::from(i % 5) * 0.8;
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            bandwidth, throughput, congestion, loss, latency, jitter
        ));
    }
    std::fs::write(&data, csv).unwrap();

    slawatch()
        .arg("--config")
        .arg(&cfg)
        .arg("train")
        .arg("--data")
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("Training Report"));

    assert!(dir.path().join("models/sla_predictor.json").exists());
    assert!(dir.path().join("models/anomaly_detector.json").exists());

    slawatch()
        .arg("--config")
        .arg(&cfg)
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("gb_production"));
}
