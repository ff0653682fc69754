#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_cmd::cargo::cargo_bin_cmd;
use penumbra::{
    Authorizations, Graph, GraphOptions, JournalOptions, JournalStore, User, Visibility,
};
use serde_json::Value;
use tempfile::TempDir;

fn setup_journal(name: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.journal"));
    let config = dir.path().join("absent.toml");
    seed(&path).expect("seed journal");
    (dir, path, config)
}

fn seed(path: &Path) -> penumbra::Result<()> {
    let store = JournalStore::open(path, JournalOptions::default())?;
    let graph = Graph::open(GraphOptions::new(Arc::new(store)))?;
    let admin = User::new("admin", Authorizations::new(["secret"]));
    let v1 = graph
        .prepare_vertex("v1", Visibility::empty())
        .timestamp(1_000)
        .save(&admin)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "age", 30i64, Visibility::new("secret"))
        .timestamp(2_000)
        .save(&admin)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "age", 31i64, Visibility::empty())
        .timestamp(3_000)
        .save(&admin)?;
    Ok(())
}

#[test]
fn history_json_respects_authorizations() {
    let (_dir, journal, config) = setup_journal("history");
    let output = cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config)
        .args(["--format", "json", "history", "--vertex", "v1", "--journal"])
        .arg(&journal)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let events = json["events"].as_array().expect("events array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event"], "add_vertex");
    assert_eq!(events[1]["event"], "add_property");
    assert_eq!(json["next_cursor"], "3000:v:v1:0");

    let output = cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config)
        .args(["--format", "json", "history", "--vertex", "v1", "--auths", "secret", "--journal"])
        .arg(&journal)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["events"].as_array().map(Vec::len), Some(3));
}

#[test]
fn history_pages_with_cursor() {
    let (_dir, journal, config) = setup_journal("paging");
    let output = cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config)
        .args([
            "--format", "json", "history", "--vertex", "v1", "--auths", "secret", "--limit", "1",
            "--after", "1000:v:v1:0", "--journal",
        ])
        .arg(&journal)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let events = json["events"].as_array().expect("events array");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["id"]["timestamp"], 2000);
}

#[test]
fn show_prints_state_at_a_time() {
    let (_dir, journal, config) = setup_journal("show");
    let output = cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config)
        .args(["--format", "json", "show", "--vertex", "v1", "--at", "2500", "--auths", "secret", "--journal"])
        .arg(&journal)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let properties = json["properties"].as_array().expect("properties");
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0]["value"]["value"], 30);
}

#[test]
fn show_missing_element_exits_nonzero() {
    let (_dir, journal, config) = setup_journal("missing");
    cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config)
        .args(["show", "--vertex", "nope", "--journal"])
        .arg(&journal)
        .assert()
        .code(2);
}

#[test]
fn missing_journal_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["history", "--vertex", "v1", "--journal"])
        .arg(dir.path().join("nothing.journal"))
        .assert()
        .failure();
    assert!(!dir.path().join("nothing.journal").exists());
}

#[test]
fn check_visibility_reports_decision() {
    cargo_bin_cmd!("penumbra")
        .args(["check-visibility", "a&(b|c)", "--auths", "a,c"])
        .assert()
        .success()
        .stdout("readable\n");
    cargo_bin_cmd!("penumbra")
        .args(["check-visibility", "a&(b|c)", "--auths", "a"])
        .assert()
        .success()
        .stdout("denied\n");
    cargo_bin_cmd!("penumbra")
        .args(["check-visibility", "a&b|c"])
        .assert()
        .failure();
    let deep = format!("{}a{}", "(".repeat(20_000), ")".repeat(20_000));
    cargo_bin_cmd!("penumbra")
        .args(["check-visibility", &deep, "--auths", "a"])
        .assert()
        .code(1);
}
