//! CLI subprocess integration tests.
//!
//! These tests invoke the `strata` binary as a subprocess and verify
//! exit codes, stdout content, and JSON output.

use std::path::Path;
use std::process::{Command, Output};

fn strata(store: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_strata"))
        .env_remove("STRATA_NAMESPACE")
        .env_remove("STRATA_LOG")
        .arg("--store")
        .arg(store)
        .args(args)
        .output()
        .unwrap()
}

fn ok(store: &Path, args: &[&str]) -> String {
    let out = strata(store, args);
    assert!(
        out.status.success(),
        "strata {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout).unwrap()
}

fn json(store: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["--json"];
    full.extend_from_slice(args);
    serde_json::from_str(&ok(store, &full)).unwrap()
}

fn code(store: &Path, args: &[&str]) -> i32 {
    strata(store, args).status.code().unwrap()
}

/// `base` committed from `L1`, with active `L2` on top.
fn seeded() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    ok(dir.path(), &["prepare", "L1"]);
    ok(dir.path(), &["commit", "base", "L1"]);
    ok(dir.path(), &["prepare", "L2", "base"]);
    dir
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("strata"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["prepare", "view", "commit", "remove", "tree", "resolve"] {
        assert!(stdout.contains(cmd), "help must list '{cmd}'");
    }
}

#[test]
fn prepare_base_prints_one_writable_mount() {
    let dir = tempfile::tempdir().unwrap();
    let out = ok(dir.path(), &["prepare", "L1"]);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("bind "));
    assert!(lines[0].contains("/snapshots/"));
    assert!(lines[0].ends_with(" rw,rbind"));
}

#[test]
fn child_mounts_are_top_first() {
    let dir = seeded();
    let mounts = json(dir.path(), &["mounts", "L2"]);
    let mounts = mounts.as_array().unwrap();
    assert_eq!(mounts.len(), 2);
    assert_eq!(mounts[0]["type"], "bind");
    assert_eq!(mounts[0]["options"][0], "rw");
    assert_eq!(mounts[1]["options"][0], "ro");
}

#[test]
fn overlay_collapses_chain() {
    let dir = seeded();
    let mount = json(dir.path(), &["mounts", "L2", "--overlay"]);
    assert_eq!(mount["type"], "overlay");
}

#[test]
fn view_of_nothing_has_no_mounts() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(ok(dir.path(), &["view", "V0"]).trim(), "no mounts");
    let info = json(dir.path(), &["stat", "V0"]);
    assert_eq!(info["kind"], "active");
    assert_eq!(info["readonly"], true);
}

#[test]
fn stat_reports_lineage() {
    let dir = seeded();
    let base = json(dir.path(), &["stat", "base"]);
    assert_eq!(base["kind"], "committed");
    assert_eq!(base["children"], 1);
    assert!(base.get("parent").is_none());

    let l2 = json(dir.path(), &["stat", "L2"]);
    assert_eq!(l2["parent"], "base");
}

#[test]
fn constraint_violations_exit_4() {
    let dir = seeded();
    assert_eq!(code(dir.path(), &["stat", "missing"]), 4);
    assert_eq!(code(dir.path(), &["prepare", "L2", "base"]), 4);
    assert_eq!(code(dir.path(), &["remove", "base"]), 4);
    assert_eq!(code(dir.path(), &["commit", "again", "L1"]), 4);
    assert_eq!(code(dir.path(), &["prepare", "X", "L2"]), 4);

    let out = strata(dir.path(), &["stat", "missing"]);
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("error: "));
}

#[test]
fn remove_then_parent_becomes_removable() {
    let dir = seeded();
    ok(dir.path(), &["remove", "L2"]);
    assert_eq!(json(dir.path(), &["stat", "base"])["children"], 0);
    ok(dir.path(), &["remove", "base"]);
    assert!(json(dir.path(), &["list"]).as_array().unwrap().is_empty());
}

#[test]
fn list_is_sorted_by_name() {
    let dir = seeded();
    let names: Vec<String> = json(dir.path(), &["list"])
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["name"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(names, vec!["L2", "base"]);
}

#[test]
fn tree_shows_children_under_parent() {
    let dir = seeded();
    ok(dir.path(), &["view", "peek", "base"]);
    let out = ok(dir.path(), &["tree"]);
    assert!(out.contains("base (committed)"));
    assert!(out.contains("├── L2 (active)"));
    assert!(out.contains("└── peek (view)"));
}

#[test]
fn verify_and_cleanup_on_healthy_store() {
    let dir = seeded();
    let report = json(dir.path(), &["verify"]);
    assert_eq!(report["checked"], 2);
    assert_eq!(report["passed"], 2);

    let cleanup = json(dir.path(), &["cleanup"]);
    assert_eq!(cleanup["kept"], 2);
    assert!(cleanup["removed"].as_array().unwrap().is_empty());
}

#[test]
fn verify_flags_missing_storage() {
    let dir = seeded();
    std::fs::remove_dir_all(dir.path().join("snapshots")).unwrap();
    assert_eq!(code(dir.path(), &["verify"]), 3);
}

#[test]
fn namespaces_are_isolated() {
    let dir = seeded();
    ok(dir.path(), &["--namespace", "ns1", "prepare", "L2"]);
    assert_eq!(
        json(dir.path(), &["--namespace", "ns1", "stat", "L2"])["parent"],
        serde_json::Value::Null
    );

    let names = json(dir.path(), &["namespaces"]);
    assert_eq!(names, serde_json::json!(["default", "ns1"]));

    // not empty yet
    assert_eq!(code(dir.path(), &["namespaces", "--remove", "ns1"]), 4);
    ok(dir.path(), &["--namespace", "ns1", "remove", "L2"]);
    ok(dir.path(), &["namespaces", "--remove", "ns1"]);
    assert_eq!(json(dir.path(), &["namespaces"]), serde_json::json!(["default"]));

    // the namespace this invocation is bound to
    assert_eq!(code(dir.path(), &["namespaces", "--remove", "default"]), 1);
}

#[test]
fn invalid_namespace_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(code(dir.path(), &["--namespace", "../up", "list"]), 1);
}

#[test]
fn debug_reports_engine_counters() {
    let dir = seeded();
    let info = json(dir.path(), &["debug"]);
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(info["lineage"]["total"], 2);

    let text = ok(dir.path(), &["debug"]);
    assert!(text.contains("-------- Memory Details --------"));
    assert!(text.contains("Stack Dump :"));
}

#[test]
fn resolve_git_reference() {
    let dir = tempfile::tempdir().unwrap();
    let out = json(dir.path(), &["resolve", "git/team/app:v1"]);
    assert_eq!(out["name"], "git/team/app:v1");
    assert_eq!(
        out["descriptor"]["url"],
        "ssh://localhost:22/git-server/repos/team/app"
    );
    assert_eq!(out["descriptor"]["object"], "v1");
    assert!(out["written"].is_null());
}

#[test]
fn resolve_rejects_unknown_host() {
    let dir = tempfile::tempdir().unwrap();
    let out = strata(dir.path(), &["resolve", "docker.io/library/alpine:3"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("unsupported locator"));
}

#[test]
fn config_file_selects_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("strata.toml");
    std::fs::write(&config, "namespace = \"fromfile\"\n").unwrap();
    let config = config.to_str().unwrap();
    ok(dir.path(), &["--config", config, "prepare", "A"]);
    let names = json(dir.path(), &["namespaces"]);
    assert!(names
        .as_array()
        .unwrap()
        .iter()
        .any(|n| n == "fromfile"));
}
