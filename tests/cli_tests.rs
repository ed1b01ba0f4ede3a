//! CLI smoke tests against the built `aspanel` binary.

mod common;

use std::fs;

use serde_json::Value;

const FAVORITES: &str = "Hub,12345\nParrot,40894\n#comment\n\nClub,57699";
const STATUS: &str = "NODE PEER STATE\n12345 10.0.0.1 ESTABLISHED\n2000 10.0.0.2 CONNECTING\n";

fn parse_json(stdout: &str) -> Value {
    serde_json::from_str(stdout.trim()).expect("stdout is one JSON line")
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: aspanel [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_flags_work() {
    for sub in ["run", "status", "favorites", "config"] {
        let result = common::run_cli_case(&format!("help_{sub}"), &[sub, "--help"]);
        assert!(
            result.status.success(),
            "{sub} --help failed; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn unknown_subcommand_fails() {
    let result = common::run_cli_case("unknown_subcommand_fails", &["scan"]);
    assert!(!result.status.success());
}

#[test]
fn favorites_lists_entries_in_order() {
    let fixture = common::PanelFixture::new(FAVORITES, STATUS);
    let config = fixture.config_arg();
    let result = common::run_cli_case(
        "favorites_lists_entries_in_order",
        &["--config", &config, "--json", "favorites"],
    );
    assert!(
        result.status.success(),
        "favorites failed; log: {}",
        result.log_path.display()
    );

    let json = parse_json(&result.stdout);
    let entries = json["favorites"].as_array().expect("favorites array");
    let pairs: Vec<(&str, &str)> = entries
        .iter()
        .map(|e| (e["name"].as_str().unwrap(), e["node_id"].as_str().unwrap()))
        .collect();
    assert_eq!(
        pairs,
        [("Hub", "12345"), ("Parrot", "40894"), ("Club", "57699")]
    );
    assert_eq!(json["malformed_lines"], 0);
}

#[test]
fn favorites_reports_overflow_and_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("favorites.txt");
    let mut raw = String::from("just-a-name\n");
    for i in 0..8 {
        raw.push_str(&format!("Fav{i},{}\n", 1000 + i));
    }
    fs::write(&path, raw).unwrap();

    let path_arg = path.display().to_string();
    let result = common::run_cli_case(
        "favorites_reports_overflow",
        &["--json", "favorites", "--path", &path_arg],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let json = parse_json(&result.stdout);
    assert_eq!(json["favorites"].as_array().unwrap().len(), 6);
    assert_eq!(json["malformed_lines"], 1);
    assert_eq!(json["overflow_lines"], 2);
}

#[test]
fn favorites_missing_file_is_runtime_error() {
    let result = common::run_cli_case(
        "favorites_missing_file",
        &["favorites", "--path", "/nonexistent/aspanel/favorites.txt"],
    );
    assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("ASP-2001"));
}

#[test]
fn status_polls_once() {
    let fixture = common::PanelFixture::new(FAVORITES, STATUS);
    let config = fixture.config_arg();
    let result = common::run_cli_case("status_polls_once", &["--config", &config, "--json", "status"]);
    assert!(
        result.status.success(),
        "status failed; log: {}",
        result.log_path.display()
    );

    let json = parse_json(&result.stdout);
    let nodes = json["snapshot"]["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0]["node_id"], "12345");
    assert_eq!(json["snapshot"]["stale"], false);
    assert!(json["error"].is_null());
}

#[test]
fn status_with_unparseable_output_fails() {
    let fixture = common::PanelFixture::new(FAVORITES, "Connection refused\n");
    let config = fixture.config_arg();
    let result = common::run_cli_case(
        "status_unparseable",
        &["--config", &config, "--json", "status"],
    );
    assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
    let json = parse_json(&result.stdout);
    assert_eq!(json["error"]["code"], "ASP-2102");
    assert_eq!(json["error"]["retryable"], true);
}

#[test]
fn config_validate_accepts_fixture() {
    let fixture = common::PanelFixture::new(FAVORITES, STATUS);
    let config = fixture.config_arg();
    let result = common::run_cli_case(
        "config_validate_accepts_fixture",
        &["--config", &config, "--json", "config", "validate"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let json = parse_json(&result.stdout);
    assert_eq!(json["valid"], true);
    assert!(json["hash"].as_str().is_some_and(|h| !h.is_empty()));
}

#[test]
fn config_validate_rejects_missing_node_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[timing]\nrender_interval_ms = 1000\n").unwrap();
    let path_arg = path.display().to_string();

    let result = common::run_cli_case(
        "config_validate_rejects_missing_node_id",
        &["--config", &path_arg, "--json", "config", "validate"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    let json = parse_json(&result.stdout);
    assert_eq!(json["valid"], false);
    assert_eq!(json["code"], "ASP-1001");
}

#[test]
fn config_path_reports_explicit_path() {
    let result = common::run_cli_case(
        "config_path_reports_explicit_path",
        &["--config", "/tmp/aspanel-does-not-exist.toml", "--json", "config", "path"],
    );
    assert!(result.status.success());
    let json = parse_json(&result.stdout);
    assert_eq!(json["path"], "/tmp/aspanel-does-not-exist.toml");
    assert_eq!(json["exists"], false);
}

#[test]
fn config_show_prints_effective_config() {
    let fixture = common::PanelFixture::new(FAVORITES, STATUS);
    let config = fixture.config_arg();
    let result = common::run_cli_case(
        "config_show_prints_effective_config",
        &["--config", &config, "--json", "config", "show"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let json = parse_json(&result.stdout);
    assert_eq!(json["config"]["node"]["local_node_id"], "58175");
    assert_eq!(json["config"]["timing"]["status_poll_interval_ms"], 5000);
}

#[test]
fn run_fails_without_button_hardware() {
    let fixture = common::PanelFixture::new(FAVORITES, STATUS);
    let extra = format!(
        "\n[hardware]\nbutton_a_path = \"{0}/missing-a\"\nbutton_b_path = \"{0}/missing-b\"\nframe_path = \"{0}/frame.json\"\n",
        fixture.path().display()
    );
    let mut raw = fs::read_to_string(&fixture.config_path).unwrap();
    raw.push_str(&extra);
    fs::write(&fixture.config_path, raw).unwrap();

    let config = fixture.config_arg();
    let result = common::run_cli_case("run_fails_without_button_hardware", &["--config", &config, "run"]);
    assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("ASP-1201"));
}
