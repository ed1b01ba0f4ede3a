#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_aspanel") {
        return PathBuf::from(path);
    }

    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join("aspanel"));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve aspanel binary path for integration test"),
    }
}

/// Base command with a scrubbed `ASP_*` environment.
pub fn base_command() -> Command {
    let mut cmd = Command::new(resolve_bin_path());
    for (key, _) in std::env::vars() {
        if key.starts_with("ASP_") {
            cmd.env_remove(key);
        }
    }
    cmd.env("RUST_BACKTRACE", "1");
    cmd
}

fn write_case_log(case_name: &str, args: &[&str], output: &Output) -> CmdResult {
    let root = std::env::temp_dir().join("aspanel-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");
    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let output = base_command()
        .args(args)
        .output()
        .expect("execute aspanel command");
    write_case_log(case_name, args, &output)
}

/// Start the daemon with piped stdio.
pub fn spawn_cli(args: &[&str]) -> Child {
    base_command()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn aspanel")
}

/// Collect a finished child into a logged result.
pub fn finish_case(case_name: &str, args: &[&str], child: Child) -> CmdResult {
    let output = child.wait_with_output().expect("wait for aspanel");
    write_case_log(case_name, args, &output)
}

/// A panel setup in a temp dir: favorites file, a fake node CLI built from
/// `echo`, and a config pointing at both.
pub struct PanelFixture {
    pub dir: tempfile::TempDir,
    pub config_path: PathBuf,
    pub favorites_path: PathBuf,
    pub links_path: PathBuf,
    pub log_path: PathBuf,
}

impl PanelFixture {
    pub fn new(favorites: &str, status_output: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let favorites_path = dir.path().join("favorites.txt");
        let links_path = dir.path().join("links.log");
        let log_path = dir.path().join("activity.jsonl");
        let status_path = dir.path().join("status.txt");
        fs::write(&favorites_path, favorites).expect("write favorites");
        fs::write(&status_path, status_output).expect("write status output");

        let config = format!(
            r#"[node]
local_node_id = "58175"
favorites_path = "{favorites}"

[commands]
status_template = "cat {status} # {{local}}"
connect_template = "echo connect {{local}} {{node}} >> {links}"
disconnect_template = "echo disconnect {{local}} {{node}} >> {links}"
timeout_ms = 2000

[timing]
startup_delay_ms = 0

[logging]
jsonl_path = "{log}"
verbose = true
"#,
            favorites = favorites_path.display(),
            status = status_path.display(),
            links = links_path.display(),
            log = log_path.display(),
        );
        let config_path = dir.path().join("config.toml");
        let mut file = fs::File::create(&config_path).expect("create config");
        file.write_all(config.as_bytes()).expect("write config");

        Self {
            dir,
            config_path,
            favorites_path,
            links_path,
            log_path,
        }
    }

    pub fn config_arg(&self) -> String {
        self.config_path.display().to_string()
    }

    pub fn links(&self) -> String {
        fs::read_to_string(&self.links_path).unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
