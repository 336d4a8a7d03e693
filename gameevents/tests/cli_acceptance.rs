use gameevents_core::Database;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Collector endpoint nothing listens on, so delivery always fails fast
const UNREACHABLE_CONFIG: &str = r#"
[collector]
server_url = "http://127.0.0.1:9"
timeout_secs = 1
max_retries = 0
"#;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    /// Environment whose collector endpoint is unreachable
    fn offline() -> Self {
        let env = Self::new();
        let config_dir = env.xdg_config.join("gameevents");
        fs::create_dir_all(&config_dir).expect("failed to create config dir");
        fs::write(config_dir.join("config.toml"), UNREACHABLE_CONFIG)
            .expect("failed to write config");
        env
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("gameevents/events.db")
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("gameevents"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("GAMEEVENTS_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute gameevents: {e}"))
}

fn render(args: &[&str], output: &Output) -> String {
    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "gameevents {rendered_args}\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

fn assert_success(args: &[&str], output: &Output) {
    if !output.status.success() {
        panic!("command failed\n{}", render(args, output));
    }
}

fn pending_events(env: &CliTestEnv) -> i64 {
    let db = Database::open(&env.db_path()).expect("failed to open db");
    db.migrate().expect("failed to migrate db");
    db.count_events().expect("failed to count events")
}

#[test]
fn status_without_local_store() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, &["status"]);
    assert_success(&["status"], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("GameEvents Client Status"));
    assert!(stdout.contains("Batch Size:      50"));
    assert!(stdout.contains("recurring flush every 10s"));
    assert!(stdout.contains("<not created>"));
    assert!(!env.db_path().exists(), "status must not create the store");
}

#[test]
fn demo_persists_events_when_offline() {
    let env = CliTestEnv::offline();
    let args = ["demo", "--api-key", "gk_test", "--seconds", "0"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Queued before initialize: 1"));
    assert!(stdout.contains("Session Summary:"));
    assert!(stdout.contains("Tracking authorization: Authorized (3)"));

    // session_start, app_open, game_started, level_complete
    assert_eq!(pending_events(&env), 4);

    let status = run_bin(&env, &["status", "--json"]);
    assert_success(&["status", "--json"], &status);
    let value: serde_json::Value =
        serde_json::from_slice(&status.stdout).expect("status --json should print JSON");
    assert_eq!(value["pending_events"], 4);
    assert!(value["user_id"].is_string());
    assert_eq!(value["server_url"], "http://127.0.0.1:9");
}

#[test]
fn demo_keeps_user_id_across_runs() {
    let env = CliTestEnv::offline();
    let args = ["demo", "--api-key", "gk_test", "--seconds", "0"];

    assert_success(&args, &run_bin(&env, &args));
    let first = Database::open(&env.db_path())
        .and_then(|db| db.get_user_id())
        .expect("failed to read user id");

    assert_success(&args, &run_bin(&env, &args));
    let second = Database::open(&env.db_path())
        .and_then(|db| db.get_user_id())
        .expect("failed to read user id");

    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(pending_events(&env), 8);
}

#[test]
fn flush_failure_keeps_backlog() {
    let env = CliTestEnv::offline();
    let demo = ["demo", "--api-key", "gk_test", "--seconds", "0"];
    assert_success(&demo, &run_bin(&env, &demo));

    let args = ["flush", "--api-key", "gk_test"];
    let output = run_bin(&env, &args);
    assert!(
        !output.status.success(),
        "flush should fail against an unreachable server\n{}",
        render(&args, &output)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("delivery stopped"));
    assert_eq!(pending_events(&env), 4);
}

#[test]
fn flush_without_store_is_a_no_op() {
    let env = CliTestEnv::offline();
    let args = ["flush", "--api-key", "gk_test"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Nothing to flush"));
}

#[test]
fn flush_requires_api_key() {
    let env = CliTestEnv::offline();
    let output = run_bin(&env, &["flush"]);
    assert!(!output.status.success());
}
