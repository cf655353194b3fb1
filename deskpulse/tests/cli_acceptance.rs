use deskpulse_core::Database;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        for dir in [&home, &xdg_data, &xdg_config, &xdg_state, &xdg_runtime] {
            fs::create_dir_all(dir).expect("failed to create test directory");
        }

        Self {
            temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("deskpulse/data.db")
    }

    /// Point the collector at a local port nobody listens on.
    fn use_unreachable_collector(&self) {
        let dir = self.xdg_config.join("deskpulse");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(
            dir.join("config.toml"),
            "[api]\nbase_url = \"http://127.0.0.1:9\"\ntimeout_secs = 2\n",
        )
        .expect("failed to write config");
    }

    fn write_events(&self, lines: &[&str]) -> PathBuf {
        let path = self.temp_dir.path().join("events.jsonl");
        fs::write(&path, lines.join("\n")).expect("failed to write events file");
        path
    }

    fn open_db(&self) -> Database {
        let db = Database::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        db
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("deskpulse"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_runtime)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute deskpulse: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "deskpulse {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn status_on_fresh_install() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, &["status"]);
    assert_success(&["status"], &output);

    let out = stdout(&output);
    assert!(out.contains("deskpulse Status"));
    assert!(out.contains("API Token:       <not set>"), "got:\n{out}");
    assert!(out.contains("No sessions recorded yet."));
    assert!(!env.db_path().exists());
}

#[test]
fn login_and_logout_manage_the_token() {
    let env = CliTestEnv::new();

    let login = run_bin(&env, &["login", "secret-token-9876"]);
    assert_success(&["login"], &login);
    assert!(stdout(&login).contains("****9876"));
    // The token itself never reaches the terminal
    assert!(!stdout(&login).contains("secret-token"));

    let status = run_bin(&env, &["status"]);
    assert_success(&["status"], &status);
    assert!(stdout(&status).contains("API Token:       ****9876"));

    let logout = run_bin(&env, &["logout"]);
    assert_success(&["logout"], &logout);
    assert_eq!(env.open_db().api_token().unwrap(), None);
}

#[test]
fn login_rejects_blank_token() {
    let env = CliTestEnv::new();
    let output = run_bin(&env, &["login", "   "]);
    assert!(!output.status.success());
}

#[test]
fn sync_without_token_is_a_no_op() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, &["sync"]);
    assert_success(&["sync"], &output);
    assert!(stdout(&output).contains("No API token set"));
}

#[test]
fn run_records_sessions_from_events_file() {
    let env = CliTestEnv::new();
    let events = env.write_events(&[
        r#"{"process_name":"code","window_title":"main.rs","observed_at":1700000000000}"#,
        r#"{"process_name":"code","window_title":"main.rs","observed_at":1700000005000}"#,
        "not json",
        r#"{"process_name":"firefox","window_title":"Docs","extra_info":"https://docs.rs/","observed_at":1700000010000}"#,
        r#"{"process_name":"slack","window_title":"general","observed_at":1700000020000}"#,
    ]);
    let events_arg = events.to_string_lossy().into_owned();

    let output = run_bin(&env, &["run", "--events", &events_arg]);
    assert_success(&["run", "--events"], &output);
    let out = stdout(&output);
    assert!(out.contains("Events received:   4"), "got:\n{out}");
    assert!(out.contains("Sessions saved:    3"), "got:\n{out}");

    let db = env.open_db();
    let sessions = db.sessions_since(0, 10).unwrap();
    let names: Vec<_> = sessions.iter().map(|s| s.application_name.as_str()).collect();
    assert_eq!(names, vec!["code", "Internet", "slack"]);
    assert_eq!(sessions[0].end_time, 1_700_000_010_000);
    // No token: nothing was uploaded
    assert_eq!(db.sync_cursor().unwrap(), 0);

    let status = run_bin(&env, &["status"]);
    assert_success(&["status"], &status);
    assert!(stdout(&status).contains("Pending:         3"));
}

#[test]
fn unreachable_collector_keeps_sessions_pending() {
    let env = CliTestEnv::new();
    env.use_unreachable_collector();
    assert_success(&["login"], &run_bin(&env, &["login", "token-1234"]));

    let events = env.write_events(&[
        r#"{"process_name":"code","window_title":"a","observed_at":1700000000000}"#,
        r#"{"process_name":"term","window_title":"b","observed_at":1700000001000}"#,
    ]);
    let events_arg = events.to_string_lossy().into_owned();

    // Capture never fails because of the network
    let run = run_bin(&env, &["run", "--events", &events_arg]);
    assert_success(&["run", "--events"], &run);

    let sync = run_bin(&env, &["sync"]);
    assert!(!sync.status.success());
    assert!(String::from_utf8_lossy(&sync.stderr).contains("upload failed"));

    let db = env.open_db();
    assert_eq!(db.sync_cursor().unwrap(), 0);
    assert_eq!(db.count_sessions_since(0).unwrap(), 2);
}
