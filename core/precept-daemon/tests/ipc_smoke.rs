use precept_protocol::{
    EventPayload, InboundEvent, Method, Request, Response, PROTOCOL_VERSION,
};
use serde_json::Value;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const OPERATOR: i64 = 42;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn write_config(home: &Path) -> PathBuf {
    let projects = home.join("Projects");
    std::fs::create_dir_all(projects.join("acme")).expect("create project dir");
    let config = home.join("precept.toml");
    std::fs::write(
        &config,
        format!(
            "allowed_user_id = {OPERATOR}\n\
             projects_dir = {:?}\n\n\
             [git]\nenabled = false\n\n\
             [reporter]\nenabled = false\n",
            projects.to_string_lossy()
        ),
    )
    .expect("write config");
    config
}

fn spawn_daemon(home: &Path, config: Option<&Path>) -> Child {
    let mut command = Command::new(env!("CARGO_BIN_EXE_precept-daemon"));
    command
        .env("HOME", home)
        .env_remove("PRECEPT_CONFIG")
        .env_remove("PRECEPT_ALLOWED_USER_ID")
        .env_remove("PRECEPT_PROJECTS_DIR")
        .env_remove("PRECEPT_DB_PATH")
        .env_remove("PRECEPT_SOCKET_PATH")
        .env_remove("OPENAI_API_KEY")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(config) = config {
        command.env("PRECEPT_CONFIG", config);
    }
    command.spawn().expect("Failed to spawn precept-daemon")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".config").join("precept").join("precept.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };
    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn health(socket: &Path) -> Value {
    let response = send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health".to_string()),
            params: None,
        },
    );
    assert!(response.ok, "health response was not ok");
    response.data.expect("health payload")
}

fn send_event(socket: &Path, id: &str, sender_id: i64, payload: EventPayload) -> Response {
    let event = InboundEvent {
        event_id: id.to_string(),
        recorded_at: "2026-01-30T12:00:00Z".to_string(),
        sender_id,
        chat_id: sender_id,
        payload,
    };
    send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::Event,
            id: Some(id.to_string()),
            params: Some(serde_json::to_value(event).expect("serialize event")),
        },
    )
}

fn messages(response: &Response) -> Vec<Value> {
    response
        .data
        .as_ref()
        .and_then(|data| data.get("messages"))
        .and_then(Value::as_array)
        .cloned()
        .expect("messages array")
}

fn first_text(response: &Response) -> String {
    messages(response)
        .first()
        .and_then(|message| message.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("missing")
        .to_string()
}

#[test]
fn daemon_dialogue_round_trip_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let config = write_config(home.path());
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path(), Some(&config));
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(5));

    let health = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health-check".to_string()),
            params: None,
        },
    );
    assert!(health.ok, "health response was not ok");
    let data = health.data.expect("health payload");
    assert_eq!(data.get("status").and_then(Value::as_str), Some("ok"));
    assert_eq!(
        data.pointer("/state/schema_versions"),
        Some(&serde_json::json!([1, 2, 3]))
    );

    let stranger = send_event(
        &socket,
        "evt-stranger",
        7,
        EventPayload::Command {
            name: "start".to_string(),
            args: Vec::new(),
        },
    );
    assert!(stranger.ok);
    assert!(messages(&stranger).is_empty());

    let selected = send_event(
        &socket,
        "evt-1",
        OPERATOR,
        EventPayload::Command {
            name: "project".to_string(),
            args: vec!["acme".to_string()],
        },
    );
    assert!(selected.ok);
    assert_eq!(first_text(&selected), "Active project: acme");

    let pending = send_event(
        &socket,
        "evt-2",
        OPERATOR,
        EventPayload::Text {
            text: "check generator fuel".to_string(),
        },
    );
    assert_eq!(first_text(&pending), "Save as quick note to acme?");
    let keyboard_type = messages(&pending)[0]
        .pointer("/keyboard/type")
        .and_then(Value::as_str)
        .map(str::to_string);
    assert_eq!(keyboard_type.as_deref(), Some("inline"));

    let saved = send_event(
        &socket,
        "evt-3",
        OPERATOR,
        EventPayload::Button {
            data: "note:save".to_string(),
        },
    );
    assert!(first_text(&saved).starts_with("Note saved to acme/correspondence/"));
    let notes_dir = home.path().join("Projects/acme/correspondence");
    assert_eq!(std::fs::read_dir(notes_dir).expect("notes dir").count(), 1);

    let outbox = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::DrainOutbox,
            id: Some("drain".to_string()),
            params: None,
        },
    );
    assert!(outbox.ok);
    assert!(messages(&outbox).is_empty());
}

#[test]
fn reporter_runs_while_reminders_start_disabled() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let config = write_config(home.path());
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path(), Some(&config));
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(5));

    let deadline = Instant::now() + Duration::from_secs(5);
    let data = loop {
        let data = health(&socket);
        if data.pointer("/state/next_digest_at").is_some_and(Value::is_string) {
            break data;
        }
        assert!(Instant::now() < deadline, "reporter never scheduled a digest");
        sleep(Duration::from_millis(25));
    };
    assert_eq!(
        data.pointer("/state/reminders_enabled"),
        Some(&Value::Bool(false))
    );

    send_event(
        &socket,
        "evt-project",
        OPERATOR,
        EventPayload::Command {
            name: "project".to_string(),
            args: vec!["acme".to_string()],
        },
    );
    let toggled = send_event(
        &socket,
        "evt-reminders",
        OPERATOR,
        EventPayload::Command {
            name: "reminders".to_string(),
            args: Vec::new(),
        },
    );
    assert_eq!(first_text(&toggled), "Daily reminders: on (project: acme)");
    assert_eq!(
        health(&socket).pointer("/state/reminders_enabled"),
        Some(&Value::Bool(true))
    );
}

#[test]
fn daemon_rejects_invalid_events_and_protocol_mismatch() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let config = write_config(home.path());
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path(), Some(&config));
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(5));

    let invalid = send_event(
        &socket,
        "evt-bad",
        0,
        EventPayload::Text {
            text: "hi".to_string(),
        },
    );
    assert!(!invalid.ok);
    assert_eq!(
        invalid.error.as_ref().map(|err| err.code.as_str()),
        Some("invalid_sender")
    );

    let mismatch = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION + 1,
            method: Method::GetHealth,
            id: Some("future".to_string()),
            params: None,
        },
    );
    assert!(!mismatch.ok);
    assert_eq!(
        mismatch.error.as_ref().map(|err| err.code.as_str()),
        Some("protocol_mismatch")
    );
}

#[test]
fn daemon_exits_when_operator_is_not_configured() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let mut child = spawn_daemon(home.path(), None);

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().expect("poll daemon") {
            break status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("daemon kept running without configuration");
        }
        sleep(Duration::from_millis(25));
    };
    assert!(!status.success());
    assert!(!socket_path(home.path()).exists());
}
