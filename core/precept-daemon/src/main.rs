//! Precept daemon entrypoint.
//!
//! A small, single-writer service that owns dialogue state and the SQLite
//! store. A chat adapter forwards each update as an `event` request over the
//! Unix socket, delivers the returned messages, and polls `drain_outbox` for
//! the scheduled digests.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use precept_core::{
    clock::fixed_offset, load_config, Db, Engine, PreceptConfig, Reporter, Schedule,
};
use precept_protocol::{
    parse_event, ErrorInfo, Method, OutboundMessage, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

mod state;

use state::SharedState;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
// Upper bound on one reporter sleep, so wall-clock jumps are noticed.
const REPORTER_MAX_SLEEP_SECS: u64 = 60;
const LOG_FILE_PREFIX: &str = "precept-daemon.log";

fn main() {
    let _log_guard = init_logging();

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Err(err) = config.validate() {
        error!(error = %err, "Configuration is incomplete");
        std::process::exit(1);
    }

    let db = match Db::open(config.db_path.clone()) {
        Ok(db) => db,
        Err(err) => {
            error!(
                error = %err,
                kind = ?err.storage_kind(),
                path = %config.db_path.display(),
                "Failed to initialize database"
            );
            std::process::exit(1);
        }
    };

    let engine = match Engine::from_config(&config, db.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "Failed to initialize dialogue engine");
            std::process::exit(1);
        }
    };
    let shared_state = Arc::new(SharedState::new(db, engine));

    // Runs even when reminders start off; `/reminders` flips the switch at runtime.
    match Schedule::from_config(
        &config.reporter,
        fixed_offset(config.reporter.utc_offset_minutes),
    ) {
        Ok(schedule) => spawn_reporter(Arc::clone(&shared_state), schedule, &config),
        Err(err) => warn!(error = %err, "Reporter disabled: invalid schedule"),
    }

    let socket_path = config.socket_path.clone();
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        projects_dir = %config.projects_dir.display(),
        transcription = config.transcription_enabled(),
        "Precept daemon started"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

/// Sleeps until the next briefing or wrap-up, then queues the digest for the
/// operator's chat.
fn spawn_reporter(state: Arc<SharedState>, schedule: Schedule, config: &PreceptConfig) {
    let chat_id = config.allowed_user_id;
    let reporter = Reporter::new(state.db().clone(), state.reminders(), schedule.offset());

    thread::spawn(move || {
        let mut cursor = chrono::Utc::now();
        loop {
            let (fire_at, kind) = schedule.next_fire(cursor);
            state.set_next_digest(fire_at, kind);
            info!(kind = kind.as_str(), at = %fire_at.to_rfc3339(), "Next digest scheduled");

            loop {
                let remaining = (fire_at - chrono::Utc::now()).num_seconds();
                if remaining <= 0 {
                    break;
                }
                let nap = (remaining as u64).min(REPORTER_MAX_SLEEP_SECS);
                thread::sleep(Duration::from_secs(nap));
            }

            let woke_at = chrono::Utc::now();
            cursor = Schedule::resume_after(fire_at, woke_at);
            if Schedule::is_stale(fire_at, woke_at) {
                warn!(
                    kind = kind.as_str(),
                    due = %fire_at.to_rfc3339(),
                    "Digest slot missed; skipping"
                );
                continue;
            }

            match reporter.digest(kind, fire_at) {
                Ok(Some(text)) => {
                    info!(kind = kind.as_str(), "Digest queued");
                    state.push_outbox(OutboundMessage {
                        chat_id,
                        text,
                        keyboard: None,
                    });
                }
                Ok(None) => {
                    tracing::debug!(kind = kind.as_str(), "Digest skipped");
                }
                Err(err) => {
                    warn!(kind = kind.as_str(), error = %err, retryable = err.is_retryable(), "Digest failed");
                }
            }
        }
    });
}

/// Console logging always; a daily rolling file too when `PRECEPT_LOG_DIR` is
/// set. The returned guard flushes the file writer on drop.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let debug_enabled = env::var("PRECEPT_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (file_layer, guard) = match env::var_os("PRECEPT_LOG_DIR").map(PathBuf::from) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };
    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }
    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            match serde_json::to_value(state.health_snapshot()) {
                Ok(value) => data["state"] = value,
                Err(err) => warn!(error = %err, "Failed to serialize health snapshot"),
            }
            Response::ok(request.id, data)
        }
        Method::Event => handle_event(request, state),
        Method::DrainOutbox => {
            let messages = state.drain_outbox();
            tracing::debug!(count = messages.len(), "Outbox drained");
            match serde_json::to_value(&messages) {
                Ok(value) => Response::ok(request.id, serde_json::json!({ "messages": value })),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize outbox: {}", err),
                ),
            }
        }
    }
}

fn handle_event(request: Request, state: &SharedState) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "event payload is required"),
    };
    let event = match parse_event(params) {
        Ok(event) => event,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    info!(
        event_id = %event.event_id,
        shape = event.payload.shape(),
        chat_id = event.chat_id,
        "Received event"
    );
    let messages = state.handle_event(&event);

    match serde_json::to_value(&messages) {
        Ok(value) => Response::ok(request.id, serde_json::json!({ "messages": value })),
        Err(err) => Response::error(
            request.id,
            "serialization_error",
            format!("Failed to serialize messages: {}", err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
