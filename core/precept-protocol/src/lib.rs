//! IPC protocol types and validation for the Precept daemon.
//!
//! This crate is shared by the daemon and the chat-transport adapter that feeds
//! it, so both sides agree on one schema. The daemon remains the authority on
//! validation; adapters reuse the same types to build valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
/// Largest text body the chat transport accepts in one message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    DrainOutbox,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self::error_with_info(id, ErrorInfo::new(code, message))
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// One update received from the chat network, already downloaded to local
/// files where media is involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundEvent {
    pub event_id: String,
    pub recorded_at: String,
    pub sender_id: i64,
    pub chat_id: i64,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A slash command, without the leading `/`.
    Command {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Text {
        text: String,
    },
    /// Inline button press carrying namespaced callback data (`menu:status`).
    Button {
        data: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Photo {
        file_path: String,
        #[serde(default)]
        caption: Option<String>,
    },
    Voice {
        file_path: String,
    },
    Document {
        file_path: String,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        file_size: Option<u64>,
    },
}

impl EventPayload {
    pub fn shape(&self) -> &'static str {
        match self {
            EventPayload::Command { .. } => "command",
            EventPayload::Text { .. } => "text",
            EventPayload::Button { .. } => "button",
            EventPayload::Location { .. } => "location",
            EventPayload::Photo { .. } => "photo",
            EventPayload::Voice { .. } => "voice",
            EventPayload::Document { .. } => "document",
        }
    }
}

impl InboundEvent {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.event_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_event_id", "event_id is required"));
        }
        if self.event_id.len() > 128 {
            return Err(ErrorInfo::new(
                "invalid_event_id",
                "event_id must be 128 characters or fewer",
            ));
        }

        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be RFC3339",
            ));
        }

        if self.sender_id == 0 {
            return Err(ErrorInfo::new("invalid_sender", "sender_id is required"));
        }

        match &self.payload {
            EventPayload::Command { name, .. } => require_string(name, "name")?,
            EventPayload::Text { text } => require_string(text, "text")?,
            EventPayload::Button { data } => require_string(data, "data")?,
            EventPayload::Location {
                latitude,
                longitude,
            } => {
                if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) {
                    return Err(ErrorInfo::new(
                        "invalid_location",
                        "latitude/longitude out of range",
                    ));
                }
            }
            EventPayload::Photo { file_path, .. }
            | EventPayload::Voice { file_path }
            | EventPayload::Document { file_path, .. } => require_string(file_path, "file_path")?,
        }

        Ok(())
    }
}

pub fn parse_event(params: Value) -> Result<InboundEvent, ErrorInfo> {
    let event: InboundEvent = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("event payload is invalid JSON: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

/// A message the transport should deliver to `chat_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Keyboard {
    /// Buttons attached to the message; presses come back as `Button` events.
    Inline { rows: Vec<Vec<InlineButton>> },
    /// Persistent keyboard replacing the device keyboard; taps arrive as text.
    Reply { rows: Vec<Vec<String>> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub label: String,
    pub data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}
