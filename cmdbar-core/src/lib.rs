use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod layout;
pub mod registry;

pub use layout::{OverlaySurface, Point, ScreenRect, Size};
pub use registry::{OverlayEntry, OverlayId, OverlayPhase, OverlayRegistry};

pub const DEFAULT_PORT: u16 = 4756;
pub const MAX_PORT_ATTEMPTS: u16 = 10;
pub const MAX_COMMAND_BODY_BYTES: usize = 64 * 1024;
pub const COMMAND_PATH: &str = "/command";
const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// One unit of work reported by the task runner.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Command {
    pub id: i64,
    pub text: String,
    #[serde(rename = "duration")]
    pub duration_nanos: u64,
}

impl Command {
    pub fn new(id: i64, text: impl Into<String>, duration: Duration) -> Self {
        Self {
            id,
            text: text.into(),
            duration_nanos: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Display-only; countdown correctness goes through [`Command::duration`].
    pub fn duration_seconds(&self) -> f64 {
        self.duration_nanos as f64 / NANOS_PER_SECOND
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed command payload: {0}")]
    Malformed(#[from] FieldError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("body is empty")]
    EmptyBody,
    #[error("body is not valid UTF-8")]
    NotUtf8,
    #[error("body is not valid JSON: {0}")]
    Syntax(String),
    #[error("body must be a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field `duration` must be non-negative, got {0}")]
    NegativeDuration(i64),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Parses one request body into a [`Command`].
///
/// Each required field is checked on its own so the caller learns which one
/// was wrong. Unknown fields are ignored.
pub fn decode_command(raw: &[u8]) -> Result<Command, DecodeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(FieldError::EmptyBody.into());
    }

    let text = std::str::from_utf8(raw).map_err(|_| FieldError::NotUtf8)?;
    let value: Value =
        serde_json::from_str(text).map_err(|err| FieldError::Syntax(err.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(FieldError::NotAnObject.into());
    };

    Ok(Command {
        id: read_id(&fields)?,
        text: read_text(&fields)?,
        duration_nanos: read_duration(&fields)?,
    })
}

pub fn encode_command(command: &Command) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(command)?)
}

fn required<'a>(fields: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, FieldError> {
    fields.get(name).ok_or(FieldError::Missing(name))
}

fn read_id(fields: &Map<String, Value>) -> Result<i64, FieldError> {
    required(fields, "id")?
        .as_i64()
        .ok_or(FieldError::WrongType {
            field: "id",
            expected: "a 64-bit integer",
        })
}

fn read_text(fields: &Map<String, Value>) -> Result<String, FieldError> {
    match required(fields, "text")? {
        Value::String(text) => Ok(text.clone()),
        _ => Err(FieldError::WrongType {
            field: "text",
            expected: "a string",
        }),
    }
}

fn read_duration(fields: &Map<String, Value>) -> Result<u64, FieldError> {
    let value = required(fields, "duration")?;
    if let Some(nanos) = value.as_u64() {
        return Ok(nanos);
    }
    match value.as_i64() {
        Some(negative) => Err(FieldError::NegativeDuration(negative)),
        None => Err(FieldError::WrongType {
            field: "duration",
            expected: "an integer number of nanoseconds",
        }),
    }
}
