pub mod config;
pub mod doctor;
pub mod fee;
pub mod freshness;
pub mod migrate;
pub mod preload;
pub mod recommend;
pub mod seed;

use fincalc_core::errors::{ApplicationError, InterfaceError};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Failure tuple shared by commands: error class, message, exit code.
pub(crate) type Failure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub(crate) fn from_outcome(command: &str, outcome: Result<(String, Value), Failure>) -> Self {
        match outcome {
            Ok((message, data)) => Self::success_with_data(command, message, Some(data)),
            Err((error_class, message, exit_code)) => {
                Self::failure(command, error_class, message, exit_code)
            }
        }
    }
}

pub(crate) fn to_data<T: Serialize>(value: &T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|error| ("serialization", error.to_string(), 7u8))
}

/// Maps a service error to its user-facing class and advisory text. The
/// command name doubles as the correlation id.
pub(crate) fn application_failure(command: &str, error: ApplicationError) -> Failure {
    let interface = error.into_interface(command);
    let (error_class, exit_code) = match &interface {
        InterfaceError::BadRequest { .. } => ("bad_request", 2u8),
        InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 3u8),
        InterfaceError::Internal { .. } => ("internal", 3u8),
    };
    (error_class, format!("{} ({interface})", interface.user_message()), exit_code)
}

pub(crate) fn current_thread_runtime() -> Result<tokio::runtime::Runtime, Failure> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| ("runtime_init", format!("failed to initialize async runtime: {error}"), 3u8))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
