use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidFormat,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    UnknownEnvironment,
    UnknownOperation,
    ExtensionNotFound,

    ConnectionFailed,
    NoActiveConnection,
    AlreadyConnected,

    LocalCommandFailed,
    LocalTimeout,
    RemoteCommandFailed,

    RunFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidFormat => "config.invalid_format",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::UnknownEnvironment => "context.unknown_environment",
            ErrorCode::UnknownOperation => "registry.unknown_operation",
            ErrorCode::ExtensionNotFound => "extension.not_found",

            ErrorCode::ConnectionFailed => "ssh.connect_failed",
            ErrorCode::NoActiveConnection => "ssh.no_active_connection",
            ErrorCode::AlreadyConnected => "ssh.already_connected",

            ErrorCode::LocalCommandFailed => "local.command_failed",
            ErrorCode::LocalTimeout => "local.command_timeout",
            ErrorCode::RemoteCommandFailed => "remote.command_failed",

            ErrorCode::RunFailed => "run.failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidFormatDetails {
    pub path: String,
    pub format: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownEnvironmentDetails {
    pub name: String,
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownOperationDetails {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFailedDetails {
    pub host: String,
    pub cause: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlreadyConnectedDetails {
    pub connected_host: String,
    pub requested_host: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub captured_output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTimeoutDetails {
    pub command: String,
    pub timeout_secs: f64,
    pub captured_output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub last_error: String,
    pub last_output: String,
    pub sudo: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailedDetails {
    pub run_id: String,
    pub task: String,
    pub total: usize,
    pub failed: usize,
    pub failed_hosts: Vec<Option<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration key '{}'", key),
            to_details(ConfigMissingKeyDetails { key, path }),
        )
    }

    pub fn config_invalid_format(
        path: impl Into<String>,
        format: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ConfigInvalidFormat,
            format!("Could not parse configuration file {}", path),
            to_details(ConfigInvalidFormatDetails {
                path,
                format: format.into(),
                error: error.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn validation_missing_argument(args: Vec<String>, task: Option<String>) -> Self {
        let message = match &task {
            Some(task) => format!(
                "Missing required argument(s) for task '{}': {}",
                task,
                args.join(", ")
            ),
            None => format!("Missing required argument(s): {}", args.join(", ")),
        };
        Self::new(
            ErrorCode::ValidationMissingArgument,
            message,
            to_details(MissingArgumentDetails { args, task }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            problem.clone(),
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem,
                id,
            }),
        )
    }

    pub fn unknown_environment(name: impl Into<String>, available: Vec<String>) -> Self {
        let name = name.into();
        let message = format!(
            "Wrong environment \"{}\". Available [{}]",
            name,
            available.join(", ")
        );
        Self::new(
            ErrorCode::UnknownEnvironment,
            message,
            to_details(UnknownEnvironmentDetails { name, available }),
        )
        .with_hint("Run 'hostrun envs' to see configured environments")
    }

    pub fn unknown_operation(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::UnknownOperation,
            format!("Call to undefined task or method \"{}\"", name),
            to_details(UnknownOperationDetails { name }),
        )
        .with_hint("Run 'hostrun tasks' to see registered tasks and methods")
    }

    pub fn extension_not_found(name: impl Into<String>, available: Vec<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::ExtensionNotFound,
            format!("Extension '{}' is not available", name),
            serde_json::json!({ "name": name, "available": available }),
        )
    }

    pub fn connection_failed(host: impl Into<String>, cause: impl Into<String>) -> Self {
        let host = host.into();
        let cause = cause.into();
        let mut err = Self::new(
            ErrorCode::ConnectionFailed,
            format!("Could not connect to {}: {}", host, cause),
            to_details(ConnectionFailedDetails { host, cause }),
        );
        err.retryable = Some(true);
        err
    }

    pub fn no_active_connection() -> Self {
        Self::new(
            ErrorCode::NoActiveConnection,
            "Remote function need a valid environment",
            Value::Object(serde_json::Map::new()),
        )
        .with_hint("Specify the --env parameter")
    }

    pub fn already_connected(
        connected_host: impl Into<String>,
        requested_host: impl Into<String>,
    ) -> Self {
        let connected_host = connected_host.into();
        let requested_host = requested_host.into();
        Self::new(
            ErrorCode::AlreadyConnected,
            format!(
                "Already connected to {}; close the connection before opening {}",
                connected_host, requested_host
            ),
            to_details(AlreadyConnectedDetails {
                connected_host,
                requested_host,
            }),
        )
    }

    pub fn local_command_failed(details: LocalCommandFailedDetails) -> Self {
        let message = format!("Local command fail (exit {})", details.exit_code);
        Self::new(ErrorCode::LocalCommandFailed, message, to_details(details))
    }

    pub fn local_timeout(details: LocalTimeoutDetails) -> Self {
        let message = format!(
            "Local command exceeded the timeout of {}s",
            details.timeout_secs
        );
        Self::new(ErrorCode::LocalTimeout, message, to_details(details))
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let message = format!("Remote command fail: {}", details.last_error.trim());
        Self::new(ErrorCode::RemoteCommandFailed, message, to_details(details))
    }

    pub fn run_failed(details: RunFailedDetails) -> Self {
        Self::new(
            ErrorCode::RunFailed,
            "One or more hosts failed",
            to_details(details),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Exit status carried by a command failure, if any.
    pub fn exit_code(&self) -> Option<i32> {
        self.details
            .get("exitCode")
            .and_then(Value::as_i64)
            .map(|code| code as i32)
    }

    /// Output captured before the failure, for per-host diagnostics.
    pub fn captured_output(&self) -> Option<&str> {
        self.details
            .get("capturedOutput")
            .or_else(|| self.details.get("lastOutput"))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_environment_lists_available_names() {
        let err = Error::unknown_environment(
            "qa",
            vec!["staging".to_string(), "prod".to_string()],
        );
        assert_eq!(err.code, ErrorCode::UnknownEnvironment);
        assert_eq!(err.message, "Wrong environment \"qa\". Available [staging, prod]");
        assert_eq!(err.details["available"][1], "prod");
    }

    #[test]
    fn local_command_failed_exposes_exit_code_and_output() {
        let err = Error::local_command_failed(LocalCommandFailedDetails {
            command: "exit 3".to_string(),
            exit_code: 3,
            captured_output: "boom\n".to_string(),
        });
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.captured_output(), Some("boom\n"));
        assert_eq!(err.code.as_str(), "local.command_failed");
    }

    #[test]
    fn connection_failure_is_retryable() {
        let err = Error::connection_failed("web1", "Connection refused");
        assert_eq!(err.retryable, Some(true));
        assert_eq!(err.details["host"], "web1");
    }
}
