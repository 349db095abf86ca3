//! CLI response formatting and output.
//!
//! Provides JSON envelope, printing, and exit code mapping.

use hostrun::error::Hint;
use hostrun::{Error, ErrorCode, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize response".to_string()))
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: (!err.hints.is_empty()).then(|| err.hints.clone()),
                retryable: err.retryable,
            }),
        }
    }
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    use std::io::{self, Write};

    let payload = response.to_json()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        ));
    }
    Ok(())
}

pub fn print_json_result(result: Result<serde_json::Value>) -> Result<()> {
    match result {
        Ok(data) => print_response(&CliResponse::success(data)),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    }
}

pub fn map_cmd_result_to_json<T: Serialize>(
    result: Result<(T, i32)>,
) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_json(
                    err.to_string(),
                    Some("serialize response".to_string()),
                )),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(err.code);
            (Err(err), exit_code)
        }
    }
}

fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigMissingKey
        | ErrorCode::ConfigInvalidFormat
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ValidationMissingArgument
        | ErrorCode::ValidationInvalidArgument => 2,

        ErrorCode::UnknownEnvironment
        | ErrorCode::UnknownOperation
        | ErrorCode::ExtensionNotFound => 4,

        ErrorCode::ConnectionFailed
        | ErrorCode::NoActiveConnection
        | ErrorCode::AlreadyConnected => 10,

        ErrorCode::LocalCommandFailed
        | ErrorCode::LocalTimeout
        | ErrorCode::RemoteCommandFailed => 20,

        ErrorCode::RunFailed => 30,

        ErrorCode::InternalIoError
        | ErrorCode::InternalJsonError
        | ErrorCode::InternalUnexpected => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_envelope_carries_code_details_and_hints() {
        let err = Error::unknown_environment("qa", vec!["prod".to_string()]);
        let value = serde_json::to_value(CliResponse::<()>::from_error(&err)).unwrap();

        assert_eq!(value["success"], false);
        assert!(value.get("data").is_none());
        assert_eq!(value["error"]["code"], "context.unknown_environment");
        assert_eq!(value["error"]["details"]["available"], json!(["prod"]));
        assert_eq!(
            value["error"]["hints"][0]["message"],
            "Run 'hostrun envs' to see configured environments"
        );
    }

    #[test]
    fn success_keeps_the_given_exit_code() {
        let (value, code) = map_cmd_result_to_json(Ok((json!({ "ok": 1 }), 0)));
        assert_eq!(value.unwrap()["ok"], 1);
        assert_eq!(code, 0);
    }

    #[test]
    fn error_exit_codes_follow_category() {
        let cases = [
            (Error::validation_missing_argument(vec!["x".into()], None), 2),
            (Error::unknown_operation("x"), 4),
            (Error::connection_failed("h", "refused"), 10),
            (Error::no_active_connection(), 10),
            (Error::internal_unexpected("boom"), 1),
        ];
        for (err, expected) in cases {
            let (_, code) = map_cmd_result_to_json::<()>(Err(err));
            assert_eq!(code, expected);
        }
        assert_eq!(exit_code_for_error(ErrorCode::RunFailed), 30);
        assert_eq!(exit_code_for_error(ErrorCode::LocalTimeout), 20);
    }
}
