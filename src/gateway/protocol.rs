//! Wire types for the line-delimited JSON transport

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{ErrorKind, LauncherError};

/// One request line: `{"id": 1, "command": "launch", "args": {"name": "Survival"}}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

/// Structured failure forwarded to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorPayload {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidRequest,
            message: message.into(),
        }
    }
}

impl From<LauncherError> for ErrorPayload {
    fn from(err: LauncherError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok(Value),
    Error(ErrorPayload),
}

/// One response line: `{"id": 1, "ok": ...}` or `{"id": 1, "error": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Null when the request line could not be parsed
    pub id: Option<u64>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn new(id: Option<u64>, result: Result<Value, ErrorPayload>) -> Self {
        let outcome = match result {
            Ok(value) => Outcome::Ok(value),
            Err(error) => Outcome::Error(error),
        };
        Self { id, outcome }
    }
}

/// Parse a request line, keeping the id when only the rest is malformed
pub fn parse_request(line: &str) -> Result<Request, (Option<u64>, ErrorPayload)> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| (None, ErrorPayload::invalid_request(format!("Malformed JSON: {}", e))))?;
    let id = value.get("id").and_then(Value::as_u64);

    serde_json::from_value(value)
        .map_err(|e| (id, ErrorPayload::invalid_request(format!("Malformed request: {}", e))))
}

// === Command arguments ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArgs {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub mod_loader: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NameArgs {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TerminateArgs {
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct UsernameArgs {
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn responses_use_ok_or_error_keys() {
        let ok = Response::new(Some(7), Ok(json!("Alice")));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"id": 7, "ok": "Alice"}));

        let err = Response::new(
            None,
            Err(LauncherError::NotFound("Ghost".into()).into()),
        );
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "id": null,
                "error": {"kind": "NotFound", "message": "Instance 'Ghost' was not found"}
            })
        );
    }

    #[test]
    fn malformed_lines_keep_what_id_they_can() {
        let (id, err) = parse_request("not json").unwrap_err();
        assert_eq!(id, None);
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let (id, _) = parse_request(r#"{"id": 4, "args": {}}"#).unwrap_err();
        assert_eq!(id, Some(4));
    }

    #[test]
    fn args_default_to_null() {
        let req = parse_request(r#"{"id": 1, "command": "get_username"}"#).unwrap();
        assert_eq!(req.args, Value::Null);
    }
}
