//! Request parsing for the line-delimited protocol.

use serde_json::Value;
use thiserror::Error;

use crate::schema;

/// Maximum accepted input line.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    ListTools,
    CallTool,
}

/// A parsed request. The optional `id` is advisory: it is accepted on the
/// wire but not round-tripped into the envelope.
#[derive(Debug, Clone)]
pub struct McpRequest {
    pub method: Method,
    pub name: Option<String>,
    pub args: Value,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("request too large (limit {MAX_LINE_BYTES} bytes)")]
    TooLarge,

    #[error("invalid JSON: {0}")]
    Malformed(String),

    #[error("request too complex: {0}")]
    TooComplex(String),

    #[error("missing required field: method")]
    MissingMethod,

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}

/// Parse one input line into a request, enforcing the per-request bounds.
pub fn parse_request(line: &str) -> Result<McpRequest, ParseError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ParseError::TooLarge);
    }

    let value: Value =
        serde_json::from_str(line).map_err(|e| ParseError::Malformed(e.to_string()))?;

    schema::check_complexity(&value, "request")
        .map_err(|e| ParseError::TooComplex(e.message))?;

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingMethod)?;

    let method = match method {
        "list_tools" => Method::ListTools,
        "call_tool" => Method::CallTool,
        other => return Err(ParseError::UnsupportedMethod(other.to_string())),
    };

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .map(String::from);
    let args = value
        .get("args")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    Ok(McpRequest { method, name, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_tools() {
        let req = parse_request(r#"{"method":"list_tools"}"#).unwrap();
        assert_eq!(req.method, Method::ListTools);
        assert!(req.name.is_none());
    }

    #[test]
    fn parses_call_tool_with_id_ignored() {
        let req =
            parse_request(r#"{"id":"a","method":"call_tool","name":"disk_space","args":{}}"#)
                .unwrap();
        assert_eq!(req.method, Method::CallTool);
        assert_eq!(req.name.as_deref(), Some("disk_space"));
        assert!(req.args.as_object().unwrap().is_empty());
    }

    #[test]
    fn missing_args_defaults_to_empty_object() {
        let req = parse_request(r#"{"method":"call_tool","name":"t"}"#).unwrap();
        assert!(req.args.is_object());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            parse_request("{not json"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unknown_method() {
        assert!(matches!(
            parse_request(r#"{"method":"shutdown"}"#),
            Err(ParseError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn rejects_missing_method() {
        assert!(matches!(
            parse_request(r#"{"name":"x"}"#),
            Err(ParseError::MissingMethod)
        ));
    }

    #[test]
    fn rejects_oversized_lines() {
        let line = format!(
            r#"{{"method":"call_tool","name":"t","args":{{"x":"{}"}}}}"#,
            "a".repeat(MAX_LINE_BYTES)
        );
        assert!(matches!(parse_request(&line), Err(ParseError::TooLarge)));
    }

    #[test]
    fn rejects_deeply_nested_requests() {
        let mut inner = "1".to_string();
        for _ in 0..25 {
            inner = format!("[{inner}]");
        }
        let line = format!(r#"{{"method":"call_tool","name":"t","args":{{"x":{inner}}}}}"#);
        assert!(matches!(parse_request(&line), Err(ParseError::TooComplex(_))));
    }
}
