use serde_json::Value;

/// A parsed line of the tool protocol. Framing is newline-terminated UTF-8
/// JSON objects: a line that doesn't parse as JSON is forwarded verbatim
/// and never journaled (represented by the absence of a `ParsedLine`).
pub enum ParsedLine {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: Option<Value>,
        result: Option<Value>,
        error: Option<Value>,
    },
}

pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let value: Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;

    match object.get("method").and_then(Value::as_str) {
        Some(method) => match object.get("id") {
            Some(id) => Some(ParsedLine::Request {
                id: id.clone(),
                method: method.to_string(),
                params: object.get("params").cloned(),
            }),
            None => Some(ParsedLine::Notification {
                method: method.to_string(),
                params: object.get("params").cloned(),
            }),
        },
        None => Some(ParsedLine::Response {
            id: object.get("id").cloned(),
            result: object.get("result").cloned(),
            error: object.get("error").cloned(),
        }),
    }
}

/// Stringifies a JSON-RPC id for use as a correlation key.
pub fn stringify_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub const TOOLS_CALL_METHOD: &str = "tools/call";
