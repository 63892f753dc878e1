//! Command envelope and its JSON wire form.
//!
//! A packet body carries exactly one serialized [`Command`]: either a
//! request (the `value` field holds command text to execute) or a response
//! (the `value` field holds the result, `errno`/`errMsg` describe failure).
//! Encoding is ordinary JSON object serialization; decoding fails on
//! anything that is not a well-formed envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Tag marking a command as a request.
pub const REQUEST_CTYPE: &str = "purecall-request";

/// Tag marking a command as a response.
pub const RESPONSE_CTYPE: &str = "purecall-response";

/// Errno reported to the remote caller when the local executor fails.
pub const EXECUTION_ERRNO: i32 = 530;

/// Payload of a command.
///
/// `errno == 0` signals success and `value` holds the result; any nonzero
/// `errno` signals failure and `errMsg` is the human-readable cause. For a
/// request, `value` holds the command text and the other fields are unused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandData {
    #[serde(default)]
    pub value: Value,
    pub errno: i32,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
}

/// The logical message carried inside one packet body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Correlation id: generated by the call initiator, echoed unchanged in
    /// the matching response.
    pub id: String,
    /// Request/response discriminator ([`REQUEST_CTYPE`] or
    /// [`RESPONSE_CTYPE`]; anything else is dropped at dispatch).
    pub ctype: String,
    pub data: CommandData,
}

impl Command {
    /// Build a request carrying `command` as the text to execute.
    pub fn request(id: impl Into<String>, command: &str) -> Self {
        Self {
            id: id.into(),
            ctype: REQUEST_CTYPE.to_string(),
            data: CommandData {
                value: Value::String(command.to_string()),
                errno: 0,
                err_msg: String::new(),
            },
        }
    }

    /// Build a successful response echoing `id`.
    pub fn ok_response(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            ctype: RESPONSE_CTYPE.to_string(),
            data: CommandData {
                value,
                errno: 0,
                err_msg: String::new(),
            },
        }
    }

    /// Build a failed response echoing `id`.
    pub fn err_response(id: impl Into<String>, errno: i32, err_msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ctype: RESPONSE_CTYPE.to_string(),
            data: CommandData {
                value: Value::Null,
                errno,
                err_msg: err_msg.into(),
            },
        }
    }

    /// Serialize to the JSON wire text.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a packet body.
    ///
    /// Fails with a decode error when the body is not a well-formed
    /// envelope: not UTF-8, not JSON, missing required fields or wrong
    /// types. This is exactly the condition that triggers a framer reset at
    /// the connection layer.
    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let cmd = Command::request("id-1", "[\"add\", 1, 2]");
        let text = cmd.encode().unwrap();
        let decoded = Command::decode(text.as_bytes()).unwrap();

        assert_eq!(decoded, cmd);
        assert_eq!(decoded.ctype, REQUEST_CTYPE);
        assert_eq!(decoded.data.value, json!("[\"add\", 1, 2]"));
        assert_eq!(decoded.data.errno, 0);
    }

    #[test]
    fn test_wire_field_names() {
        let cmd = Command::err_response("id-2", EXECUTION_ERRNO, "boom");
        let text = cmd.encode().unwrap();
        let raw: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(raw["id"], json!("id-2"));
        assert_eq!(raw["ctype"], json!(RESPONSE_CTYPE));
        assert_eq!(raw["data"]["value"], Value::Null);
        assert_eq!(raw["data"]["errno"], json!(530));
        assert_eq!(raw["data"]["errMsg"], json!("boom"));
    }

    #[test]
    fn test_ok_response_carries_value() {
        let cmd = Command::ok_response("id-3", json!({"n": 3}));
        let decoded = Command::decode(cmd.encode().unwrap().as_bytes()).unwrap();

        assert_eq!(decoded.data.errno, 0);
        assert_eq!(decoded.data.value, json!({"n": 3}));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        assert!(Command::decode(b"{\"foo\": 1}").is_err());
        assert!(Command::decode(b"{\"id\": \"x\", \"ctype\": \"purecall-request\"}").is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_types() {
        let body = b"{\"id\": 7, \"ctype\": \"purecall-request\", \"data\": {\"value\": null, \"errno\": 0, \"errMsg\": \"\"}}";
        assert!(Command::decode(body).is_err());
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(Command::decode(b"not json at all").is_err());
        assert!(Command::decode(&[0xFF, 0xFE, 0x01]).is_err());
    }

    #[test]
    fn test_decode_tolerates_unknown_ctype() {
        // An unknown tag must decode fine; it is dropped at dispatch, not
        // treated as a framing failure.
        let body = b"{\"id\": \"x\", \"ctype\": \"something-else\", \"data\": {\"value\": 1, \"errno\": 0, \"errMsg\": \"\"}}";
        let decoded = Command::decode(body).unwrap();
        assert_eq!(decoded.ctype, "something-else");
    }

    #[test]
    fn test_decode_defaults_missing_value_to_null() {
        let body = b"{\"id\": \"x\", \"ctype\": \"purecall-response\", \"data\": {\"errno\": 0, \"errMsg\": \"\"}}";
        let decoded = Command::decode(body).unwrap();
        assert_eq!(decoded.data.value, Value::Null);
    }

    #[test]
    fn test_forward_slashes_not_escaped() {
        let cmd = Command::request("id-4", "a/b</script>");
        let text = cmd.encode().unwrap();
        assert!(text.contains("a/b</script>"));
    }
}
