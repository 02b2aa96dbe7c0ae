//! Reply body decoding.
//!
//! A reply to `POST /mcp` is either a bare JSON object or an SSE-framed
//! body. After an `event:` line only the first `data:` line is used; a body
//! that starts with `data:` is the payload in full once the prefix is gone.

use crate::error::DecodeError;
use crate::protocol::JsonRpcResponse;

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// Extract the JSON payload text from a reply body.
pub fn extract_payload(body: &str) -> Result<&str, DecodeError> {
    let body = body.trim_start();

    if body.starts_with(EVENT_PREFIX) {
        return body
            .lines()
            .find_map(|line| line.strip_prefix(DATA_PREFIX))
            .map(str::trim)
            .ok_or_else(|| DecodeError::missing_data(body));
    }

    // The payload may be pretty-printed over several lines
    if let Some(rest) = body.strip_prefix(DATA_PREFIX) {
        return Ok(rest.trim());
    }

    Ok(body)
}

/// Decode a reply body into a JSON-RPC response.
pub fn decode_reply(body: &str) -> Result<JsonRpcResponse, DecodeError> {
    let payload = extract_payload(body)?;
    serde_json::from_str(payload).map_err(|e| DecodeError::invalid_json(payload, e))
}
