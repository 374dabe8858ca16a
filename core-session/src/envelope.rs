//! Fault envelope codec.

use crate::error::{Fault, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    stat: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode a response body into its `result` payload or a [`Fault`].
///
/// A missing `result` on success decodes as `Value::Null`.
pub fn decode(body: &[u8]) -> Result<Value> {
    let envelope: RawEnvelope = serde_json::from_slice(body)?;

    match envelope.stat.as_str() {
        "ok" => Ok(envelope.result.unwrap_or(Value::Null)),
        "fail" => {
            let code = envelope
                .code
                .ok_or_else(|| Fault::bad_response("fault envelope without code"))?;
            Err(Fault::from_server(code, envelope.message))
        }
        other => Err(Fault::bad_response(format!("unknown stat '{}'", other))),
    }
}

/// Decode a `result` payload into a typed record.
pub fn result_as<T: serde::de::DeserializeOwned>(result: Value) -> Result<T> {
    Ok(serde_json::from_value(result)?)
}
