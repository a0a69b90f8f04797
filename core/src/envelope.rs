//! The `{result, error_code, error_info}` wrapper around every Conduit response.

use serde::Deserialize;
use serde_json::Value;

/// A decoded Conduit response envelope.
///
/// Success is decided by the error fields, never by `result`: a method may
/// legitimately succeed with a null result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_info: Option<String>,
}

impl Envelope {
    pub fn is_error(&self) -> bool {
        self.error_code.is_some() || self.error_info.is_some()
    }
}
