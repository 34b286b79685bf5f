//! The partner request payload and its error entries.
//!
//! Every asynchronous request carries this envelope; the same structure
//! (with stamped fields and accumulated errors) is posted back to the
//! external import-manager API when a task finishes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata keys copied from a promotion entry onto the DataObject record.
/// Missing inputs are recorded with the `***MISSING***` placeholder.
pub const METADATA_KEYS: [&str; 6] = [
    "cdi_n_code",
    "format_n_code",
    "data_format_l24",
    "version",
    "batch_date",
    "test_mode",
];

pub const MISSING_METADATA_VALUE: &str = "***MISSING***";

/// One accumulated `(code, description)` failure, optionally naming the
/// entry it refers to.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorEntry {
    pub error: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ErrorEntry {
    pub fn new(code: crate::errors::ErrorCode, subject: Option<String>) -> Self {
        Self {
            error: code.code.to_string(),
            description: code.description.to_string(),
            subject,
        }
    }
}

/// Envelope shared by all lifecycle requests and notifications.
///
/// `parameters` stays a free JSON object: each task extracts and validates
/// the keys it needs and reports catalog errors for missing or malformed
/// values instead of failing deserialization up front.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RequestPayload {
    #[serde(default)]
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub edmo_code: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(default)]
    pub api_function: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_mode: Option<String>,

    #[serde(default)]
    pub parameters: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorEntry>>,
}

impl RequestPayload {
    /// Read the `backdoor` flag out of `parameters`, removing it so it is
    /// never relayed to the external API.
    pub fn take_backdoor(&mut self) -> bool {
        match self.parameters.as_object_mut() {
            Some(map) => map
                .remove("backdoor")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            None => false,
        }
    }

    /// String parameter lookup; empty strings are returned as-is so the
    /// caller can distinguish missing from empty.
    pub fn str_param(&self, key: &str) -> Option<String> {
        self.parameters
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Integer parameter lookup: accepts both JSON numbers and numeric
    /// strings, as partners send either.
    pub fn int_param(&self, key: &str) -> Option<Result<i64, ()>> {
        let value = self.parameters.get(key)?;
        if let Some(n) = value.as_i64() {
            return Some(Ok(n));
        }
        if let Some(s) = value.as_str() {
            return Some(s.trim().parse::<i64>().map_err(|_| ()));
        }
        Some(Err(()))
    }

    pub fn push_error(&mut self, entry: ErrorEntry) {
        self.errors.get_or_insert_with(Vec::new).push(entry);
    }

    /// Move the client-supplied request id into `parameters` and replace
    /// it with the task id, so the notification references both.
    pub fn adopt_request_id(&mut self, task_id: &str) {
        let original = std::mem::replace(&mut self.request_id, task_id.to_string());
        if let Some(map) = self.parameters.as_object_mut() {
            map.insert("request_id".into(), Value::String(original));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backdoor_flag_is_removed_from_parameters() {
        let mut payload = RequestPayload {
            parameters: json!({"backdoor": true, "pids": []}),
            ..Default::default()
        };
        assert!(payload.take_backdoor());
        assert!(payload.parameters.get("backdoor").is_none());
        assert!(!payload.take_backdoor());
    }

    #[test]
    fn int_param_accepts_numbers_and_numeric_strings() {
        let payload = RequestPayload {
            parameters: json!({"a": 7, "b": "12", "c": "x"}),
            ..Default::default()
        };
        assert_eq!(payload.int_param("a"), Some(Ok(7)));
        assert_eq!(payload.int_param("b"), Some(Ok(12)));
        assert_eq!(payload.int_param("c"), Some(Err(())));
        assert_eq!(payload.int_param("d"), None);
    }

    #[test]
    fn errors_are_omitted_from_json_when_empty() {
        let payload = RequestPayload::default();
        let encoded = serde_json::to_value(&payload).unwrap();
        assert!(encoded.get("errors").is_none());
    }
}
