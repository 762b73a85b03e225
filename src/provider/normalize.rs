use serde_json::Value;

use crate::error::MirageError;
use crate::provider::ResultEncoding;

/// Canonical outcome of one status poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Terminal success. URL order is the provider's array order;
    /// consumers assign meaning to position (thumbnail vs. full asset).
    Ready(Vec<String>),
    /// Job still running.
    Pending,
    /// Terminal provider-reported failure. Not an error: written to the
    /// task row with the provider's code/message preserved for display.
    Failed { code: String, message: String },
}

/// Normalize a raw provider status record. Malformed payloads are
/// errors, never Pending: a contract violation must not keep a task
/// polling forever or misreport as an empty success.
pub fn normalize(encoding: ResultEncoding, raw: &Value) -> Result<Outcome, MirageError> {
    match encoding {
        ResultEncoding::StateString => normalize_state_string(raw),
        ResultEncoding::IntegerFlag => normalize_integer_flag(raw),
    }
}

/// `state` ∈ waiting | success | fail. On success, `resultJson` is a
/// mandatory JSON string whose object carries a `resultUrls` array.
fn normalize_state_string(raw: &Value) -> Result<Outcome, MirageError> {
    let state = raw
        .get("state")
        .and_then(Value::as_str)
        .ok_or(MirageError::MissingField("state"))?;

    match state {
        "waiting" => Ok(Outcome::Pending),
        "success" => {
            let result_json = raw
                .get("resultJson")
                .and_then(Value::as_str)
                .ok_or(MirageError::MissingField("resultJson"))?;

            let parsed: Value = serde_json::from_str(result_json)
                .map_err(|e| MirageError::SchemaParse(format!("resultJson: {e}")))?;

            let urls = parsed
                .get("resultUrls")
                .and_then(Value::as_array)
                .ok_or(MirageError::MissingField("resultUrls"))?;

            Ok(Outcome::Ready(
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect(),
            ))
        }
        "fail" => Ok(Outcome::Failed {
            code: field_as_string(raw, "failCode").unwrap_or_default(),
            message: field_as_string(raw, "failMsg")
                .unwrap_or_else(|| "generation failed".to_string()),
        }),
        other => Err(MirageError::SchemaParse(format!(
            "unrecognized state: {other:?}"
        ))),
    }
}

/// `successFlag` ∈ 0 (pending) | 1 (success) | 2, 3 (failed). On success
/// the URLs live under `response.resultUrls`; a missing `response` or a
/// non-array `resultUrls` is an empty success, not an error: terminal
/// payloads legitimately carry zero URLs during partial result delivery.
fn normalize_integer_flag(raw: &Value) -> Result<Outcome, MirageError> {
    let flag = raw
        .get("successFlag")
        .and_then(Value::as_i64)
        .ok_or(MirageError::MissingField("successFlag"))?;

    match flag {
        0 => Ok(Outcome::Pending),
        1 => {
            let urls = raw
                .get("response")
                .and_then(|r| r.get("resultUrls"))
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default();
            Ok(Outcome::Ready(urls))
        }
        2 | 3 => Ok(Outcome::Failed {
            code: field_as_string(raw, "errorCode").unwrap_or_default(),
            message: field_as_string(raw, "errorMessage")
                .unwrap_or_else(|| "generation failed".to_string()),
        }),
        other => Err(MirageError::SchemaParse(format!(
            "unrecognized successFlag: {other}"
        ))),
    }
}

/// Providers are inconsistent about code fields (sometimes strings,
/// sometimes numbers). Fold both into a string, dropping explicit nulls.
fn field_as_string(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
