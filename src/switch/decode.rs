//! Lenient decoding of switch responses.
//!
//! The switch's response shapes are inconsistent across endpoints and
//! versions: empty bodies, a single object, or an array of objects, with
//! status tokens in more than one language and under more than one field
//! name. Everything is parsed into a generic `serde_json::Value` and
//! pattern-matched into one canonical `SwitchResult`; no keyed access
//! without an existence check.

use serde_json::Value;

const SUCCESS_TOKENS: &[&str] = &[
    "COMPLETED",
    "COMPLETADA",
    "EXITOSA",
    "PROCESADA",
    "SUCCESS",
    "OK",
    "ACCEPTED",
    "QUEUED",
    "PROCESSED",
];

const FAILURE_TOKENS: &[&str] = &[
    "REJECTED",
    "RECHAZADA",
    "FAILED",
    "FALLIDA",
    "ERROR",
    "RETURNED",
    "DEVUELTA",
    "CANCELLED",
    "CANCELADA",
];

const ID_FIELDS: &[&str] = &["instructionId", "transactionId", "id"];

/// Canonical decoded outcome of one switch call.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchResult {
    pub success: bool,
    pub instruction_id: Option<String>,
    pub status: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// What a status token says about the transfer, independent of transport
/// success. Used by the confirmation poller, where a well-formed response
/// may still report an in-flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Failure,
    Indeterminate,
}

impl SwitchResult {
    fn failure(code: &str, message: String) -> Self {
        SwitchResult {
            success: false,
            instruction_id: None,
            status: None,
            error_code: Some(code.to_string()),
            error_message: Some(message),
        }
    }

    fn bare_success() -> Self {
        SwitchResult {
            success: true,
            instruction_id: None,
            status: None,
            error_code: None,
            error_message: None,
        }
    }

    pub fn status_class(&self) -> StatusClass {
        if let Some(status) = self.status.as_deref() {
            let upper = status.to_uppercase();
            if SUCCESS_TOKENS.contains(&upper.as_str()) {
                return StatusClass::Success;
            }
            if FAILURE_TOKENS.contains(&upper.as_str()) {
                return StatusClass::Failure;
            }
        }
        if self.error_code.is_some() || self.error_message.is_some() {
            return StatusClass::Failure;
        }
        StatusClass::Indeterminate
    }

    /// Human-readable reason for a rejection, best signal first.
    pub fn failure_reason(&self) -> String {
        self.error_message
            .clone()
            .or_else(|| self.error_code.clone())
            .or_else(|| self.status.clone())
            .unwrap_or_else(|| "unknown switch error".to_string())
    }
}

/// Decode one raw switch response into a `SwitchResult`.
///
/// A parse failure on a 2xx response counts as success: the switch accepted
/// the request even if its body was malformed. A parse failure on anything
/// else is a structured `PARSE_ERROR`.
pub fn decode_response(http_status: u16, body: &str, instruction_id: Option<&str>) -> SwitchResult {
    let ok = (200..300).contains(&http_status);

    if body.trim().is_empty() {
        if ok {
            return SwitchResult::bare_success();
        }
        return SwitchResult::failure(
            "EMPTY_RESPONSE",
            format!("switch returned status {} with empty body", http_status),
        );
    }

    let root: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            if ok {
                tracing::warn!("Unparseable 2xx switch body treated as success: {}", e);
                return SwitchResult::bare_success();
            }
            return SwitchResult::failure("PARSE_ERROR", format!("failed to parse: {}", e));
        }
    };

    let entry = match &root {
        Value::Array(items) => match select_entry(items, instruction_id) {
            Some(entry) => entry,
            None => {
                if ok {
                    return SwitchResult::bare_success();
                }
                return SwitchResult::failure(
                    "EMPTY_RESPONSE",
                    format!("switch returned status {} with an empty array", http_status),
                );
            }
        },
        other => other,
    };

    classify(http_status, ok, entry)
}

/// Find the array element matching the requested instruction id; fall back
/// to the first element.
fn select_entry<'a>(items: &'a [Value], instruction_id: Option<&str>) -> Option<&'a Value> {
    if let Some(wanted) = instruction_id {
        for item in items {
            if ID_FIELDS
                .iter()
                .filter_map(|field| item.get(field))
                .filter_map(Value::as_str)
                .any(|found| found == wanted)
            {
                return Some(item);
            }
        }
    }
    items.first()
}

fn classify(http_status: u16, ok: bool, entry: &Value) -> SwitchResult {
    let data = entry.get("data");
    let error = entry.get("error").filter(|e| !e.is_null());

    let status = string_field(entry, &["status", "estado"])
        .or_else(|| data.and_then(|d| string_field(d, &["status", "estado"])));
    let instruction_id = lookup_id(entry).or_else(|| data.and_then(lookup_id));

    let error_code = error
        .and_then(|e| string_field(e, &["code"]))
        .or_else(|| string_field(entry, &["errorCode"]));
    let error_message = error
        .and_then(|e| string_field(e, &["message"]))
        .or_else(|| string_field(entry, &["errorMessage", "message"]).filter(|_| !ok));

    let status_is_success = status
        .as_deref()
        .map(|s| SUCCESS_TOKENS.contains(&s.to_uppercase().as_str()))
        .unwrap_or(false);

    // Success is derived, not merely read: any one of these signals on a
    // 2xx response is enough.
    let success = ok
        && (entry
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || (error.is_none() && data.is_some())
            || status_is_success
            || instruction_id.is_some());

    // Failure codes are synthesized for non-2xx transport statuses only.
    // A 2xx body that merely lacks success signals (an in-flight token, an
    // unrecognized shape) carries no verdict and must stay indeterminate.
    let (error_code, error_message) = if success {
        (None, None)
    } else if !ok && error_code.is_none() && error_message.is_none() {
        (
            Some(format!("HTTP_{}", http_status)),
            Some(format!("switch returned status {}", http_status)),
        )
    } else {
        (error_code, error_message)
    };

    SwitchResult {
        success,
        instruction_id,
        status,
        error_code,
        error_message,
    }
}

fn lookup_id(entry: &Value) -> Option<String> {
    ID_FIELDS
        .iter()
        .filter_map(|field| entry.get(field))
        .find_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn string_field(entry: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| entry.get(name))
        .find_map(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_2xx_is_success() {
        let result = decode_response(200, "", None);
        assert!(result.success);
    }

    #[test]
    fn test_empty_body_5xx_is_failure() {
        let result = decode_response(502, "  ", None);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("EMPTY_RESPONSE"));
    }

    #[test]
    fn test_malformed_2xx_is_success() {
        let result = decode_response(200, "<html>oops</html>", None);
        assert!(result.success);
    }

    #[test]
    fn test_malformed_4xx_is_parse_error() {
        let result = decode_response(500, "<html>oops</html>", None);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("PARSE_ERROR"));
    }

    #[test]
    fn test_explicit_success_flag() {
        let body = r#"{"success": true, "data": {"instructionId": "abc", "estado": "PROCESADA"}}"#;
        let result = decode_response(200, body, Some("abc"));
        assert!(result.success);
        assert_eq!(result.instruction_id.as_deref(), Some("abc"));
        assert_eq!(result.status_class(), StatusClass::Success);
    }

    #[test]
    fn test_data_without_error_is_success() {
        let body = r#"{"data": {"timestamp": "2024-01-01T00:00:00Z"}}"#;
        let result = decode_response(200, body, None);
        assert!(result.success);
    }

    #[test]
    fn test_success_tokens_case_insensitive() {
        for token in ["completada", "Exitosa", "QUEUED", "ok", "Accepted"] {
            let body = format!(r#"{{"estado": "{}"}}"#, token);
            let result = decode_response(200, &body, None);
            assert!(result.success, "token {} should classify as success", token);
        }
    }

    #[test]
    fn test_identifying_field_alone_is_success() {
        let body = r#"{"transactionId": "9917"}"#;
        let result = decode_response(200, body, None);
        assert!(result.success);
        assert_eq!(result.instruction_id.as_deref(), Some("9917"));
    }

    #[test]
    fn test_numeric_id_field() {
        let body = r#"{"id": 42}"#;
        let result = decode_response(200, body, None);
        assert!(result.success);
        assert_eq!(result.instruction_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_error_body_on_2xx_is_rejection() {
        let body = r#"{"success": false, "error": {"code": "AC03", "message": "unknown creditor account"}}"#;
        let result = decode_response(200, body, None);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("AC03"));
        assert_eq!(result.failure_reason(), "unknown creditor account");
        assert_eq!(result.status_class(), StatusClass::Failure);
    }

    #[test]
    fn test_array_selects_matching_instruction() {
        let body = r#"[
            {"instructionId": "other", "estado": "RECHAZADA"},
            {"instructionId": "mine", "estado": "COMPLETADA"}
        ]"#;
        let result = decode_response(200, body, Some("mine"));
        assert!(result.success);
        assert_eq!(result.instruction_id.as_deref(), Some("mine"));
    }

    #[test]
    fn test_array_falls_back_to_first_entry() {
        let body = r#"[{"instructionId": "only", "estado": "PROCESADA"}]"#;
        let result = decode_response(200, body, Some("missing"));
        assert!(result.success);
        assert_eq!(result.instruction_id.as_deref(), Some("only"));
    }

    #[test]
    fn test_empty_array_2xx_is_success() {
        let result = decode_response(200, "[]", Some("abc"));
        assert!(result.success);
    }

    #[test]
    fn test_pending_status_is_indeterminate() {
        let body = r#"{"instructionId": "abc", "status": "PENDING"}"#;
        let result = decode_response(200, body, Some("abc"));
        // Identifying field makes the transport call a success...
        assert!(result.success);
        // ...but the token does not confirm settlement.
        assert_eq!(result.status_class(), StatusClass::Indeterminate);
    }

    #[test]
    fn test_unknown_token_on_2xx_stays_indeterminate() {
        // A status query may answer with a token outside both tables while
        // the transfer is still in flight. That is not a rejection.
        let body = r#"{"status": "IN_PROGRESS"}"#;
        let result = decode_response(200, body, Some("ref-77"));
        assert_eq!(result.error_code, None);
        assert_eq!(result.status_class(), StatusClass::Indeterminate);
    }

    #[test]
    fn test_unknown_token_on_5xx_synthesizes_code() {
        let body = r#"{"status": "IN_PROGRESS"}"#;
        let result = decode_response(503, body, Some("ref-77"));
        assert_eq!(result.error_code.as_deref(), Some("HTTP_503"));
        assert_eq!(result.status_class(), StatusClass::Failure);
    }

    #[test]
    fn test_failure_tokens() {
        for token in ["REJECTED", "rechazada", "Failed", "DEVUELTA"] {
            let body = format!(r#"{{"status": "{}"}}"#, token);
            let result = decode_response(200, &body, None);
            assert_eq!(
                result.status_class(),
                StatusClass::Failure,
                "token {} should classify as failure",
                token
            );
        }
    }
}
