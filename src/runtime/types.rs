/*!
 * Runtime API Types
 * Wire shapes of the invocation exchange
 */

use crate::core::errors::{Result, StructuredError};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
pub const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";
pub const RUNTIME_API_VERSION: &str = "2018-06-01";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpContext {
    #[serde(default)]
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub http: HttpContext,
}

/// JSON body served by `invocation/next`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvent {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub request_context: RequestContext,
}

impl InvocationEvent {
    pub fn new(body: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            request_context: RequestContext {
                http: HttpContext {
                    method: method.into(),
                },
            },
        }
    }
}

/// Response headers, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvocationHeaders(BTreeMap<String, String>);

impl InvocationHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let map = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

/// One invocation as seen by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub request_id: String,
    /// Milliseconds since the epoch, when advertised
    pub deadline_ms: Option<u64>,
    pub body: Vec<u8>,
    pub method: String,
    pub headers: InvocationHeaders,
}

impl Invocation {
    /// Build from an `invocation/next` reply
    pub fn from_reply(headers: &HeaderMap, payload: &[u8]) -> Result<Self> {
        let headers = InvocationHeaders::from_header_map(headers);
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                StructuredError::protocol(format!("missing {REQUEST_ID_HEADER} in response headers"))
            })?
            .to_string();
        let deadline_ms = headers.get(DEADLINE_HEADER).and_then(|v| v.parse().ok());

        let event: InvocationEvent = if payload.is_empty() {
            InvocationEvent::default()
        } else {
            serde_json::from_slice(payload).map_err(|e| {
                StructuredError::protocol(format!("invocation {request_id}: malformed event: {e}"))
            })?
        };

        Ok(Self {
            request_id,
            deadline_ms,
            body: event.body.into_bytes(),
            method: event.request_context.http.method,
            headers,
        })
    }
}

/// Result posted to `invocation/{id}/response`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub status_code: i32,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl InvocationResult {
    pub fn new(status_code: i32, body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code,
            body: body.into(),
            headers,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| StructuredError::protocol(format!("cannot encode result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;

    fn reply_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("test-request-123"));
        headers.insert(DEADLINE_HEADER, HeaderValue::from_static("1700000000000"));
        headers
    }

    #[test]
    fn test_invocation_from_reply() {
        let payload = br#"{"body":"test-body-from-mock","requestContext":{"http":{"method":"GET"}}}"#;
        let invocation = Invocation::from_reply(&reply_headers(), payload).unwrap();
        assert_eq!(invocation.request_id, "test-request-123");
        assert_eq!(invocation.body, b"test-body-from-mock");
        assert_eq!(invocation.method, "GET");
        assert_eq!(invocation.deadline_ms, Some(1_700_000_000_000));
        assert_eq!(
            invocation.headers.get("lambda-runtime-aws-request-id"),
            Some("test-request-123")
        );
    }

    #[test]
    fn test_missing_body_decodes_as_empty() {
        let invocation = Invocation::from_reply(&reply_headers(), b"{}").unwrap();
        assert!(invocation.body.is_empty());
        assert_eq!(invocation.method, "");
    }

    #[test]
    fn test_missing_request_id_is_protocol_error() {
        let error = Invocation::from_reply(&HeaderMap::new(), b"{}").unwrap_err();
        assert_eq!(error.kind, crate::core::errors::ErrorKind::Protocol);
    }

    #[test]
    fn test_result_wire_shape() {
        let result = InvocationResult::new(200, "echo:hi \"there\"");
        let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "statusCode": 200,
                "body": "echo:hi \"there\"",
                "headers": {"Content-Type": "application/json"}
            })
        );
    }

    #[test]
    fn test_result_accepts_minimal_payload() {
        let result: InvocationResult = serde_json::from_str(r#"{"statusCode":500}"#).unwrap();
        assert_eq!(result.body, "");
        assert!(!result.is_success());
    }
}
