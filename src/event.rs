//! Invocation event normalization.
//!
//! A cloud-function host hands the entry point one loosely-shaped JSON
//! event per call. This module maps that event into a fixed parameter
//! record, filling a default for every absent or wrong-typed field so a
//! malformed caller degrades to a default route lookup instead of
//! aborting the invocation.

use serde_json::Value;
use std::collections::HashMap;

/// Fixed parameter record derived once per invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedParams {
    /// Request path, defaults to `/`.
    pub path: String,
    /// Upper-cased HTTP method, defaults to `GET`.
    pub method: String,
    /// Request headers, defaults to empty.
    pub headers: HashMap<String, String>,
    /// Flattened query parameters in stable key order.
    pub query: Vec<(String, String)>,
    /// Raw request body, defaults to empty.
    pub body: String,
    /// Whether the body is base64 encoded.
    pub is_base64_encoded: bool,
}

impl Default for NormalizedParams {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: String::new(),
            is_base64_encoded: false,
        }
    }
}

/// Normalize a host invocation event into a [`NormalizedParams`] record.
///
/// Never fails: every field of interest (`path`, `httpMethod`, `headers`,
/// `queryStringParameters`, `body`, `isBase64Encoded`) is optional and
/// loosely typed, and silently falls back to its default.
pub fn normalize(event: &Value) -> NormalizedParams {
    let mut params = NormalizedParams::default();

    let obj = match event.as_object() {
        Some(obj) => obj,
        None => return params,
    };

    if let Some(path) = obj.get("path").and_then(Value::as_str) {
        if !path.is_empty() {
            params.path = path.to_string();
        }
    }

    if let Some(method) = obj.get("httpMethod").and_then(Value::as_str) {
        if !method.is_empty() {
            params.method = method.to_uppercase();
        }
    }

    if let Some(headers) = obj.get("headers").and_then(Value::as_object) {
        for (key, value) in headers {
            if let Some(v) = scalar_to_string(value) {
                params.headers.insert(key.clone(), v);
            }
        }
    }

    if let Some(query) = obj.get("queryStringParameters").and_then(Value::as_object) {
        for (key, value) in query {
            match value {
                Value::Array(items) => {
                    for item in items {
                        if let Some(v) = scalar_to_string(item) {
                            params.query.push((key.clone(), v));
                        }
                    }
                }
                other => {
                    if let Some(v) = scalar_to_string(other) {
                        params.query.push((key.clone(), v));
                    }
                }
            }
        }
    }

    match obj.get("body") {
        Some(Value::String(body)) => params.body = body.clone(),
        Some(body @ Value::Object(_)) | Some(body @ Value::Array(_)) => {
            params.body = body.to_string();
        }
        _ => {}
    }

    if let Some(flag) = obj.get("isBase64Encoded").and_then(Value::as_bool) {
        params.is_base64_encoded = flag;
    }

    params
}

/// Coerce a scalar JSON value to its string form. Objects, arrays and
/// nulls yield `None`.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_event_defaults() {
        let params = normalize(&json!({}));
        assert_eq!(params.path, "/");
        assert_eq!(params.method, "GET");
        assert!(params.headers.is_empty());
        assert!(params.query.is_empty());
        assert_eq!(params.body, "");
        assert!(!params.is_base64_encoded);
    }

    #[test]
    fn test_non_object_event_defaults() {
        assert_eq!(normalize(&json!(null)), NormalizedParams::default());
        assert_eq!(normalize(&json!("bogus")), NormalizedParams::default());
        assert_eq!(normalize(&json!(42)), NormalizedParams::default());
    }

    #[test]
    fn test_method_uppercased() {
        let params = normalize(&json!({ "httpMethod": "post" }));
        assert_eq!(params.method, "POST");
    }

    #[test]
    fn test_wrong_typed_fields_fall_back() {
        let params = normalize(&json!({
            "path": 17,
            "httpMethod": ["GET"],
            "headers": "nope",
            "queryStringParameters": 3,
            "body": null,
            "isBase64Encoded": "yes",
        }));
        assert_eq!(params, NormalizedParams::default());
    }

    #[test]
    fn test_query_flattening() {
        let params = normalize(&json!({
            "queryStringParameters": {
                "a": "1",
                "b": [2, "3"],
                "c": { "nested": true },
                "d": true,
            }
        }));
        assert_eq!(
            params.query,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("b".to_string(), "3".to_string()),
                ("d".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_object_body_serialized() {
        let params = normalize(&json!({ "body": { "a": 1 } }));
        assert_eq!(params.body, r#"{"a":1}"#);
    }

    #[test]
    fn test_numeric_header_values_coerced() {
        let params = normalize(&json!({ "headers": { "x-count": 5 } }));
        assert_eq!(params.headers.get("x-count"), Some(&"5".to_string()));
    }
}
