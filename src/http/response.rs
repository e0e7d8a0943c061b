//! Synthetic outgoing response.
//!
//! Exactly one of these exists per invocation, shared by reference
//! between the dispatch engine and the capture shim. The send routine
//! replicates the transport-level bookkeeping a live response object
//! would perform: content-type defaulting, charset normalization, ETag
//! and Content-Length computation, conditional-GET freshness, and the
//! status-code-driven header stripping rules.

use crate::error::SkiffError;
use crate::http::capture::{Capture, Chunk, Encoding, EndOptions, WriteOptions};
use crate::http::request::SkiffRequest;
use bytes::Bytes;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::warn;

/// Per-instance response augmentation installed by an application at
/// dispatch time.
pub type ResExtension = Arc<dyn Fn(&mut SkiffResponse, Value) -> Value + Send + Sync>;

/// Application-level ETag generator applied by the send routine.
pub type EtagFn = Arc<dyn Fn(&[u8]) -> String + Send + Sync>;

/// Weak ETag from body length and a content hash. This is the default
/// "etag fn" setting of a fresh application.
pub fn weak_etag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("W/\"{:x}-{:x}\"", body.len(), hasher.finish())
}

/// Request facts the send routine needs for content negotiation.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Upper-cased request method.
    pub method: String,
    /// `If-None-Match` header, if present.
    pub if_none_match: Option<String>,
    /// `Cache-Control` header, if present.
    pub cache_control: Option<String>,
}

impl RequestMeta {
    /// Capture the relevant facts from a synthetic request.
    pub fn of(req: &SkiffRequest) -> Self {
        Self {
            method: req.method.clone(),
            if_none_match: req.get_header("if-none-match").cloned(),
            cache_control: req.get_header("cache-control").cloned(),
        }
    }
}

/// Body value handed to the send routine.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Text body; defaults the Content-Type to html.
    Text(String),
    /// Byte body; defaults the Content-Type to octet-stream.
    Binary(Bytes),
    /// Structured body; delegated to JSON serialization.
    Json(Value),
    /// No body; coerced to an empty string.
    Empty,
}

impl Payload {
    /// Text payload.
    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text(value.into())
    }

    /// JSON payload.
    pub fn json(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// Synthetic outgoing response.
pub struct SkiffResponse {
    status: u16,
    headers: HashMap<String, String>,
    meta: RequestMeta,
    etag_fn: Option<EtagFn>,
    capture: Capture,
    finished: bool,
    bytes_written: usize,
    pub(crate) extensions: HashMap<String, ResExtension>,
}

impl SkiffResponse {
    /// Build a response around a capture shim.
    pub fn new(meta: RequestMeta, capture: Capture) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            meta,
            etag_fn: Some(Arc::new(weak_etag)),
            capture,
            finished: false,
            bytes_written: 0,
            extensions: HashMap::new(),
        }
    }

    /// Current status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Set the status code.
    pub fn set_status(&mut self, code: u16) -> &mut Self {
        self.status = code;
        self
    }

    /// Replace the ETag generator. `None` disables ETag computation.
    pub fn set_etag_fn(&mut self, etag_fn: Option<EtagFn>) {
        self.etag_fn = etag_fn;
    }

    /// Get a header by case-insensitive name.
    pub fn get_header(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_lowercase())
    }

    /// Set a header, replacing any existing value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    /// Remove a header.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(&name.to_lowercase());
    }

    /// Whether a header is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_lowercase())
    }

    /// Whether the response has ended.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Bytes forwarded through the write entry point so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Serialize a value as the JSON response body.
    pub fn json(&mut self, value: Value) {
        if !self.has_header("content-type") {
            self.set_header("Content-Type", "application/json; charset=utf-8");
        }
        self.send(Payload::Text(value.to_string()));
    }

    /// Write the body and end the response.
    pub fn send(&mut self, payload: Payload) {
        if self.finished {
            warn!("send called after response end, ignoring");
            return;
        }

        let body: Bytes = match payload {
            Payload::Json(value) => {
                self.json(value);
                return;
            }
            Payload::Empty => {
                self.default_text_headers();
                Bytes::new()
            }
            Payload::Text(text) => {
                self.default_text_headers();
                Bytes::from(text.into_bytes())
            }
            Payload::Binary(bytes) => {
                if !self.has_header("content-type") {
                    self.set_header("Content-Type", "application/octet-stream");
                }
                bytes
            }
        };

        if !self.has_header("etag") {
            if let Some(etag_fn) = self.etag_fn.clone() {
                let tag = etag_fn(&body);
                self.set_header("ETag", tag);
            }
        }

        self.set_header("Content-Length", body.len().to_string());

        let mut body = body;
        if self.is_fresh() {
            self.status = 304;
        }

        match self.status {
            204 | 304 => {
                self.remove_header("content-type");
                self.remove_header("content-length");
                self.remove_header("transfer-encoding");
                body = Bytes::new();
            }
            205 => {
                self.set_header("Content-Length", "0");
                self.remove_header("transfer-encoding");
                body = Bytes::new();
            }
            _ => {}
        }

        if self.meta.method == "HEAD" {
            self.end(EndOptions::empty());
            return;
        }

        let chunk = if body.is_empty() {
            None
        } else {
            Some(Chunk::Binary(body))
        };
        self.end(EndOptions {
            chunk,
            encoding: Encoding::Utf8,
        });
    }

    /// Append a chunk to the captured body. Forwarding keeps the byte
    /// counter accurate even though no socket exists.
    pub fn write(&mut self, options: WriteOptions) {
        if self.finished {
            warn!("write called after response end, ignoring");
            return;
        }
        if let Some(chunk) = options.chunk {
            self.bytes_written += self.capture.absorb(chunk, options.encoding);
        }
    }

    /// Complete the response, settling the invocation Outcome. A second
    /// end is a no-op.
    pub fn end(&mut self, options: EndOptions) {
        if self.finished {
            warn!("end called twice, ignoring");
            return;
        }
        if options.chunk.is_some() {
            self.write(WriteOptions {
                chunk: options.chunk,
                encoding: options.encoding,
            });
        }
        self.finished = true;
        self.capture.settle(self.status);
    }

    /// Invoke a per-instance response extension by name.
    pub fn call_extension(&mut self, name: &str, arg: Value) -> Result<Value, SkiffError> {
        match self.extensions.get(name).cloned() {
            Some(ext) => Ok(ext(self, arg)),
            None => Err(SkiffError::new(format!("res.{} is not a function", name))),
        }
    }

    fn default_text_headers(&mut self) {
        match self.get_header("content-type").cloned() {
            None => {
                self.set_header("Content-Type", "text/html; charset=utf-8");
            }
            Some(existing) if !existing.to_lowercase().contains("charset") => {
                self.set_header("Content-Type", format!("{}; charset=utf-8", existing));
            }
            _ => {}
        }
    }

    /// Conditional-GET match: a fresh request is answered 304.
    fn is_fresh(&self) -> bool {
        if self.meta.method != "GET" && self.meta.method != "HEAD" {
            return false;
        }
        if !(200..300).contains(&self.status) && self.status != 304 {
            return false;
        }
        if let Some(cc) = &self.meta.cache_control {
            if cc.to_lowercase().contains("no-cache") {
                return false;
            }
        }
        let if_none_match = match &self.meta.if_none_match {
            Some(v) => v,
            None => return false,
        };
        if if_none_match.trim() == "*" {
            return self.has_header("etag");
        }
        let etag = match self.get_header("etag") {
            Some(tag) => tag.clone(),
            None => return false,
        };
        if_none_match
            .split(',')
            .map(str::trim)
            .any(|tag| strip_weak(tag) == strip_weak(&etag))
    }
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

impl std::fmt::Debug for SkiffResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkiffResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("finished", &self.finished)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::capture::{CallerContext, Outcome};
    use tokio::sync::oneshot;

    fn response(meta: RequestMeta) -> (SkiffResponse, oneshot::Receiver<Outcome>) {
        let (capture, rx) = Capture::channel(CallerContext::default());
        (SkiffResponse::new(meta, capture), rx)
    }

    fn get_meta() -> RequestMeta {
        RequestMeta {
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_text_defaults_html_content_type() {
        let (mut res, rx) = response(get_meta());
        res.send(Payload::text("hi"));
        assert_eq!(
            res.get_header("Content-Type"),
            Some(&"text/html; charset=utf-8".to_string())
        );
        assert_eq!(rx.await.unwrap().body, "hi");
    }

    #[tokio::test]
    async fn test_existing_content_type_gains_charset() {
        let (mut res, _rx) = response(get_meta());
        res.set_header("Content-Type", "text/plain");
        res.send(Payload::text("hi"));
        assert_eq!(
            res.get_header("Content-Type"),
            Some(&"text/plain; charset=utf-8".to_string())
        );
    }

    #[tokio::test]
    async fn test_binary_defaults_octet_stream() {
        let (mut res, _rx) = response(get_meta());
        res.send(Payload::Binary(Bytes::from_static(b"\x01\x02")));
        assert_eq!(
            res.get_header("Content-Type"),
            Some(&"application/octet-stream".to_string())
        );
    }

    #[tokio::test]
    async fn test_json_payload_delegates() {
        let (mut res, rx) = response(get_meta());
        res.send(Payload::json(serde_json::json!({ "a": 1 })));
        assert_eq!(
            res.get_header("Content-Type"),
            Some(&"application/json; charset=utf-8".to_string())
        );
        let outcome = rx.await.unwrap();
        let body: Value = serde_json::from_str(&outcome.body).unwrap();
        assert_eq!(body["a"], 1);
    }

    #[tokio::test]
    async fn test_empty_payload_coerced_to_empty_string() {
        let (mut res, rx) = response(get_meta());
        res.send(Payload::Empty);
        assert_eq!(res.get_header("Content-Length"), Some(&"0".to_string()));
        assert_eq!(rx.await.unwrap().body, "");
    }

    #[tokio::test]
    async fn test_content_length_set_from_byte_length() {
        let (mut res, _rx) = response(get_meta());
        res.send(Payload::text("hello"));
        assert_eq!(res.get_header("Content-Length"), Some(&"5".to_string()));
    }

    #[tokio::test]
    async fn test_etag_set_when_absent() {
        let (mut res, _rx) = response(get_meta());
        res.send(Payload::text("body"));
        assert!(res.get_header("ETag").is_some());
    }

    #[tokio::test]
    async fn test_existing_etag_kept() {
        let (mut res, _rx) = response(get_meta());
        res.set_header("ETag", "\"pinned\"");
        res.send(Payload::text("body"));
        assert_eq!(res.get_header("ETag"), Some(&"\"pinned\"".to_string()));
    }

    #[tokio::test]
    async fn test_fresh_request_forces_304_and_strips_headers() {
        let etag = weak_etag(b"body");
        let meta = RequestMeta {
            method: "GET".to_string(),
            if_none_match: Some(etag),
            cache_control: None,
        };
        let (mut res, rx) = response(meta);
        res.send(Payload::text("body"));
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status_code, 304);
        assert_eq!(outcome.body, "");
        assert!(!res.has_header("Content-Type"));
        assert!(!res.has_header("Content-Length"));
    }

    #[tokio::test]
    async fn test_no_cache_defeats_freshness() {
        let etag = weak_etag(b"body");
        let meta = RequestMeta {
            method: "GET".to_string(),
            if_none_match: Some(etag),
            cache_control: Some("no-cache".to_string()),
        };
        let (mut res, rx) = response(meta);
        res.send(Payload::text("body"));
        assert_eq!(rx.await.unwrap().status_code, 200);
    }

    #[tokio::test]
    async fn test_205_zeroes_length_and_body() {
        let (mut res, rx) = response(get_meta());
        res.set_status(205);
        res.send(Payload::text("gone"));
        assert_eq!(res.get_header("Content-Length"), Some(&"0".to_string()));
        assert_eq!(rx.await.unwrap().body, "");
    }

    #[tokio::test]
    async fn test_head_request_writes_no_body() {
        let meta = RequestMeta {
            method: "HEAD".to_string(),
            ..Default::default()
        };
        let (mut res, rx) = response(meta);
        res.send(Payload::text("never sent"));
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.body, "");
        // Headers still describe the suppressed body.
        assert_eq!(res.get_header("Content-Length"), Some(&"10".to_string()));
    }

    #[tokio::test]
    async fn test_second_end_is_noop() {
        let (mut res, rx) = response(get_meta());
        res.end(EndOptions::text("first"));
        res.set_status(500);
        res.end(EndOptions::text("second"));
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.body, "first");
    }

    #[tokio::test]
    async fn test_write_then_end_accumulates() {
        let (mut res, rx) = response(get_meta());
        res.write(WriteOptions::text("a"));
        res.write(WriteOptions::text("b"));
        res.end(EndOptions::text("c"));
        assert_eq!(res.bytes_written(), 3);
        assert_eq!(rx.await.unwrap().body, "abc");
    }

    #[tokio::test]
    async fn test_disabled_etag_fn_skips_etag() {
        let (mut res, _rx) = response(get_meta());
        res.set_etag_fn(None);
        res.send(Payload::text("body"));
        assert!(!res.has_header("ETag"));
    }
}
