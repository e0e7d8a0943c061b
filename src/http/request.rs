//! Synthetic incoming request.
//!
//! Built fresh per invocation from the normalized event parameters and
//! discarded after settlement. The body is fully buffered up front;
//! handlers treat it exactly like a drained live request.

use crate::error::SkiffError;
use crate::event::NormalizedParams;
use crate::http::percent;
use crate::session::Session;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Per-instance request augmentation installed by an application at
/// dispatch time. Sub-applications layer their own table over the
/// parent's.
pub type ReqExtension = Arc<dyn Fn(&mut SkiffRequest, Value) -> Value + Send + Sync>;

/// Synthetic incoming request shared with the dispatch engine.
pub struct SkiffRequest {
    /// Upper-cased HTTP method.
    pub method: String,
    /// Full request url (path plus query string when non-empty).
    pub url: String,
    /// Current dispatch path. Mount dispatch strips the mount prefix
    /// while inside a sub-application.
    pub path: String,
    /// Request headers with lower-cased names.
    pub headers: HashMap<String, String>,
    /// Flattened query parameters.
    pub query: Vec<(String, String)>,
    /// Fully-buffered request body.
    pub body: Bytes,
    /// Body parsed as JSON by the body-parser middleware, when present.
    pub body_json: Option<Value>,
    /// Route parameters bound by the matched route.
    pub params: HashMap<String, String>,
    /// Free-form per-request values set by handlers.
    pub data: HashMap<String, Value>,
    /// Whether the request's own transport reports secure. Synthetic
    /// requests never do; a forwarded-protocol header may still mark the
    /// original hop secure.
    pub secure: bool,
    /// Session bound by the session middleware, when present.
    pub session: Option<Session>,
    /// Parameter handlers already run this request, keyed by name with
    /// the literal value they ran for.
    pub(crate) params_called: HashMap<String, String>,
    pub(crate) extensions: HashMap<String, ReqExtension>,
}

impl SkiffRequest {
    /// Build a synthetic request from normalized invocation parameters.
    pub fn build(params: &NormalizedParams) -> Self {
        let url = if params.query.is_empty() {
            params.path.clone()
        } else {
            format!("{}?{}", params.path, percent::query_string(&params.query))
        };

        let headers = params
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();

        let body = if params.is_base64_encoded {
            match STANDARD.decode(params.body.as_bytes()) {
                Ok(bytes) => Bytes::from(bytes),
                Err(err) => {
                    warn!("request body claims base64 but failed to decode: {}", err);
                    Bytes::from(params.body.clone().into_bytes())
                }
            }
        } else {
            Bytes::from(params.body.clone().into_bytes())
        };

        Self {
            method: params.method.clone(),
            url,
            path: params.path.clone(),
            headers,
            query: params.query.clone(),
            body,
            body_json: None,
            params: HashMap::new(),
            data: HashMap::new(),
            secure: false,
            session: None,
            params_called: HashMap::new(),
            extensions: HashMap::new(),
        }
    }

    /// Get a header value by case-insensitive name.
    pub fn get_header(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_lowercase())
    }

    /// The request body as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Invoke a per-instance request extension by name.
    ///
    /// Calling a name the dispatching application never installed fails
    /// the same way the dynamic original did.
    pub fn call_extension(&mut self, name: &str, arg: Value) -> Result<Value, SkiffError> {
        match self.extensions.get(name).cloned() {
            Some(ext) => Ok(ext(self, arg)),
            None => Err(SkiffError::new(format!("req.{} is not a function", name))),
        }
    }
}

impl std::fmt::Debug for SkiffRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkiffRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("body_len", &self.body.len())
            .finish()
    }
}
