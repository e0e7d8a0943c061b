//! Application instance.
//!
//! An [`App`] is a cheap-cloneable handle over shared state: settings,
//! layers, named URL-parameter handlers, event listeners and the
//! per-instance request/response extension tables. Every application is
//! fully independent; mounting one under another layers capabilities at
//! dispatch time instead of mutating anything shared.

use crate::app::router::{
    ErrorHandler, Handler, Layer, ParamHandler, PathPattern, Route, Target,
};
use crate::http::{weak_etag, EtagFn, ReqExtension, ResExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

/// Application event listener.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

struct AppInner {
    settings: HashMap<String, Value>,
    etag_fn: Option<EtagFn>,
    layers: Vec<Layer>,
    params: HashMap<String, Vec<ParamHandler>>,
    listeners: HashMap<String, Vec<EventCallback>>,
    req_extensions: HashMap<String, ReqExtension>,
    res_extensions: HashMap<String, ResExtension>,
    mountpath: String,
    parent: Option<Weak<Mutex<AppInner>>>,
}

/// Framework application instance handle.
#[derive(Clone)]
pub struct App {
    inner: Arc<Mutex<AppInner>>,
}

impl App {
    /// Create a fresh, empty application.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(AppInner {
                settings: HashMap::new(),
                etag_fn: Some(Arc::new(weak_etag)),
                layers: Vec::new(),
                params: HashMap::new(),
                listeners: HashMap::new(),
                req_extensions: HashMap::new(),
                res_extensions: HashMap::new(),
                mountpath: "/".to_string(),
                parent: None,
            })),
        }
    }

    /// Whether two handles refer to the same application instance.
    pub fn ptr_eq(&self, other: &App) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut AppInner) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }

    /// Set a named setting.
    pub fn set(&self, name: &str, value: Value) {
        self.with_inner(|inner| inner.settings.insert(name.to_string(), value));
    }

    /// Get a named setting.
    pub fn get_setting(&self, name: &str) -> Option<Value> {
        self.with_inner(|inner| inner.settings.get(name).cloned())
    }

    /// Enable a boolean setting. Enabling `etag` restores the default
    /// ETag generator.
    pub fn enable(&self, name: &str) {
        self.with_inner(|inner| {
            if name == "etag" {
                inner.etag_fn = Some(Arc::new(weak_etag));
            }
            inner.settings.insert(name.to_string(), Value::Bool(true));
        });
    }

    /// Disable a boolean setting. Disabling `etag` turns ETag
    /// computation off entirely.
    pub fn disable(&self, name: &str) {
        self.with_inner(|inner| {
            if name == "etag" {
                inner.etag_fn = None;
            }
            inner.settings.insert(name.to_string(), Value::Bool(false));
        });
    }

    /// Whether a boolean setting is enabled.
    pub fn enabled(&self, name: &str) -> bool {
        self.get_setting(name).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Replace the application-level ETag generator.
    pub fn set_etag_fn(&self, etag_fn: Option<EtagFn>) {
        self.with_inner(|inner| inner.etag_fn = etag_fn);
    }

    /// The application-level ETag generator, if ETags are enabled.
    pub fn etag_fn(&self) -> Option<EtagFn> {
        self.with_inner(|inner| inner.etag_fn.clone())
    }

    /// Register a named URL-parameter handler for one or more names.
    pub fn param<S: AsRef<str>>(&self, names: &[S], handler: ParamHandler) {
        self.with_inner(|inner| {
            for name in names {
                inner
                    .params
                    .entry(name.as_ref().to_string())
                    .or_default()
                    .push(handler.clone());
            }
        });
    }

    /// Register an event listener.
    pub fn on(&self, event: &str, callback: EventCallback) {
        self.with_inner(|inner| {
            inner
                .listeners
                .entry(event.to_string())
                .or_default()
                .push(callback)
        });
    }

    /// Emit an event to all listeners registered for it.
    pub fn emit(&self, event: &str, payload: Value) {
        let callbacks = self.with_inner(|inner| inner.listeners.get(event).cloned());
        if let Some(callbacks) = callbacks {
            debug!("emitting '{}' to {} listener(s)", event, callbacks.len());
            for callback in callbacks {
                callback(payload.clone());
            }
        }
    }

    /// Install a per-instance request extension.
    pub fn extend_request(&self, name: &str, ext: ReqExtension) {
        self.with_inner(|inner| inner.req_extensions.insert(name.to_string(), ext));
    }

    /// Install a per-instance response extension.
    pub fn extend_response(&self, name: &str, ext: ResExtension) {
        self.with_inner(|inner| inner.res_extensions.insert(name.to_string(), ext));
    }

    /// Attach middleware, optionally scoped under a path prefix.
    pub fn use_handler(&self, path: Option<&str>, handler: Handler) {
        self.with_inner(|inner| {
            inner.layers.push(Layer {
                path: path.map(str::to_string),
                target: Target::Middleware(handler),
            })
        });
    }

    /// Attach error-handling middleware, optionally path-scoped.
    pub fn use_error_handler(&self, path: Option<&str>, handler: ErrorHandler) {
        self.with_inner(|inner| {
            inner.layers.push(Layer {
                path: path.map(str::to_string),
                target: Target::ErrorMiddleware(handler),
            })
        });
    }

    /// Mount a sub-application under a path prefix. The child keeps its
    /// own settings and extension tables; dispatch layers them over the
    /// parent's while inside the mount.
    pub fn use_app(&self, path: &str, child: &App) {
        child.with_inner(|inner| {
            inner.mountpath = path.to_string();
            inner.parent = Some(Arc::downgrade(&self.inner));
        });
        self.with_inner(|inner| {
            inner.layers.push(Layer {
                path: Some(path.to_string()),
                target: Target::SubApp(child.clone()),
            })
        });
        info!("mounted sub-application at {}", path);
        child.emit("mount", Value::String(path.to_string()));
    }

    /// Register a route for a method (or all methods when `None`).
    pub fn route(&self, method: Option<&str>, path: &str, handlers: Vec<Handler>) {
        self.with_inner(|inner| {
            inner.layers.push(Layer {
                path: None,
                target: Target::Route(Route {
                    method: method.map(|m| m.to_uppercase()),
                    pattern: PathPattern::parse(path),
                    handlers,
                }),
            })
        });
    }

    /// Register a GET route.
    pub fn get(&self, path: &str, handler: Handler) {
        self.route(Some("GET"), path, vec![handler]);
    }

    /// Register a POST route.
    pub fn post(&self, path: &str, handler: Handler) {
        self.route(Some("POST"), path, vec![handler]);
    }

    /// Register a PUT route.
    pub fn put(&self, path: &str, handler: Handler) {
        self.route(Some("PUT"), path, vec![handler]);
    }

    /// Register a DELETE route.
    pub fn delete(&self, path: &str, handler: Handler) {
        self.route(Some("DELETE"), path, vec![handler]);
    }

    /// Register a route matching every method.
    pub fn all(&self, path: &str, handler: Handler) {
        self.route(None, path, vec![handler]);
    }

    /// The path prefix this application is mounted under; `/` for a
    /// top-level application.
    pub fn mountpath(&self) -> String {
        self.with_inner(|inner| inner.mountpath.clone())
    }

    /// Concatenated ancestor mount paths; empty for a top-level
    /// application.
    pub fn path(&self) -> String {
        let (mountpath, parent) = self.with_inner(|inner| (inner.mountpath.clone(), inner.parent.clone()));
        let parent_path = parent
            .and_then(|weak| weak.upgrade())
            .map(|inner| App { inner }.path())
            .unwrap_or_default();
        if mountpath == "/" {
            parent_path
        } else {
            format!("{}{}", parent_path, mountpath)
        }
    }

    pub(crate) fn layers(&self) -> Vec<Layer> {
        self.with_inner(|inner| inner.layers.clone())
    }

    pub(crate) fn param_handlers(&self, name: &str) -> Vec<ParamHandler> {
        self.with_inner(|inner| inner.params.get(name).cloned().unwrap_or_default())
    }

    pub(crate) fn extension_tables(
        &self,
    ) -> (HashMap<String, ReqExtension>, HashMap<String, ResExtension>) {
        self.with_inner(|inner| (inner.req_extensions.clone(), inner.res_extensions.clone()))
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (mountpath, layers) = self.with_inner(|inner| (inner.mountpath.clone(), inner.layers.len()));
        f.debug_struct("App")
            .field("mountpath", &mountpath)
            .field("layers", &layers)
            .finish()
    }
}
