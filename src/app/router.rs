//! Layer-based dispatch.
//!
//! Callback-style `next()` / `next("route")` / `next(err)` control flow
//! is replaced by the explicit [`Flow`] enum returned from every
//! handler; the dispatch loop drives chaining. Errors route to
//! downstream error middleware and, when unhandled, bubble out to the
//! orchestrator's finalizer.

use crate::app::application::App;
use crate::error::SkiffError;
use crate::http::percent;
use crate::http::{ReqExtension, ResExtension, SharedRequest, SharedResponse};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// What a handler tells the dispatch loop to do next.
#[derive(Debug)]
pub enum Flow {
    /// Continue with the next handler or layer.
    Next,
    /// Skip the rest of this route and try the next matching one. Not
    /// an error.
    NextRoute,
    /// The response has been (or will be) completed; stop dispatching.
    Done,
    /// Hand the error to downstream error middleware.
    Fail(SkiffError),
}

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Flow> + Send>>;

/// Route or middleware handler.
pub type Handler = Arc<dyn Fn(SharedRequest, SharedResponse) -> HandlerFuture + Send + Sync>;

/// Error-handling middleware.
pub type ErrorHandler =
    Arc<dyn Fn(SkiffError, SharedRequest, SharedResponse) -> HandlerFuture + Send + Sync>;

/// Named URL-parameter handler; receives the bound value.
pub type ParamHandler =
    Arc<dyn Fn(SharedRequest, SharedResponse, String) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(SharedRequest, SharedResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |req, res| Box::pin(f(req, res)))
}

/// Wrap an async closure as an [`ErrorHandler`].
pub fn error_handler<F, Fut>(f: F) -> ErrorHandler
where
    F: Fn(SkiffError, SharedRequest, SharedResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |err, req, res| Box::pin(f(err, req, res)))
}

/// Wrap an async closure as a [`ParamHandler`].
pub fn param_handler<F, Fut>(f: F) -> ParamHandler
where
    F: Fn(SharedRequest, SharedResponse, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |req, res, value| Box::pin(f(req, res, value)))
}

/// Route path pattern with `:name` parameter segments.
#[derive(Debug, Clone)]
pub(crate) struct PathPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

impl PathPattern {
    pub(crate) fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self { segments }
    }

    /// Match a full path, binding percent-decoded parameter values.
    pub(crate) fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let trimmed = path.trim_matches('/');
        let parts: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut bindings = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    bindings.push((name.clone(), percent::decode(part)));
                }
            }
        }
        Some(bindings)
    }
}

/// One route: optional method restriction, pattern, handler chain.
#[derive(Clone)]
pub(crate) struct Route {
    pub method: Option<String>,
    pub pattern: PathPattern,
    pub handlers: Vec<Handler>,
}

impl Route {
    fn method_matches(&self, method: &str) -> bool {
        match &self.method {
            None => true,
            // HEAD falls back to GET routes.
            Some(m) => m == method || (m == "GET" && method == "HEAD"),
        }
    }
}

#[derive(Clone)]
pub(crate) enum Target {
    Middleware(Handler),
    ErrorMiddleware(ErrorHandler),
    Route(Route),
    SubApp(App),
}

#[derive(Clone)]
pub(crate) struct Layer {
    pub path: Option<String>,
    pub target: Target,
}

/// Result of dispatching one application against a request.
#[derive(Debug)]
pub(crate) enum DispatchResult {
    /// A handler completed (or claimed) the response.
    Done,
    /// No layer claimed the request.
    Unhandled,
    /// An error escaped every error handler in this application.
    Failed(SkiffError),
}

/// Strip a mount prefix from a path, honoring segment boundaries.
fn strip_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() || prefix == "/" {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Resolve a layer's view of the path: `None` for out of scope,
/// `Some(None)` for an unscoped layer, `Some(Some(rest))` with the
/// prefix stripped for a scoped one.
fn scoped_path(layer_path: Option<&str>, path: &str) -> Option<Option<String>> {
    match layer_path {
        None => Some(None),
        Some(prefix) => strip_prefix(prefix, path).map(|rest| Some(rest.to_string())),
    }
}

type ExtensionSnapshot = (
    HashMap<String, ReqExtension>,
    HashMap<String, ResExtension>,
);

/// Layer this application's extension tables over whatever the parent
/// installed, returning the previous tables for restoration.
fn install_extensions(app: &App, req: &SharedRequest, res: &SharedResponse) -> ExtensionSnapshot {
    let (req_ext, res_ext) = app.extension_tables();
    let prev_req = {
        let mut guard = req.lock().unwrap();
        let prev = guard.extensions.clone();
        guard.extensions.extend(req_ext);
        prev
    };
    let prev_res = {
        let mut guard = res.lock().unwrap();
        let prev = guard.extensions.clone();
        guard.extensions.extend(res_ext);
        prev
    };
    (prev_req, prev_res)
}

fn restore_extensions(req: &SharedRequest, res: &SharedResponse, snapshot: &ExtensionSnapshot) {
    req.lock().unwrap().extensions = snapshot.0.clone();
    res.lock().unwrap().extensions = snapshot.1.clone();
}

/// Dispatch a request through an application's layer stack.
pub(crate) fn dispatch(
    app: App,
    req: SharedRequest,
    res: SharedResponse,
) -> Pin<Box<dyn Future<Output = DispatchResult> + Send>> {
    Box::pin(async move {
        let snapshot = install_extensions(&app, &req, &res);
        let layers = app.layers();
        let mut pending_error: Option<SkiffError> = None;

        for layer in layers {
            let current_path = { req.lock().unwrap().path.clone() };

            // Error mode: only error middleware in scope runs until one
            // of them resumes normal flow.
            if let Some(err) = pending_error.take() {
                if let Target::ErrorMiddleware(h) = &layer.target {
                    let scoped = match scoped_path(layer.path.as_deref(), &current_path) {
                        Some(scoped) => scoped,
                        None => {
                            pending_error = Some(err);
                            continue;
                        }
                    };
                    if let Some(rest) = &scoped {
                        req.lock().unwrap().path = rest.clone();
                    }
                    let flow = h(err.clone(), req.clone(), res.clone()).await;
                    if scoped.is_some() {
                        req.lock().unwrap().path = current_path.clone();
                    }
                    match flow {
                        Flow::Next | Flow::NextRoute => {}
                        Flow::Done => {
                            restore_extensions(&req, &res, &snapshot);
                            return DispatchResult::Done;
                        }
                        Flow::Fail(next_err) => pending_error = Some(next_err),
                    }
                } else {
                    pending_error = Some(err);
                }
                continue;
            }

            match &layer.target {
                Target::ErrorMiddleware(_) => {}
                Target::Middleware(h) => {
                    // Scoped middleware runs with the prefix stripped,
                    // like a sub-application mount.
                    let scoped = match scoped_path(layer.path.as_deref(), &current_path) {
                        Some(scoped) => scoped,
                        None => continue,
                    };
                    if let Some(rest) = &scoped {
                        req.lock().unwrap().path = rest.clone();
                    }
                    let flow = h(req.clone(), res.clone()).await;
                    if scoped.is_some() {
                        req.lock().unwrap().path = current_path.clone();
                    }
                    match flow {
                        Flow::Next | Flow::NextRoute => {}
                        Flow::Done => {
                            restore_extensions(&req, &res, &snapshot);
                            return DispatchResult::Done;
                        }
                        Flow::Fail(err) => pending_error = Some(err),
                    }
                }
                Target::Route(route) => {
                    let method = { req.lock().unwrap().method.clone() };
                    if !route.method_matches(&method) {
                        continue;
                    }
                    let bindings = match route.pattern.matches(&current_path) {
                        Some(bindings) => bindings,
                        None => continue,
                    };
                    {
                        let mut guard = req.lock().unwrap();
                        for (name, value) in &bindings {
                            guard.params.insert(name.clone(), value.clone());
                        }
                    }

                    let mut skip_route = false;
                    'params: for (name, value) in &bindings {
                        let already = {
                            let guard = req.lock().unwrap();
                            guard.params_called.get(name) == Some(value)
                        };
                        if already {
                            continue;
                        }
                        {
                            let mut guard = req.lock().unwrap();
                            guard.params_called.insert(name.clone(), value.clone());
                        }
                        for param in app.param_handlers(name) {
                            match param(req.clone(), res.clone(), value.clone()).await {
                                Flow::Next => {}
                                Flow::NextRoute => {
                                    skip_route = true;
                                    break 'params;
                                }
                                Flow::Done => {
                                    restore_extensions(&req, &res, &snapshot);
                                    return DispatchResult::Done;
                                }
                                Flow::Fail(err) => {
                                    pending_error = Some(err);
                                    skip_route = true;
                                    break 'params;
                                }
                            }
                        }
                    }
                    if skip_route {
                        continue;
                    }

                    for h in &route.handlers {
                        match h(req.clone(), res.clone()).await {
                            Flow::Next => {}
                            Flow::NextRoute => break,
                            Flow::Done => {
                                restore_extensions(&req, &res, &snapshot);
                                return DispatchResult::Done;
                            }
                            Flow::Fail(err) => {
                                pending_error = Some(err);
                                break;
                            }
                        }
                    }
                }
                Target::SubApp(child) => {
                    let mount = layer.path.as_deref().unwrap_or("/");
                    let rest = match strip_prefix(mount, &current_path) {
                        Some(rest) => rest.to_string(),
                        None => continue,
                    };
                    debug!("entering sub-application mounted at {}", mount);
                    {
                        req.lock().unwrap().path = rest;
                    }
                    let result = dispatch(child.clone(), req.clone(), res.clone()).await;
                    {
                        req.lock().unwrap().path = current_path.clone();
                    }
                    match result {
                        DispatchResult::Done => {
                            restore_extensions(&req, &res, &snapshot);
                            return DispatchResult::Done;
                        }
                        DispatchResult::Unhandled => {}
                        DispatchResult::Failed(err) => pending_error = Some(err),
                    }
                }
            }
        }

        restore_extensions(&req, &res, &snapshot);
        match pending_error {
            Some(err) => DispatchResult::Failed(err),
            None => DispatchResult::Unhandled,
        }
    })
}
