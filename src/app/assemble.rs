//! Declarative application assembly.
//!
//! [`assemble`] turns an [`AppConfig`] into a ready [`App`], applying
//! every section of the configuration in a fixed order. Reusing a
//! supplied instance allows incremental configuration; a fresh instance
//! comes with the JSON body parser pre-attached.

use crate::app::application::{App, EventCallback};
use crate::app::router::{handler, Flow, Handler, ParamHandler};
use crate::error::SkiffError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Async hook run before every other configuration step.
pub type ConfigureFn = Arc<
    dyn Fn(App) -> Pin<Box<dyn Future<Output = Result<(), SkiffError>> + Send>> + Send + Sync,
>;

/// Wrap an async closure as a [`ConfigureFn`].
pub fn configure_fn<F, Fut>(f: F) -> ConfigureFn
where
    F: Fn(App) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SkiffError>> + Send + 'static,
{
    Arc::new(move |app| Box::pin(f(app)))
}

/// One attachable item: middleware, error middleware or a whole
/// sub-application.
#[derive(Clone)]
pub enum Attachment {
    Handler(Handler),
    ErrorHandler(crate::app::router::ErrorHandler),
    App(App),
}

/// A group of attachments, optionally mounted under a path prefix.
#[derive(Clone)]
pub struct AttachGroup {
    pub path: Option<String>,
    pub items: Vec<Attachment>,
}

/// Named URL-parameter handler bound to one or more parameter names.
#[derive(Clone)]
pub struct ParamSpec {
    pub names: Vec<String>,
    pub handler: ParamHandler,
}

/// Declarative application configuration.
///
/// Every field is optional; [`assemble`] skips empty sections.
#[derive(Default, Clone)]
pub struct AppConfig {
    /// Existing instance to configure incrementally instead of building
    /// a fresh one.
    pub app: Option<App>,
    /// Async hook awaited before any other step.
    pub configure: Option<ConfigureFn>,
    /// Settings to disable, applied before enables.
    pub disable_settings: Vec<String>,
    /// Settings to enable.
    pub enable_settings: Vec<String>,
    /// Key/value setters.
    pub setters: Vec<(String, Value)>,
    /// Named URL-parameter handlers.
    pub params: Vec<ParamSpec>,
    /// Event listeners.
    pub listeners: Vec<(String, EventCallback)>,
    /// Handler attachments, path-scoped or global.
    pub handlers: Vec<AttachGroup>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure an existing application instead of building a fresh one.
    pub fn with_app(mut self, app: App) -> Self {
        self.app = Some(app);
        self
    }

    pub fn configure(mut self, f: ConfigureFn) -> Self {
        self.configure = Some(f);
        self
    }

    pub fn disable(mut self, name: impl Into<String>) -> Self {
        self.disable_settings.push(name.into());
        self
    }

    pub fn enable(mut self, name: impl Into<String>) -> Self {
        self.enable_settings.push(name.into());
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: Value) -> Self {
        self.setters.push((name.into(), value));
        self
    }

    /// Bind a parameter handler to a single name.
    pub fn param(mut self, name: impl Into<String>, handler: ParamHandler) -> Self {
        self.params.push(ParamSpec {
            names: vec![name.into()],
            handler,
        });
        self
    }

    /// Bind a parameter handler to several names at once.
    pub fn param_names<S: Into<String>>(mut self, names: Vec<S>, handler: ParamHandler) -> Self {
        self.params.push(ParamSpec {
            names: names.into_iter().map(Into::into).collect(),
            handler,
        });
        self
    }

    pub fn on(mut self, event: impl Into<String>, callback: EventCallback) -> Self {
        self.listeners.push((event.into(), callback));
        self
    }

    /// Attach one item globally.
    pub fn attach(mut self, item: Attachment) -> Self {
        self.handlers.push(AttachGroup {
            path: None,
            items: vec![item],
        });
        self
    }

    /// Attach one or more items under a path prefix.
    pub fn mount(mut self, path: impl Into<String>, items: Vec<Attachment>) -> Self {
        self.handlers.push(AttachGroup {
            path: Some(path.into()),
            items,
        });
        self
    }
}

/// Middleware parsing `application/json` bodies into `req.body_json`.
/// Malformed JSON is logged and left unparsed.
pub fn json_body_parser() -> Handler {
    handler(|req, _res| async move {
        let mut guard = req.lock().unwrap();
        let is_json = guard
            .get_header("content-type")
            .map(|ct| ct.to_lowercase().contains("application/json"))
            .unwrap_or(false);
        if is_json && !guard.body.is_empty() {
            match serde_json::from_slice::<Value>(&guard.body) {
                Ok(value) => guard.body_json = Some(value),
                Err(err) => warn!("json body parse failed: {}", err),
            }
        }
        drop(guard);
        Flow::Next
    })
}

/// Assemble an application from a declarative configuration.
///
/// Steps run strictly in order: configure hook, disables, enables,
/// setters, parameter handlers, event listeners, handler attachments.
/// Every step is independently skippable.
pub async fn assemble(config: AppConfig) -> Result<App, SkiffError> {
    let app = match config.app {
        Some(app) => app,
        None => {
            let app = App::new();
            app.use_handler(None, json_body_parser());
            app
        }
    };

    if let Some(configure) = &config.configure {
        configure(app.clone()).await?;
    }

    for name in &config.disable_settings {
        app.disable(name);
    }
    for name in &config.enable_settings {
        app.enable(name);
    }
    for (name, value) in &config.setters {
        app.set(name, value.clone());
    }
    for spec in &config.params {
        app.param(&spec.names, spec.handler.clone());
    }
    for (event, callback) in &config.listeners {
        app.on(event, callback.clone());
    }

    for group in &config.handlers {
        let path = group.path.as_deref();
        for item in &group.items {
            match item {
                Attachment::Handler(h) => app.use_handler(path, h.clone()),
                Attachment::ErrorHandler(h) => app.use_error_handler(path, h.clone()),
                Attachment::App(child) => app.use_app(path.unwrap_or("/"), child),
            }
        }
    }

    debug!("assembled application with {} layer(s)", app.layers().len());
    Ok(app)
}
