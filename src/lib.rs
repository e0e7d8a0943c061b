//! # Skiff - Serverless Request/Response Bridge
//!
//! Skiff adapts a cloud-function invocation (one event object per call,
//! no socket) into the request/response model of a conventional
//! in-process HTTP application, so route and middleware code written in
//! the usual style runs unmodified inside a function-as-a-service host.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Function-as-a-Service Host                  │
//! │                    (event in, {status, body} out)               │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                             Skiff                               │
//! │  ┌────────────┐  ┌───────────────────────┐  ┌───────────────┐  │
//! │  │   Event    │  │  Synthetic Request /  │  │   Response    │  │
//! │  │ Normalizer │─▶│  Response + Dispatch  │─▶│ Capture Shim  │  │
//! │  └────────────┘  └───────────────────────┘  └───────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use skiff::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SkiffError> {
//!     let config = AppConfig::new().attach(Attachment::Handler(handler(
//!         |_req, res| async move {
//!             res.lock().unwrap().send(Payload::text("hello"));
//!             Flow::Done
//!         },
//!     )));
//!
//!     let event = json!({ "path": "/", "httpMethod": "GET" });
//!     let outcome = invoke(&event, config).await?;
//!     println!("{} {}", outcome.status_code, outcome.body);
//!     Ok(())
//! }
//! ```
//!
//! ## Invocation Lifecycle
//!
//! 1. **Normalize**: the opaque event is mapped to fixed parameters,
//!    defaulting every missing or malformed field
//! 2. **Dispatch**: synthetic request/response objects run through the
//!    assembled application's middleware and routes
//! 3. **Settle**: the capture shim resolves `{statusCode, body}` exactly
//!    once, merging caller identity into JSON bodies

pub mod app;
pub mod bridge;
pub mod error;
pub mod event;
pub mod http;
pub mod session;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::app::{
        assemble, configure_fn, error_handler, handler, param_handler, App, AppConfig, Attachment,
        Flow, Handler,
    };
    pub use crate::bridge::{invoke, invoke_with_context};
    pub use crate::error::SkiffError;
    pub use crate::event::{normalize, NormalizedParams};
    pub use crate::http::{CallerContext, Outcome, Payload, SkiffRequest, SkiffResponse};
    pub use crate::session::{
        session_middleware, MemoryStore, Session, SessionCookie, SessionOptions, SessionStore,
    };
    pub use async_trait::async_trait;
}

// Re-export for convenience
pub use app::{App, AppConfig};
pub use bridge::{invoke, invoke_with_context};
pub use error::SkiffError;
pub use http::{CallerContext, Outcome};
