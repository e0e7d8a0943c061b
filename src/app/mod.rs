//! Application instances, declarative assembly and dispatch.

mod application;
pub mod assemble;
pub mod router;

pub use application::{App, EventCallback};
pub use assemble::{
    assemble, configure_fn, json_body_parser, AppConfig, AttachGroup, Attachment, ConfigureFn,
    ParamSpec,
};
pub use router::{
    error_handler, handler, param_handler, ErrorHandler, Flow, Handler, HandlerFuture,
    ParamHandler,
};

pub(crate) use router::{dispatch, DispatchResult};
