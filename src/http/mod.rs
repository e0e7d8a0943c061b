//! Synthetic transport objects and the response capture shim.

pub mod capture;
pub mod percent;
mod request;
mod response;

use std::sync::{Arc, Mutex};

pub use capture::{CallerContext, Capture, Chunk, Encoding, EndOptions, Outcome, WriteOptions};
pub use request::{ReqExtension, SkiffRequest};
pub use response::{weak_etag, EtagFn, Payload, RequestMeta, ResExtension, SkiffResponse};

/// Request handle shared between the dispatch engine and handlers.
pub type SharedRequest = Arc<Mutex<SkiffRequest>>;
/// Response handle shared between the dispatch engine and handlers.
pub type SharedResponse = Arc<Mutex<SkiffResponse>>;
