//! Cookie-backed, server-side session subsystem.

pub mod cookie;
pub mod middleware;
mod session;
pub mod store;

pub use cookie::{Priority, SameSite, SessionCookie};
pub use middleware::{is_secure, session_middleware, SessionOptions};
pub use session::{regenerate, Session};
pub use store::{GenerateFn, MemoryStore, SessionRecord, SessionStore, SignalCallback, StoreSignal};
