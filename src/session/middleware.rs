//! Cookie-backed session middleware.
//!
//! The middleware only gates on store readiness; it never blocks a
//! request. Handlers observe the absence of a session, they are not
//! failed by it.

use crate::app::{handler, Flow, Handler};
use crate::http::SkiffRequest;
use crate::session::cookie::SessionCookie;
use crate::session::session::Session;
use crate::session::store::{MemoryStore, SessionStore};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Session middleware configuration.
#[derive(Clone)]
pub struct SessionOptions {
    /// Cookie name carrying the session id.
    pub name: String,
    /// Cookie template applied to minted sessions.
    pub cookie: SessionCookie,
    /// Forwarded-protocol trust for secure-cookie determination.
    pub trust_proxy: Option<bool>,
    /// Reserved. Accepted and threaded, but no signing or verification
    /// is performed with it.
    pub secret: Vec<String>,
    /// Custom store; a fresh in-memory store otherwise.
    pub store: Option<Arc<dyn SessionStore>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            name: "session-id".to_string(),
            cookie: SessionCookie::default(),
            trust_proxy: None,
            secret: Vec::new(),
            store: None,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Secure-cookie determination.
///
/// An explicit `Some(false)` is never secure. Unset trusts only the
/// request's own transport. `Some(true)` trusts the first entry of the
/// forwarded-protocol header.
pub fn is_secure(req: &SkiffRequest, trust_proxy: Option<bool>) -> bool {
    match trust_proxy {
        Some(false) => false,
        None => req.secure,
        Some(true) => req
            .get_header("x-forwarded-proto")
            .and_then(|value| value.split(',').next())
            .map(|proto| proto.trim().eq_ignore_ascii_case("https"))
            .unwrap_or(false),
    }
}

/// Extract a cookie value by name from a `Cookie` header.
fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Build session middleware around its store.
///
/// Returns the handler together with the store so tests and sibling
/// middleware can observe it.
pub fn session_middleware(options: SessionOptions) -> (Handler, Arc<dyn SessionStore>) {
    let store: Arc<dyn SessionStore> = match options.store {
        Some(store) => store,
        None => {
            let store = MemoryStore::new();
            store.connect();
            Arc::new(store)
        }
    };

    // The generate callback lives inside the store; a weak reference
    // keeps the store collectible.
    let weak = Arc::downgrade(&store);
    let template = options.cookie.clone();
    store.set_generate(Arc::new(move |req: &mut SkiffRequest| {
        if let Some(store) = weak.upgrade() {
            let id = Uuid::new_v4().to_string();
            let mut cookie = template.clone();
            cookie.reset();
            debug!("generated session {}", id);
            req.session = Some(Session::new(id, cookie, store));
        }
    }));

    let name = options.name;
    let template = options.cookie;
    let trust_proxy = options.trust_proxy;
    let middleware_store = store.clone();

    let middleware = handler(move |req, res| {
        let store = middleware_store.clone();
        let name = name.clone();
        let template = template.clone();
        async move {
            if !store.is_ready() {
                debug!("session store not ready, passing through");
                return Flow::Next;
            }

            let (incoming_id, secure) = {
                let guard = req.lock().unwrap();
                let id = guard
                    .get_header("cookie")
                    .and_then(|header| cookie_value(header, &name));
                (id, is_secure(&guard, trust_proxy))
            };

            let stored = match &incoming_id {
                Some(id) => store.get(id).await.map(|record| (id.clone(), record)),
                None => None,
            };

            {
                let mut guard = req.lock().unwrap();
                match stored {
                    Some((id, record)) => {
                        let mut session = Session::new(id, template.clone(), store.clone());
                        session.rehydrate(&record);
                        guard.session = Some(session);
                    }
                    None => store.generate(&mut guard),
                }
            }

            let snapshot = {
                let guard = req.lock().unwrap();
                guard
                    .session
                    .as_ref()
                    .map(|session| (session.id.clone(), session.record()))
            };

            if let Some((id, record)) = snapshot {
                store.commit(&id, record.clone()).await;
                let mut cookie = record.cookie;
                cookie.secure = cookie.secure || secure;
                res.lock()
                    .unwrap()
                    .set_header("Set-Cookie", cookie.serialize(&name, &id));
            }

            Flow::Next
        }
    });

    (middleware, store)
}
