//! Session instance bound to one request.

use crate::http::SharedRequest;
use crate::session::cookie::SessionCookie;
use crate::session::store::{SessionRecord, SessionStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// A JSON value counts as set when it is neither null, `false`, an
/// empty string nor zero.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

/// Field-by-field rehydration merge: an existing truthy field wins, and
/// stored nulls never overwrite anything.
pub(crate) fn merge_absent(fresh: &mut Map<String, Value>, stored: &Map<String, Value>) {
    for (key, value) in stored {
        if value.is_null() {
            continue;
        }
        let keep_existing = fresh.get(key).map(is_truthy).unwrap_or(false);
        if !keep_existing {
            fresh.insert(key.clone(), value.clone());
        }
    }
}

/// One session, bound to a request for the invocation's lifetime.
#[derive(Clone)]
pub struct Session {
    /// Generated identifier, stable for the session's life.
    pub id: String,
    /// Live cookie with the current countdown.
    pub cookie: SessionCookie,
    /// Session data fields.
    pub data: Map<String, Value>,
    store: Arc<dyn SessionStore>,
}

impl Session {
    /// Bind a fresh session.
    pub fn new(id: impl Into<String>, cookie: SessionCookie, store: Arc<dyn SessionStore>) -> Self {
        Self {
            id: id.into(),
            cookie,
            data: Map::new(),
            store,
        }
    }

    /// Rebuild from a stored record: the stored cookie carries its
    /// original max-age and absolute expiry over; data fields merge
    /// without clobbering anything already set here.
    pub fn rehydrate(&mut self, stored: &SessionRecord) {
        self.cookie = stored.cookie.clone();
        merge_absent(&mut self.data, &stored.data);
    }

    /// Snapshot for storage.
    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            data: self.data.clone(),
            cookie: self.cookie.clone(),
        }
    }

    /// Get a data field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Set a data field.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Renew expiry back to the originally configured duration.
    pub fn touch(&mut self) {
        self.cookie.reset();
    }

    /// Commit the current state to the store.
    pub async fn save(&self) {
        self.store.commit(&self.id, self.record()).await;
    }

    /// Re-fetch from the store and rebuild in place, preserving the
    /// current countdown.
    pub async fn reload(&mut self) {
        if let Some(stored) = self.store.get(&self.id).await {
            let cookie = self.cookie.clone();
            merge_absent(&mut self.data, &stored.data);
            self.cookie = cookie;
        }
    }

    /// Remove this session from the store. The caller detaches it from
    /// the request.
    pub async fn destroy(&self) {
        self.store.destroy(&self.id).await;
    }
}

/// Destroy the request's current session, then mint a fresh one via the
/// store's generate callback. The destroy completes before generate
/// runs.
pub async fn regenerate(req: &SharedRequest) {
    let current = {
        let guard = req.lock().unwrap();
        guard
            .session
            .as_ref()
            .map(|session| (session.id.clone(), session.store.clone()))
    };
    let (id, store) = match current {
        Some(pair) => pair,
        None => return,
    };
    store.destroy(&id).await;
    debug!("regenerating session, old id {}", id);
    {
        let mut guard = req.lock().unwrap();
        guard.session = None;
        store.generate(&mut guard);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("cookie", &self.cookie)
            .finish()
    }
}
