//! Server-side session storage.
//!
//! One store per session-middleware configuration; independent
//! sub-applications get independent stores with no shared state. Expiry
//! is checked lazily on read, never by a background sweep.

use crate::http::SkiffRequest;
use crate::session::cookie::SessionCookie;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Stored session state: data fields plus the cookie that scopes them.
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub data: Map<String, Value>,
    pub cookie: SessionCookie,
}

/// Callback minting a fresh session onto a request; assigned at
/// middleware construction.
pub type GenerateFn = Arc<dyn Fn(&mut SkiffRequest) + Send + Sync>;

/// Readiness signals a store publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreSignal {
    Connect,
    Disconnect,
}

/// Signal subscriber.
pub type SignalCallback = Arc<dyn Fn() + Send + Sync>;

/// Server-side session store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the active record for an id. An expired record is deleted
    /// here and reported absent.
    async fn get(&self, id: &str) -> Option<SessionRecord>;

    /// Unconditionally upsert a record.
    async fn commit(&self, id: &str, record: SessionRecord);

    /// Replace only the cookie of an existing record; no-op when absent.
    async fn touch(&self, id: &str, cookie: SessionCookie);

    /// Remove an id unconditionally.
    async fn destroy(&self, id: &str);

    /// Remove every record.
    async fn clear(&self);

    /// Number of stored records.
    async fn len(&self) -> usize;

    /// Snapshot of every stored record.
    async fn all(&self) -> Vec<(String, SessionRecord)>;

    /// Whether the store is accepting requests.
    fn is_ready(&self) -> bool;

    /// Assign the generate callback.
    fn set_generate(&self, generate: GenerateFn);

    /// Mint a fresh session onto a request via the assigned callback.
    /// Without a callback this does nothing.
    fn generate(&self, req: &mut SkiffRequest);
}

/// In-memory [`SessionStore`].
pub struct MemoryStore {
    records: Mutex<HashMap<String, SessionRecord>>,
    ready: AtomicBool,
    generate: Mutex<Option<GenerateFn>>,
    subscribers: Mutex<HashMap<StoreSignal, Vec<SignalCallback>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
            generate: Mutex::new(None),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a readiness signal.
    pub fn subscribe(&self, signal: StoreSignal, callback: SignalCallback) {
        self.subscribers
            .lock()
            .unwrap()
            .entry(signal)
            .or_default()
            .push(callback);
    }

    fn notify(&self, signal: StoreSignal) {
        let callbacks = self
            .subscribers
            .lock()
            .unwrap()
            .get(&signal)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }

    /// Mark the store ready and notify connect subscribers.
    pub fn connect(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.notify(StoreSignal::Connect);
    }

    /// Mark the store not ready and notify disconnect subscribers.
    pub fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.notify(StoreSignal::Disconnect);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &str) -> Option<SessionRecord> {
        tokio::task::yield_now().await;
        let mut records = self.records.lock().unwrap();
        match records.get(id) {
            Some(record) if record.cookie.expired() => {
                debug!("session {} expired, removing", id);
                records.remove(id);
                None
            }
            Some(record) => Some(record.clone()),
            None => None,
        }
    }

    async fn commit(&self, id: &str, record: SessionRecord) {
        tokio::task::yield_now().await;
        self.records.lock().unwrap().insert(id.to_string(), record);
    }

    async fn touch(&self, id: &str, cookie: SessionCookie) {
        tokio::task::yield_now().await;
        if let Some(record) = self.records.lock().unwrap().get_mut(id) {
            record.cookie = cookie;
        }
    }

    async fn destroy(&self, id: &str) {
        tokio::task::yield_now().await;
        self.records.lock().unwrap().remove(id);
    }

    async fn clear(&self) {
        tokio::task::yield_now().await;
        self.records.lock().unwrap().clear();
    }

    async fn len(&self) -> usize {
        tokio::task::yield_now().await;
        self.records.lock().unwrap().len()
    }

    async fn all(&self) -> Vec<(String, SessionRecord)> {
        tokio::task::yield_now().await;
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn set_generate(&self, generate: GenerateFn) {
        *self.generate.lock().unwrap() = Some(generate);
    }

    fn generate(&self, req: &mut SkiffRequest) {
        let generate = self.generate.lock().unwrap().clone();
        if let Some(generate) = generate {
            generate(req);
        }
    }
}
