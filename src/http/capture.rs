//! Response capture shim.
//!
//! The synthetic response never reaches a socket; instead its write/end
//! entry points feed this shim, which accumulates emitted bytes into one
//! buffer and settles a one-shot [`Outcome`] when the response ends.
//! JS-style overloaded call signatures are replaced by explicit options
//! structs ([`WriteOptions`], [`EndOptions`]) with a single normalization
//! path.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// The sole value an invocation resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Final HTTP status code.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Final response body.
    pub body: String,
}

/// Identity of the invoking principal, merged into JSON response bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Open id of the caller.
    pub open_id: Option<String>,
    /// App id the call was issued under.
    pub app_id: Option<String>,
    /// Union id of the caller.
    pub union_id: Option<String>,
}

impl CallerContext {
    /// Read the caller identity the hosting runtime exposes per call.
    pub fn from_env() -> Self {
        Self {
            open_id: std::env::var("WX_OPENID").ok(),
            app_id: std::env::var("WX_APPID").ok(),
            union_id: std::env::var("WX_UNIONID").ok(),
        }
    }

    /// The `wxContext` value merged into JSON object bodies. Absent
    /// fields serialize as `null`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "openid": self.open_id,
            "appid": self.app_id,
            "unionid": self.union_id,
        })
    }
}

/// A chunk handed to the write/end entry points.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// Text chunk.
    Text(String),
    /// Raw byte chunk.
    Binary(Bytes),
}

/// How a chunk's content is framed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Plain UTF-8 text (lossy for raw bytes).
    #[default]
    Utf8,
    /// The chunk carries base64 text that must be decoded first.
    Base64,
}

/// Explicit parameter record for the write entry point.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Chunk to append, if any.
    pub chunk: Option<Chunk>,
    /// Framing of the chunk.
    pub encoding: Encoding,
}

impl WriteOptions {
    /// Write a text chunk.
    pub fn text(chunk: impl Into<String>) -> Self {
        Self {
            chunk: Some(Chunk::Text(chunk.into())),
            encoding: Encoding::Utf8,
        }
    }

    /// Write a base64-framed chunk.
    pub fn base64(chunk: impl Into<String>) -> Self {
        Self {
            chunk: Some(Chunk::Text(chunk.into())),
            encoding: Encoding::Base64,
        }
    }

    /// Write a raw byte chunk.
    pub fn binary(chunk: impl Into<Bytes>) -> Self {
        Self {
            chunk: Some(Chunk::Binary(chunk.into())),
            encoding: Encoding::Utf8,
        }
    }
}

/// Explicit parameter record for the end entry point.
#[derive(Debug, Clone, Default)]
pub struct EndOptions {
    /// Final chunk to append before completion, if any.
    pub chunk: Option<Chunk>,
    /// Framing of the chunk.
    pub encoding: Encoding,
}

impl EndOptions {
    /// End without a final chunk.
    pub fn empty() -> Self {
        Self::default()
    }

    /// End with a final text chunk.
    pub fn text(chunk: impl Into<String>) -> Self {
        Self {
            chunk: Some(Chunk::Text(chunk.into())),
            encoding: Encoding::Utf8,
        }
    }
}

/// Accumulates decoded body bytes for one invocation and settles the
/// Outcome exactly once. Owned solely by the synthetic response.
pub struct Capture {
    buffer: String,
    caller: CallerContext,
    tx: Option<oneshot::Sender<Outcome>>,
}

impl Capture {
    /// Create a capture together with the receiver the orchestrator
    /// awaits for the settled Outcome.
    pub fn channel(caller: CallerContext) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                buffer: String::new(),
                caller,
                tx: Some(tx),
            },
            rx,
        )
    }

    /// Decode one chunk into the accumulator. Returns the number of
    /// bytes absorbed so the response can keep its byte counter.
    pub fn absorb(&mut self, chunk: Chunk, encoding: Encoding) -> usize {
        let text = match (chunk, encoding) {
            (Chunk::Text(s), Encoding::Utf8) => s,
            (Chunk::Text(s), Encoding::Base64) => match STANDARD.decode(s.as_bytes()) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    warn!("base64 chunk failed to decode, keeping raw text: {}", err);
                    s
                }
            },
            (Chunk::Binary(b), Encoding::Base64) => match STANDARD.decode(&b[..]) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    warn!("base64 chunk failed to decode, keeping raw bytes: {}", err);
                    String::from_utf8_lossy(&b).into_owned()
                }
            },
            (Chunk::Binary(b), Encoding::Utf8) => String::from_utf8_lossy(&b).into_owned(),
        };
        let len = text.len();
        self.buffer.push_str(&text);
        len
    }

    /// Whether the Outcome has already been settled.
    pub fn settled(&self) -> bool {
        self.tx.is_none()
    }

    /// Settle the Outcome with the accumulated body. First settle wins;
    /// later attempts are no-ops.
    ///
    /// If the full buffer parses as a JSON object, the caller identity is
    /// merged in under `wxContext` and the object is re-serialized. Any
    /// other parse result leaves the raw string untouched.
    pub fn settle(&mut self, status_code: u16) {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => {
                debug!("outcome already settled, ignoring second completion");
                return;
            }
        };

        let body = match serde_json::from_str::<Value>(&self.buffer) {
            Ok(Value::Object(mut map)) => {
                map.insert("wxContext".to_string(), self.caller.to_value());
                Value::Object(map).to_string()
            }
            _ => self.buffer.clone(),
        };

        // The receiver may be gone if the invocation was abandoned.
        let _ = tx.send(Outcome { status_code, body });
    }
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("buffered", &self.buffer.len())
            .field("settled", &self.settled())
            .finish()
    }
}
