//! Session cookie value object.
//!
//! The cookie carries serialization options plus derived expiry. The
//! live countdown and the originally requested duration are kept
//! separately so that touching a session renews expiry without losing
//! the configured duration.

use std::time::{Duration, SystemTime};

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// `Priority` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

/// Session cookie options and derived expiry.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub domain: Option<String>,
    pub same_site: Option<SameSite>,
    pub priority: Option<Priority>,
    pub partitioned: bool,
    /// Absolute expiry instant; `None` makes a browser-session cookie.
    pub expires: Option<SystemTime>,
    /// The duration originally requested, retained across touches.
    original_max_age: Option<Duration>,
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            http_only: true,
            secure: false,
            domain: None,
            same_site: None,
            priority: None,
            partitioned: false,
            expires: None,
            original_max_age: None,
        }
    }
}

impl SessionCookie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a relative lifetime. Records the duration as the original
    /// max-age and derives the absolute expiry from now.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.set_max_age(max_age);
        self.original_max_age = Some(max_age);
        self
    }

    /// The originally requested duration, unaffected by later touches.
    pub fn original_max_age(&self) -> Option<Duration> {
        self.original_max_age
    }

    /// The remaining lifetime, derived from the expiry instant. Zero
    /// once expired.
    pub fn max_age(&self) -> Option<Duration> {
        self.expires.map(|at| {
            at.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Reset the live countdown without changing the original duration.
    pub fn set_max_age(&mut self, max_age: Duration) {
        self.expires = Some(SystemTime::now() + max_age);
    }

    /// Set the absolute expiry; the original max-age is re-derived from
    /// now so both stay mutually consistent.
    pub fn set_expires(&mut self, at: SystemTime) {
        self.expires = Some(at);
        self.original_max_age = Some(
            at.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
        );
    }

    /// Renew the live expiry back to the originally requested duration.
    pub fn reset(&mut self) {
        if let Some(original) = self.original_max_age {
            self.set_max_age(original);
        }
    }

    /// Whether the expiry instant has passed. Session cookies without an
    /// expiry never expire here.
    pub fn expired(&self) -> bool {
        match self.expires {
            Some(at) => at <= SystemTime::now(),
            None => false,
        }
    }

    /// Serialize as a `Set-Cookie` header value for a named session id.
    pub fn serialize(&self, name: &str, id: &str) -> String {
        let mut out = format!("{}={}", name, id);
        out.push_str("; Path=");
        out.push_str(&self.path);
        if let Some(max_age) = self.max_age() {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.as_secs().to_string());
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        if let Some(priority) = self.priority {
            out.push_str("; Priority=");
            out.push_str(priority.as_str());
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.partitioned {
            out.push_str("; Partitioned");
        }
        out
    }
}
