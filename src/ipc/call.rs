//! Call envelope.

use serde::Serialize;
use std::time::Instant;

/// Anything that can be attributed to a caller for priority decisions.
pub trait CallIdentity {
    fn identity(&self) -> &str;

    /// Level a fair queue already chose for this call, if the envelope remembers it.
    fn priority_level(&self) -> Option<usize> {
        None
    }

    fn set_priority_level(&mut self, _level: usize) {}
}

/// One queued RPC call.
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub id: u64,
    /// Caller the call is accounted to.
    pub user: String,
    pub method: String,
    #[serde(skip)]
    pub received_at: Instant,
    /// Chosen on the first insertion attempt and kept across retries.
    pub priority_level: Option<usize>,
}

impl Call {
    pub fn new(id: u64, user: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id,
            user: user.into(),
            method: method.into(),
            received_at: Instant::now(),
            priority_level: None,
        }
    }
}

impl CallIdentity for Call {
    fn identity(&self) -> &str {
        &self.user
    }

    fn priority_level(&self) -> Option<usize> {
        self.priority_level
    }

    fn set_priority_level(&mut self, level: usize) {
        self.priority_level = Some(level);
    }
}

impl CallIdentity for String {
    fn identity(&self) -> &str {
        self
    }
}
