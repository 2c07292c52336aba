//! # Wire Id Generator
//!
//! Short, monotonically increasing `wsu:Id` values for one outgoing message:
//! `_0`, `_1`, ... with the first ten served from a static pool.

use uuid::Uuid;

const CACHED_IDS: [&str; 10] = ["_0", "_1", "_2", "_3", "_4", "_5", "_6", "_7", "_8", "_9"];

#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    prefix: Option<String>,
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every id is `prefix` followed by the counter id.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            next: 0,
        }
    }

    /// A prefix unique to this message, derived from a v4 UUID.
    pub fn with_unique_prefix() -> Self {
        Self::with_prefix(format!("uuid-{}", Uuid::new_v4()))
    }

    pub fn next_id(&mut self) -> String {
        let n = self.next;
        self.next += 1;
        let counter = match CACHED_IDS.get(n as usize) {
            Some(cached) => (*cached).to_string(),
            None => format!("_{n}"),
        };
        match &self.prefix {
            Some(prefix) => format!("{prefix}{counter}"),
            None => counter,
        }
    }

    pub fn issued(&self) -> u64 {
        self.next
    }
}
