//! Bounded conversation history

use std::collections::VecDeque;

use serde::Serialize;

/// Maximum number of exchange records kept per call
pub const HISTORY_CAPACITY: usize = 6;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One side of a conversational exchange
///
/// Only user and assistant records can be constructed; the system
/// instruction is added by the prompt builder, never stored in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeRecord {
    role: Role,
    content: String,
}

impl ExchangeRecord {
    /// Record something the caller said
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Record something the assistant replied
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Fixed-capacity FIFO of exchange records
///
/// Pushing onto a full buffer evicts the oldest record.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    entries: VecDeque<ExchangeRecord>,
    capacity: usize,
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationBuffer {
    /// Create a buffer holding [`HISTORY_CAPACITY`] records
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Create a buffer with a custom capacity (minimum 1)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting the oldest one when full
    pub fn push(&mut self, record: ExchangeRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &ExchangeRecord> {
        self.entries.iter()
    }

    /// Copy of the current history, oldest first
    #[must_use]
    pub fn to_vec(&self) -> Vec<ExchangeRecord> {
        self.entries.iter().cloned().collect()
    }
}
