//! Logging sink injected into the engine
//!
//! The engine reports plan creation, coefficient failures and overflow
//! statistics through a single [`LogSink`]. Hosts pick where the text goes.

use std::sync::{Arc, Mutex};

/// Receiver for engine messages
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn LogSink>;

/// Forwards every message to `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "bfir", "{}", message);
    }
}

/// Collects messages in memory
#[derive(Debug, Default)]
pub struct BufferedSink {
    messages: Mutex<Vec<String>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything logged so far
    pub fn messages(&self) -> Vec<String> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True if any logged message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }

    pub fn clear(&self) {
        match self.messages.lock() {
            Ok(mut messages) => messages.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl LogSink for BufferedSink {
    fn log(&self, message: &str) {
        match self.messages.lock() {
            Ok(mut messages) => messages.push(message.to_string()),
            Err(poisoned) => poisoned.into_inner().push(message.to_string()),
        }
    }
}

/// Default sink used when a host does not provide one
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}
