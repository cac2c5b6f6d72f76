//! Event emission for cache tiers.
//!
//! Tiers report what they do through a broadcast channel of typed
//! [`CacheEvent`]s. Emission never blocks and never fails: events sent while
//! nobody is subscribed are simply dropped, and slow subscribers observe a
//! lag error on their receiver rather than backpressuring the cache.

use tokio::sync::broadcast;

use crate::value::CacheValue;

const CHANNEL_CAPACITY: usize = 256;

/// A single cache event.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A value was written.
    Set {
        /// The written key.
        key: String,
        /// The written value.
        value: CacheValue,
    },
    /// A value was read (hits only).
    Get {
        /// The read key.
        key: String,
        /// The value that was found.
        value: CacheValue,
    },
    /// A key was deleted.
    Del {
        /// The deleted key.
        key: String,
    },
    /// An informational message.
    Info {
        /// Human-readable message.
        message: String,
    },
    /// A warning. The cache degraded instead of failing.
    Warn {
        /// Human-readable message.
        message: String,
        /// Optional detail, e.g. the underlying error rendered to a string.
        details: Option<String>,
    },
    /// A replication wait completed.
    Wait {
        /// Requested number of replica acknowledgements.
        replicas: u32,
        /// Acknowledgements actually observed.
        acknowledged: u32,
    },
}

impl CacheEvent {
    /// The event name consumers filter on.
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::Set { .. } => "set",
            CacheEvent::Get { .. } => "get",
            CacheEvent::Del { .. } => "del",
            CacheEvent::Info { .. } => "info",
            CacheEvent::Warn { .. } => "warn",
            CacheEvent::Wait { .. } => "wait",
        }
    }
}

/// One-to-many fan-out of [`CacheEvent`]s.
///
/// Cloning the bus clones the sending side; all clones feed the same
/// subscribers, so a bus can be shared across tiers that should report on a
/// single stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Creates a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Creates a bus with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Subscribes to all events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Emits an event. Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: CacheEvent) {
        let _ = self.sender.send(event);
    }

    /// Emits an `info` event and logs it.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(message = %message, "cache info");
        self.emit(CacheEvent::Info { message });
    }

    /// Emits a `warn` event and logs it.
    pub fn warn(&self, message: impl Into<String>, details: Option<String>) {
        let message = message.into();
        tracing::warn!(message = %message, details = ?details, "cache warning");
        self.emit(CacheEvent::Warn { message, details });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(CacheEvent::Del { key: "k".into() });
        bus.info("hello");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name(), "del");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.name(), "info");
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.emit(CacheEvent::Del { key: "k".into() });
    }
}
