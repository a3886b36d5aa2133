//! Pluggable observability sink for named lifecycle events
//!
//! The core does not prescribe JSONL or any particular storage; callers
//! inject whatever [`EventSink`] fits (a JSONL writer, a metrics exporter, or
//! nothing at all via [`NullEventSink`]).

use std::collections::BTreeMap;
use std::fmt;

/// A single named event with loosely-typed string fields, emitted at a
/// lifecycle transition.
#[derive(Debug, Clone)]
pub struct Event {
    /// The event name, e.g. `hole_punch_succeeded`.
    pub name: &'static str,
    /// Arbitrary key/value context, ordered for deterministic formatting.
    pub fields: BTreeMap<String, String>,
}

impl Event {
    /// Start building an event named `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: BTreeMap::new(),
        }
    }

    /// Attach a field.
    pub fn with(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }
}

/// Well-known event names, per spec §6's observability section.
pub mod names {
    pub const PEER_SEEN: &str = "peer_seen";
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const CONNECTION_FAILED: &str = "connection_failed";
    pub const CONNECTION_CLOSED: &str = "connection_closed";
    pub const HOLE_PUNCH_STARTED: &str = "hole_punch_started";
    pub const HOLE_PUNCH_SUCCEEDED: &str = "hole_punch_succeeded";
    pub const HOLE_PUNCH_FAILED: &str = "hole_punch_failed";
    pub const HOLE_PUNCH_ABANDONED: &str = "hole_punch_abandoned";
    pub const RELAY_STARTED: &str = "relay_started";
    pub const RELAY_CLOSED: &str = "relay_closed";
    pub const RELAY_FAILED: &str = "relay_failed";
    pub const RELAY_UPGRADED: &str = "relay_upgraded";
    pub const NAT_TYPE_CHANGED: &str = "nat_type_changed";
    pub const NAT_ENDPOINT_CHANGED: &str = "nat_endpoint_changed";
}

/// Receives lifecycle events. Implementations must not block the caller for
/// long; a slow sink should buffer internally.
pub trait EventSink: Send + Sync {
    /// Record `event`.
    fn emit(&self, event: Event);
}

/// Discards every event. The default when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: Event) {}
}

/// Logs every event at `info!` via `tracing`, with fields rendered as
/// `key=value` pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        let fields = event
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(event = event.name, "{}", fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn null_sink_drops_everything() {
        let sink = NullEventSink;
        sink.emit(Event::new(names::PEER_SEEN));
    }

    #[test]
    fn event_builder_accumulates_fields() {
        let event = Event::new(names::HOLE_PUNCH_SUCCEEDED)
            .with("peer", "abc123")
            .with("rtt_ms", 42);
        assert_eq!(event.fields.get("peer").unwrap(), "abc123");
        assert_eq!(event.fields.get("rtt_ms").unwrap(), "42");
    }

    struct RecordingSink(Mutex<Vec<String>>);

    impl EventSink for RecordingSink {
        fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event.name.to_string());
        }
    }

    #[test]
    fn custom_sink_receives_events() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let dyn_sink: Arc<dyn EventSink> = sink.clone();
        dyn_sink.emit(Event::new(names::CONNECTION_ESTABLISHED));
        assert_eq!(sink.0.lock().unwrap().as_slice(), ["connection_established"]);
    }
}
