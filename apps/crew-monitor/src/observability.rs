use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamStats {
    pub events_received: u64,
    pub pings_dropped: u64,
    pub decode_fallbacks: u64,
    pub connections_opened: u64,
    pub transport_errors: u64,
    pub last_event_at: Option<String>,
}

/// Shared counters, bumped from the stream task and the writer.
#[derive(Debug, Default)]
pub struct StreamCounters {
    events_received: AtomicU64,
    pings_dropped: AtomicU64,
    decode_fallbacks: AtomicU64,
    connections_opened: AtomicU64,
    transport_errors: AtomicU64,
    last_event_at: Mutex<Option<String>>,
}

impl StreamCounters {
    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_event_at.lock() {
            *last = Some(chrono::Utc::now().to_rfc3339());
        }
    }

    pub fn record_ping(&self) {
        self.pings_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_fallback(&self) {
        self.decode_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            pings_dropped: self.pings_dropped.load(Ordering::Relaxed),
            decode_fallbacks: self.decode_fallbacks.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            last_event_at: self.last_event_at.lock().ok().and_then(|last| last.clone()),
        }
    }
}
