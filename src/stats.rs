use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the capture stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Events read from the event stream, whether or not a frame was written.
    NetCapEvents,
    /// Events the capture source reported as lost.
    LostNetCapEvents,
}

/// Capture stage statistics, shared with external readers.
///
/// Create one per pipeline and hand out clones of the `Arc`.
#[derive(Debug, Default)]
pub struct CaptureStats {
    net_cap_events: AtomicU64,
    lost_net_cap_events: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub net_cap_events: u64,
    pub lost_net_cap_events: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::NetCapEvents => &self.net_cap_events,
            Counter::LostNetCapEvents => &self.lost_net_cap_events,
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counter(counter).fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            net_cap_events: self.get(Counter::NetCapEvents),
            lost_net_cap_events: self.get(Counter::LostNetCapEvents),
        }
    }
}
