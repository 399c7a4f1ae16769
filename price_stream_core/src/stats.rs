// Connection statistics tracking
use crate::events::{EventBus, StreamEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Process-lifetime connection statistics.
/// Counters only grow, except the per-session ones which reset on each new connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_connections: u64,
    pub disconnections: u64,
    pub connection_errors: u64,
    pub messages_received: u64,
    pub current_session_messages: u64,
    pub heartbeats_sent: u64,
    pub last_connected_time: Option<DateTime<Utc>>,
    pub last_disconnected_time: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
    pub connection_start_time: Option<DateTime<Utc>>,
    pub is_connected: bool,
}

impl Statistics {
    fn refresh(&mut self, live: bool, now: DateTime<Utc>) {
        self.is_connected = live;
        if live {
            if let Some(start) = self.connection_start_time {
                self.uptime_seconds = (now - start).num_seconds().max(0) as u64;
            }
        }
    }
}

pub struct StatisticsTracker {
    record: Mutex<Statistics>,
    bus: Arc<EventBus>,
}

impl StatisticsTracker {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            record: Mutex::new(Statistics::default()),
            bus,
        }
    }

    /// Merge a partial update, recompute the derived fields from the live
    /// connection flag, and publish the result as `StatsUpdated`.
    ///
    /// `live` is read while the record is locked, so two concurrent records
    /// cannot leave a connection flag that the manager no longer holds.
    pub fn record<L, F>(&self, live: L, update: F) -> Statistics
    where
        L: FnOnce() -> bool,
        F: FnOnce(&mut Statistics),
    {
        let snapshot = {
            let mut stats = self.record.lock().unwrap_or_else(PoisonError::into_inner);
            update(&mut stats);
            stats.refresh(live(), Utc::now());
            stats.clone()
        };
        self.bus.publish(&StreamEvent::StatsUpdated(snapshot.clone()));
        snapshot
    }

    pub fn record_connected<L: FnOnce() -> bool>(&self, live: L) -> Statistics {
        let now = Utc::now();
        self.record(live, |s| {
            s.total_connections += 1;
            s.last_connected_time = Some(now);
            s.connection_start_time = Some(now);
            s.current_session_messages = 0;
            s.uptime_seconds = 0;
        })
    }

    pub fn record_disconnected<L: FnOnce() -> bool>(&self, live: L) -> Statistics {
        let now = Utc::now();
        self.record(live, |s| {
            s.disconnections += 1;
            s.last_disconnected_time = Some(now);
            s.current_session_messages = 0;
        })
    }

    pub fn record_connection_error<L: FnOnce() -> bool>(&self, live: L) -> Statistics {
        self.record(live, |s| s.connection_errors += 1)
    }

    pub fn record_message<L: FnOnce() -> bool>(&self, live: L) -> Statistics {
        self.record(live, |s| {
            s.messages_received += 1;
            s.current_session_messages += 1;
        })
    }

    pub fn record_heartbeat<L: FnOnce() -> bool>(&self, live: L) -> Statistics {
        self.record(live, |s| s.heartbeats_sent += 1)
    }

    /// Copy of the current record with uptime brought up to date
    pub fn read(&self) -> Statistics {
        let mut stats = self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let live = stats.is_connected;
        stats.refresh(live, Utc::now());
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{handler, EventKind};

    fn up() -> bool {
        true
    }

    fn down() -> bool {
        false
    }

    #[test]
    fn test_session_counters_reset_on_connect() {
        let tracker = StatisticsTracker::new(Arc::new(EventBus::new()));
        tracker.record_connected(up);
        tracker.record_message(up);
        tracker.record_message(up);
        tracker.record_disconnected(down);
        let stats = tracker.record_connected(up);

        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.disconnections, 1);
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.current_session_messages, 0);
        assert_eq!(stats.uptime_seconds, 0);
        assert!(stats.is_connected);
    }

    #[test]
    fn test_disconnect_clears_live_flag() {
        let tracker = StatisticsTracker::new(Arc::new(EventBus::new()));
        tracker.record_connected(up);
        tracker.record_message(up);
        let stats = tracker.record_disconnected(down);

        assert!(!stats.is_connected);
        assert_eq!(stats.current_session_messages, 0);
        assert!(stats.last_disconnected_time.is_some());
        assert_eq!(tracker.read(), stats);
    }

    #[test]
    fn test_late_record_keeps_flag_down() {
        let tracker = StatisticsTracker::new(Arc::new(EventBus::new()));
        tracker.record_connected(up);
        tracker.record_disconnected(down);
        // heartbeat that was sent just before the close
        let stats = tracker.record_heartbeat(down);

        assert_eq!(stats.heartbeats_sent, 1);
        assert!(!stats.is_connected);
        assert!(!tracker.read().is_connected);
    }

    #[test]
    fn test_every_record_publishes_a_copy() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            EventKind::StatsUpdated,
            handler(move |event| {
                if let StreamEvent::StatsUpdated(stats) = event {
                    sink.lock().unwrap().push(stats.heartbeats_sent);
                }
            }),
        );

        let tracker = StatisticsTracker::new(bus);
        tracker.record_heartbeat(up);
        tracker.record_heartbeat(up);
        tracker.record_connection_error(up);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 2]);
        assert_eq!(tracker.read().connection_errors, 1);
    }
}
