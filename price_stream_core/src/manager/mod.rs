// Shared, self-healing price stream connection
//
// One ConnectionManager owns the single transport connection, the price cache and the
// statistics record. Consumers query prices and subscribe to events; they never touch
// the transport. All timers are tokio tasks that are aborted when superseded and that
// re-check the session generation before acting.

mod session;


use crate::backoff::ReconnectPolicy;
use crate::error::StreamError;
use crate::events::{EventBus, EventHandler, EventKind, StreamEvent};
use crate::models::PriceUpdate;
use crate::price_cache::PriceCache;
use crate::settings::StreamSettings;
use crate::stats::{Statistics, StatisticsTracker};
use crate::transport::{Connector, FrameSink, NORMAL_CLOSURE};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

/// Foreground state of the hosting environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Point-in-time view of the connection lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub phase: Phase,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub reconnect_attempts: u32,
    pub connection_start_time: Option<DateTime<Utc>>,
    pub saved_endpoint: Option<String>,
    /// Delay of the pending reconnect timer, if one is armed
    pub next_reconnect_delay: Option<Duration>,
    pub ever_connected: bool,
}

#[derive(Default)]
struct Tasks {
    attempt: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    idle_check: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for task in [
            self.attempt.take(),
            self.reader.take(),
            self.heartbeat.take(),
            self.reconnect.take(),
            self.idle_check.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }

    fn reconnect_pending(&self) -> bool {
        self.reconnect.as_ref().is_some_and(|t| !t.is_finished())
    }
}

struct SessionState {
    phase: Phase,
    reconnect_attempts: u32,
    saved_endpoint: Option<String>,
    ever_connected: bool,
    /// Bumped whenever a session is started or abandoned; stale callbacks compare against it
    generation: u64,
    sink: Option<Arc<dyn FrameSink>>,
    connection_start_time: Option<DateTime<Utc>>,
    next_reconnect_delay: Option<Duration>,
    /// Oldest heartbeat not yet acknowledged
    awaiting_ack_since: Option<Instant>,
    visibility_listening: bool,
    tasks: Tasks,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Disconnected,
            reconnect_attempts: 0,
            saved_endpoint: None,
            ever_connected: false,
            generation: 0,
            sink: None,
            connection_start_time: None,
            next_reconnect_delay: None,
            awaiting_ack_since: None,
            visibility_listening: false,
            tasks: Tasks::default(),
        }
    }
}

struct Inner {
    settings: StreamSettings,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    bus: Arc<EventBus>,
    cache: Arc<PriceCache>,
    stats: StatisticsTracker,
    state: Mutex<SessionState>,
    initialized: AtomicBool,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connection flag handed to the statistics tracker. The tracker reads it under
    /// its own lock, so statistics are never recorded while `state` is held.
    fn is_live(&self) -> bool {
        self.lock_state().phase == Phase::Connected
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        st.tasks.abort_all();
        if let Some(sink) = st.sink.take() {
            sink.close(NORMAL_CLOSURE, "client dropped");
        }
    }
}

/// Handle to the shared connection. Cloning is cheap and every clone drives the same
/// connection; dropping the last clone tears it down.
///
/// Lifecycle calls must be made from within a tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Fails with `StreamError::Validation` if `settings` do not pass `validate`.
    pub fn new(
        settings: StreamSettings,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, StreamError> {
        settings.validate()?;
        let bus = Arc::new(EventBus::new());
        let cache = Arc::new(PriceCache::from_settings(&settings));
        let stats = StatisticsTracker::new(bus.clone());
        let policy = ReconnectPolicy::from_settings(&settings);
        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                policy,
                connector,
                bus,
                cache,
                stats,
                state: Mutex::new(SessionState::new()),
                initialized: AtomicBool::new(false),
            }),
        })
    }

    /// Manager backed by the tokio-tungstenite transport
    #[cfg(feature = "native")]
    pub fn native(settings: StreamSettings) -> Result<Self, StreamError> {
        Self::new(
            settings,
            Arc::new(crate::native::TungsteniteConnector::new()),
        )
    }

    /// One-time setup: start listening for visibility changes and arm the idle
    /// health check. Later calls are no-ops.
    pub fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            debug!("Price stream already initialized");
            return;
        }
        let mut st = self.inner.lock_state();
        st.visibility_listening = true;
        self.inner.ensure_idle_check(&mut st);
        info!(
            "Price stream initialized (idle check every {:?})",
            self.inner.settings.idle_check_interval()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Open the shared connection to `endpoint`. No-op while connected or connecting.
    /// The endpoint is remembered for every later reconnect, and the retry budget
    /// starts over.
    pub fn connect(&self, endpoint: &str) {
        let mut st = self.inner.lock_state();
        if st.phase != Phase::Disconnected {
            debug!("Connect to {} ignored: already {:?}", endpoint, st.phase);
            return;
        }
        st.saved_endpoint = Some(endpoint.to_string());
        st.reconnect_attempts = 0;
        if self.is_initialized() {
            st.visibility_listening = true;
            self.inner.ensure_idle_check(&mut st);
        }
        self.inner.begin_attempt(&mut st);
    }

    /// Connect to the saved endpoint. Returns false if none was ever given.
    pub fn resume(&self) -> bool {
        let endpoint = self.inner.lock_state().saved_endpoint.clone();
        match endpoint {
            Some(endpoint) => {
                self.connect(&endpoint);
                true
            }
            None => false,
        }
    }

    /// Close the connection and stop every timer. Nothing reconnects until
    /// `connect` (or `resume`) is called again. The saved endpoint is kept.
    pub fn disconnect(&self) {
        let (sink, was_connected) = {
            let mut st = self.inner.lock_state();
            st.generation += 1;
            st.tasks.abort_all();
            st.visibility_listening = false;
            let was_connected = st.phase == Phase::Connected;
            st.phase = Phase::Disconnected;
            st.reconnect_attempts = 0;
            st.awaiting_ack_since = None;
            st.next_reconnect_delay = None;
            st.connection_start_time = None;
            (st.sink.take(), was_connected)
        };

        if let Some(sink) = sink {
            sink.close(NORMAL_CLOSURE, "client disconnect");
        }
        if was_connected {
            info!("Price stream disconnected by client");
            self.inner.stats.record_disconnected(|| self.inner.is_live());
            self.inner.bus.publish(&StreamEvent::Disconnected {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_string(),
            });
        } else {
            debug!("Price stream stopped while not connected");
        }
    }

    /// Signal from the hosting environment that it went to the foreground or background.
    pub fn notify_visibility(&self, visibility: Visibility) {
        if visibility != Visibility::Visible {
            return;
        }
        let mut st = self.inner.lock_state();
        if !st.visibility_listening || st.phase != Phase::Disconnected {
            return;
        }
        if st.saved_endpoint.is_some() {
            info!("Became visible while disconnected; reconnecting now");
            self.inner.begin_attempt(&mut st);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().phase == Phase::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        let st = self.inner.lock_state();
        ConnectionState {
            phase: st.phase,
            is_connected: st.phase == Phase::Connected,
            is_connecting: st.phase == Phase::Connecting,
            reconnect_attempts: st.reconnect_attempts,
            connection_start_time: st.connection_start_time,
            saved_endpoint: st.saved_endpoint.clone(),
            next_reconnect_delay: st.next_reconnect_delay,
            ever_connected: st.ever_connected,
        }
    }

    /// Latest price for `key`, 0.0 if unknown
    pub fn get_price(&self, key: &str) -> f64 {
        self.inner.cache.lookup(key)
    }

    pub fn get_all_prices(&self) -> HashMap<String, f64> {
        self.inner.cache.snapshot()
    }

    pub fn get_statistics(&self) -> Statistics {
        self.inner.stats.read()
    }

    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        self.inner.bus.subscribe(kind, handler);
    }

    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) {
        self.inner.bus.unsubscribe(kind, handler);
    }

    /// Subscribe a price-update callback. Keep the returned handler to unsubscribe.
    pub fn on_price_update<F>(&self, f: F) -> EventHandler
    where
        F: Fn(&PriceUpdate) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(move |event: &StreamEvent| {
            if let StreamEvent::PriceUpdate(update) = event {
                f(update);
            }
        });
        self.subscribe(EventKind::PriceUpdate, handler.clone());
        handler
    }

    /// Subscribe a statistics callback. Keep the returned handler to unsubscribe.
    pub fn on_stats_updated<F>(&self, f: F) -> EventHandler
    where
        F: Fn(&Statistics) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(move |event: &StreamEvent| {
            if let StreamEvent::StatsUpdated(stats) = event {
                f(stats);
            }
        });
        self.subscribe(EventKind::StatsUpdated, handler.clone());
        handler
    }

    pub fn price_cache(&self) -> &Arc<PriceCache> {
        &self.inner.cache
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.inner.settings
    }
}
