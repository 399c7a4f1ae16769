// Session lifecycle: connection attempts, inbound frames, heartbeat, reconnect timers

use super::{Inner, Phase, SessionState};
use crate::backoff::RetryDecision;
use crate::error::StreamError;
use crate::events::StreamEvent;
use crate::models::PriceUpdate;
use crate::protocol::{decode_frame, heartbeat_frame, InboundFrame};
use crate::transport::{Transport, TransportEvent, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

impl Inner {
    fn is_current(&self, generation: u64, phase: Phase) -> bool {
        let st = self.lock_state();
        st.generation == generation && st.phase == phase
    }

    /// Start a connection attempt to the saved endpoint. Caller has checked that
    /// the manager is disconnected.
    pub(super) fn begin_attempt(self: &Arc<Self>, st: &mut SessionState) {
        let Some(endpoint) = st.saved_endpoint.clone() else {
            return;
        };
        if let Some(timer) = st.tasks.reconnect.take() {
            timer.abort();
        }
        if let Some(attempt) = st.tasks.attempt.take() {
            attempt.abort();
        }

        st.generation += 1;
        st.phase = Phase::Connecting;
        st.next_reconnect_delay = None;
        let generation = st.generation;
        info!(
            "Connecting to {} (retry {}/{})",
            endpoint, st.reconnect_attempts, self.policy.max_attempts
        );

        let weak = Arc::downgrade(self);
        let connector = self.connector.clone();
        let limit = self.settings.connect_timeout();
        st.tasks.attempt = Some(tokio::spawn(async move {
            let outcome = tokio::time::timeout(limit, connector.connect(&endpoint)).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match outcome {
                Ok(Ok(transport)) => inner.on_open(generation, transport),
                Ok(Err(err)) => inner.on_attempt_failed(generation, err),
                Err(_) => inner.on_attempt_failed(generation, StreamError::ConnectTimeout(limit)),
            }
        }));
    }

    fn on_open(self: &Arc<Self>, generation: u64, transport: Transport) {
        let Transport { sink, events } = transport;
        {
            let mut st = self.lock_state();
            if st.generation != generation || st.phase != Phase::Connecting {
                drop(st);
                debug!("Discarding connection from a superseded attempt");
                sink.close(NORMAL_CLOSURE, "superseded");
                return;
            }
            st.phase = Phase::Connected;
            st.reconnect_attempts = 0;
            st.ever_connected = true;
            st.sink = Some(sink);
            st.connection_start_time = Some(Utc::now());
            st.awaiting_ack_since = None;
            st.next_reconnect_delay = None;
            st.tasks.attempt.take();
        }

        info!("Price stream connected");
        // Statistics reset before any frame of the new session can be counted
        self.stats.record_connected(|| self.is_live());
        self.bus.publish(&StreamEvent::Connected);

        let mut st = self.lock_state();
        if st.generation != generation || st.phase != Phase::Connected {
            return;
        }
        let weak = Arc::downgrade(self);
        st.tasks.reader = Some(tokio::spawn(read_events(weak.clone(), generation, events)));
        st.tasks.heartbeat = Some(tokio::spawn(run_heartbeat(
            weak,
            generation,
            self.settings.heartbeat_interval(),
        )));
    }

    fn on_attempt_failed(self: &Arc<Self>, generation: u64, err: StreamError) {
        {
            let mut st = self.lock_state();
            if st.generation != generation || st.phase != Phase::Connecting {
                return;
            }
            st.phase = Phase::Disconnected;
            st.tasks.attempt.take();
            self.schedule_reconnect(&mut st);
        }
        warn!("Connection attempt failed: {}", err);
        self.stats.record_connection_error(|| self.is_live());
        self.bus.publish(&StreamEvent::error(err));
    }

    /// Returns false once the session is over and the reader should stop
    fn on_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Frame(text) => {
                self.handle_frame(generation, &text);
                self.lock_state().generation == generation
            }
            TransportEvent::Error(msg) => {
                if !self.is_current(generation, Phase::Connected) {
                    return false;
                }
                warn!("Transport error: {}", msg);
                self.stats.record_connection_error(|| self.is_live());
                self.bus.publish(&StreamEvent::error(StreamError::Transport(msg)));
                true
            }
            TransportEvent::Closed { code, reason } => {
                self.handle_close(generation, code, reason);
                false
            }
        }
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        if !self.is_current(generation, Phase::Connected) {
            return;
        }
        match decode_frame(text) {
            Err(err) => {
                warn!("Dropping frame: {}", err);
                self.bus.publish(&StreamEvent::error(err));
            }
            Ok(InboundFrame::Pong) => {
                debug!("Heartbeat acknowledged");
                let mut st = self.lock_state();
                if st.generation == generation {
                    st.awaiting_ack_since = None;
                }
            }
            Ok(InboundFrame::Price { update, raw }) => {
                let update = PriceUpdate {
                    key: self.cache.normalizer().normalize(&update.key),
                    ..update
                };
                let fresh = self.cache.apply(&update);
                self.stats.record_message(|| self.is_live());
                self.bus.publish(&StreamEvent::Message(raw));
                if fresh {
                    self.bus.publish(&StreamEvent::PriceUpdate(update));
                } else {
                    debug!("Ignoring out-of-order price for {}", update.key);
                }
            }
            Ok(InboundFrame::Other(raw)) => {
                self.stats.record_message(|| self.is_live());
                self.bus.publish(&StreamEvent::Message(raw));
            }
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        {
            let mut st = self.lock_state();
            if st.generation != generation || st.phase != Phase::Connected {
                return;
            }
            st.phase = Phase::Disconnected;
            st.sink = None;
            st.awaiting_ack_since = None;
            st.connection_start_time = None;
            if let Some(heartbeat) = st.tasks.heartbeat.take() {
                heartbeat.abort();
            }
            // Running on the reader task; let it finish on its own
            st.tasks.reader.take();
            if code != NORMAL_CLOSURE {
                self.schedule_reconnect(&mut st);
            }
        }

        if code == NORMAL_CLOSURE {
            info!("Price stream closed normally");
        } else {
            warn!("Price stream closed abnormally (code {}): {}", code, reason);
        }
        self.stats.record_disconnected(|| self.is_live());
        self.bus.publish(&StreamEvent::Disconnected { code, reason });
    }

    /// Connection is unusable but no close was observed: tear it down and treat
    /// it as an abnormal closure.
    fn liveness_failure(self: &Arc<Self>, generation: u64, err: StreamError) {
        let sink = {
            let mut st = self.lock_state();
            if st.generation != generation || st.phase != Phase::Connected {
                return;
            }
            st.generation += 1;
            st.phase = Phase::Disconnected;
            st.awaiting_ack_since = None;
            st.connection_start_time = None;
            // Running on the heartbeat task
            st.tasks.heartbeat.take();
            if let Some(reader) = st.tasks.reader.take() {
                reader.abort();
            }
            let sink = st.sink.take();
            self.schedule_reconnect(&mut st);
            sink
        };

        warn!("Connection failure: {}", err);
        if let Some(sink) = sink {
            sink.terminate();
        }
        self.stats.record_disconnected(|| self.is_live());
        self.bus.publish(&StreamEvent::Disconnected {
            code: ABNORMAL_CLOSURE,
            reason: err.to_string(),
        });
    }

    /// Returns false once the heartbeat should stop
    fn heartbeat_tick(self: &Arc<Self>, generation: u64) -> bool {
        let sink = {
            let st = self.lock_state();
            if st.generation != generation || st.phase != Phase::Connected {
                return false;
            }
            if let (Some(limit), Some(since)) =
                (self.settings.heartbeat_ack_timeout(), st.awaiting_ack_since)
            {
                if since.elapsed() >= limit {
                    drop(st);
                    self.liveness_failure(generation, StreamError::HeartbeatTimeout(limit));
                    return false;
                }
            }
            match &st.sink {
                Some(sink) => sink.clone(),
                None => return false,
            }
        };

        match sink.send_text(heartbeat_frame()) {
            Ok(()) => {
                {
                    let mut st = self.lock_state();
                    if st.generation == generation {
                        st.awaiting_ack_since.get_or_insert_with(Instant::now);
                    }
                }
                self.stats.record_heartbeat(|| self.is_live());
                true
            }
            Err(err) => {
                self.liveness_failure(generation, err);
                false
            }
        }
    }

    /// Arm the reconnect timer according to the retry policy
    fn schedule_reconnect(self: &Arc<Self>, st: &mut SessionState) {
        if let Some(timer) = st.tasks.reconnect.take() {
            timer.abort();
        }

        let (delay, restart) = match self.policy.decide(st.reconnect_attempts, st.ever_connected) {
            RetryDecision::Backoff(delay) => {
                info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    st.reconnect_attempts + 1,
                    self.policy.max_attempts
                );
                (delay, false)
            }
            RetryDecision::Fallback(delay) => {
                warn!(
                    "Reconnect attempts exhausted; retrying in {:?} with a fresh backoff",
                    delay
                );
                (delay, true)
            }
            RetryDecision::GiveUp => {
                error!(
                    "Giving up after {} failed attempts without ever connecting",
                    st.reconnect_attempts
                );
                st.next_reconnect_delay = None;
                return;
            }
        };

        st.next_reconnect_delay = Some(delay);
        let generation = st.generation;
        let weak = Arc::downgrade(self);
        st.tasks.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_reconnect(generation, restart);
            }
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64, restart: bool) {
        let mut st = self.lock_state();
        if st.generation != generation || st.phase != Phase::Disconnected {
            debug!("Stale reconnect timer ignored");
            return;
        }
        // Running on the timer task
        st.tasks.reconnect.take();
        if restart {
            st.reconnect_attempts = 0;
        } else {
            st.reconnect_attempts += 1;
        }
        self.begin_attempt(&mut st);
    }

    pub(super) fn ensure_idle_check(self: &Arc<Self>, st: &mut SessionState) {
        if st.tasks.idle_check.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.settings.idle_check_interval();
        st.tasks.idle_check = Some(tokio::spawn(run_idle_check(weak, period)));
    }

    fn idle_check(self: &Arc<Self>) {
        let mut st = self.lock_state();
        if st.phase != Phase::Disconnected || st.saved_endpoint.is_none() {
            return;
        }
        if st.tasks.reconnect_pending() {
            debug!("Idle check: reconnect already scheduled");
            return;
        }
        info!("Idle check found the stream down; reconnecting");
        self.begin_attempt(&mut st);
    }
}

async fn read_events(
    weak: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    loop {
        let event = events.recv().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let keep_reading = match event {
            Some(event) => inner.on_transport_event(generation, event),
            None => {
                inner.handle_close(generation, ABNORMAL_CLOSURE, "transport dropped".to_string());
                false
            }
        };
        if !keep_reading {
            return;
        }
    }
}

async fn run_heartbeat(weak: Weak<Inner>, generation: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.heartbeat_tick(generation) {
            return;
        }
    }
}

async fn run_idle_check(weak: Weak<Inner>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.idle_check();
    }
}
