use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use gatesync_core::protocol::{decode_frame, DecodeError, InboundEvent, OutboundRequest};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connector::{Connection, Connector};
use crate::error::TransportError;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10_000);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

struct Inner {
    state: ConnectionState,
    /// Bumped for every connection attempt. Tasks carry the generation they
    /// were started for and stand down once it is superseded.
    generation: u64,
    /// Set by `disconnect`; blocks automatic reconnects until `connect`.
    stopped: bool,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    last_ping: Option<Instant>,
    connecting: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            generation: 0,
            stopped: false,
            outgoing: None,
            last_ping: None,
            connecting: None,
            reader: None,
            heartbeat: None,
            reconnect: None,
        }
    }

    /// Drops the live connection and stops its tasks.
    fn teardown(&mut self) {
        for handle in [
            self.connecting.take(),
            self.reader.take(),
            self.heartbeat.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
        self.outgoing = None;
        self.last_ping = None;
    }

    fn reconnect_pending(&self) -> bool {
        self.reconnect
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

struct Shared {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<InboundEvent>,
    inner: Mutex<Inner>,
}

/// Reconnecting gateway connection.
///
/// Decoded inbound frames and the local `Open`/`Close` lifecycle events are
/// delivered in order on the receiver returned by [`Transport::new`]. The
/// shared state lock is never held across an `.await`.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Transport")
            .field("url", &self.shared.config.url)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .finish()
    }
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            shared: Arc::new(Shared {
                config,
                connector,
                events,
                inner: Mutex::new(Inner::new()),
            }),
        };
        (transport, rx)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Starts connecting unless a connection is already open or opening.
    pub fn connect(&self) {
        let mut inner = self.shared.inner.lock();
        inner.stopped = false;
        if inner.state != ConnectionState::Disconnected {
            tracing::debug!(state = %inner.state, "connect ignored");
            return;
        }
        if let Some(handle) = inner.reconnect.take() {
            handle.abort();
        }
        Shared::begin_connect(&self.shared, &mut inner);
    }

    /// Sends `request` on the open connection. Nothing is queued while
    /// disconnected; the return value says whether the frame went out.
    pub fn send(&self, request: &OutboundRequest) -> bool {
        let text = match encode(request) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(request = request.type_name(), %err, "dropping request");
                return false;
            }
        };

        let inner = self.shared.inner.lock();
        match (&inner.state, &inner.outgoing) {
            (ConnectionState::Connected, Some(outgoing)) => {
                let sent = outgoing.send(text).is_ok();
                tracing::trace!(request = request.type_name(), sent, "sent request");
                sent
            }
            _ => {
                tracing::debug!(
                    request = request.type_name(),
                    state = %inner.state,
                    "not connected, request dropped"
                );
                false
            }
        }
    }

    /// Closes the connection and cancels pending timers. No reconnect is
    /// attempted until the next [`Transport::connect`].
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        inner.stopped = true;
        if let Some(handle) = inner.reconnect.take() {
            handle.abort();
        }
        let previous = inner.state;
        inner.teardown();
        inner.generation += 1;
        inner.state = ConnectionState::Disconnected;

        if previous != ConnectionState::Disconnected {
            tracing::info!(url = %self.shared.config.url, "disconnected");
            self.shared.emit(InboundEvent::Close {
                reason: Some("client disconnect".to_string()),
            });
        }
    }
}

fn encode(request: &OutboundRequest) -> Result<String, TransportError> {
    Ok(request.encode()?)
}

impl Shared {
    fn emit(&self, event: InboundEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }

    fn begin_connect(shared: &Arc<Shared>, inner: &mut Inner) {
        inner.generation += 1;
        inner.state = ConnectionState::Connecting;
        let generation = inner.generation;

        tracing::debug!(url = %shared.config.url, generation, "connecting");

        let weak = Arc::downgrade(shared);
        let connector = Arc::clone(&shared.connector);
        let url = shared.config.url.clone();
        inner.connecting = Some(tokio::spawn(async move {
            let result = connector.connect(&url).await;
            if let Some(shared) = weak.upgrade() {
                Shared::finish_connect(&shared, generation, result);
            }
        }));
    }

    fn finish_connect(
        shared: &Arc<Shared>,
        generation: u64,
        result: Result<Connection, TransportError>,
    ) {
        let mut inner = shared.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connecting {
            tracing::debug!(generation, "discarding superseded connection attempt");
            return;
        }
        inner.connecting = None;

        let connection = match result {
            Ok(connection) => connection,
            Err(err) => {
                tracing::warn!(url = %shared.config.url, %err, "connection attempt failed");
                drop(inner);
                Shared::handle_close(shared, generation, Some(err.to_string()));
                return;
            }
        };

        inner.state = ConnectionState::Connected;
        inner.outgoing = Some(connection.outgoing);
        tracing::info!(url = %shared.config.url, generation, "connected");
        shared.emit(InboundEvent::Open);

        inner.reader = Some(spawn_reader(
            Arc::downgrade(shared),
            generation,
            connection.incoming,
        ));
        inner.heartbeat = Some(spawn_heartbeat(
            Arc::downgrade(shared),
            generation,
            shared.config.heartbeat_interval,
        ));
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        let event = match decode_frame(text) {
            Ok(event) => event,
            Err(DecodeError::UnknownType(event_type)) => {
                tracing::debug!(%event_type, "ignoring unknown frame type");
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "dropping malformed frame");
                return;
            }
        };

        let inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        let event = match event {
            InboundEvent::Pong(mut pong) => {
                pong.latency_ms = inner
                    .last_ping
                    .map(|sent| sent.elapsed().as_millis() as u64);
                InboundEvent::Pong(pong)
            }
            other => other,
        };
        tracing::trace!(kind = %event.kind(), "received frame");
        self.emit(event);
    }

    /// Handles the end of connection `generation`, whether it failed to
    /// open or dropped later. Stale generations and repeated closes are
    /// ignored.
    fn handle_close(shared: &Arc<Shared>, generation: u64, reason: Option<String>) {
        let mut inner = shared.inner.lock();
        if inner.generation != generation || inner.state == ConnectionState::Disconnected {
            tracing::debug!(generation, "ignoring close of inactive connection");
            return;
        }

        inner.teardown();
        inner.state = ConnectionState::Disconnected;
        tracing::info!(url = %shared.config.url, reason = ?reason, "connection closed");
        shared.emit(InboundEvent::Close { reason });

        if !inner.stopped {
            Shared::schedule_reconnect(shared, &mut inner);
        }
    }

    fn schedule_reconnect(shared: &Arc<Shared>, inner: &mut Inner) {
        if inner.reconnect_pending() {
            return;
        }

        let delay = shared.config.reconnect_delay;
        tracing::debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let weak = Arc::downgrade(shared);
        inner.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut inner = shared.inner.lock();
            inner.reconnect = None;
            if inner.stopped || inner.state != ConnectionState::Disconnected {
                return;
            }
            Shared::begin_connect(&shared, &mut inner);
        }));
    }
}

fn spawn_reader(
    weak: Weak<Shared>,
    generation: u64,
    mut incoming: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = incoming.recv().await {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.handle_frame(generation, &text);
        }
        if let Some(shared) = weak.upgrade() {
            Shared::handle_close(&shared, generation, Some("connection closed".to_string()));
        }
    })
}

fn spawn_heartbeat(weak: Weak<Shared>, generation: u64, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ping = match encode(&OutboundRequest::Ping) {
            Ok(ping) => ping,
            Err(err) => {
                tracing::warn!(%err, "heartbeat disabled");
                return;
            }
        };

        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut inner = shared.inner.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connected {
                return;
            }
            inner.last_ping = Some(Instant::now());
            let sent = inner
                .outgoing
                .as_ref()
                .is_some_and(|outgoing| outgoing.send(ping.clone()).is_ok());
            tracing::trace!(sent, "heartbeat ping");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingConnector {
        attempts: AtomicUsize,
        refuse: AtomicBool,
        peers: Mutex<Vec<crate::connector::PeerEnds>>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::connect(url, "refused"));
            }
            let (connection, peer) = Connection::pair();
            self.peers.lock().push(peer);
            Ok(connection)
        }
    }

    fn transport(
        connector: &Arc<CountingConnector>,
    ) -> (Transport, mpsc::UnboundedReceiver<InboundEvent>) {
        let connector: Arc<dyn Connector> = connector.clone();
        Transport::new(TransportConfig::new("ws://gateway.test/ws"), connector)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_close_does_not_schedule_second_reconnect() {
        let connector = Arc::new(CountingConnector::default());
        let (transport, mut events) = transport(&connector);
        transport.connect();
        settle().await;
        assert_eq!(events.recv().await, Some(InboundEvent::Open));

        let generation = transport.shared.inner.lock().generation;
        Shared::handle_close(&transport.shared, generation, None);
        Shared::handle_close(&transport.shared, generation, None);
        assert!(matches!(events.try_recv(), Ok(InboundEvent::Close { .. })));
        assert!(events.try_recv().is_err());

        tokio::time::advance(DEFAULT_RECONNECT_DELAY).await;
        settle().await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        tokio::time::advance(DEFAULT_RECONNECT_DELAY).await;
        settle().await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_close_is_ignored() {
        let connector = Arc::new(CountingConnector::default());
        let (transport, mut events) = transport(&connector);
        transport.connect();
        settle().await;
        assert_eq!(events.recv().await, Some(InboundEvent::Open));

        let generation = transport.shared.inner.lock().generation;
        Shared::handle_close(&transport.shared, generation - 1, None);
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_from_superseded_connection_are_dropped() {
        let connector = Arc::new(CountingConnector::default());
        let (transport, mut events) = transport(&connector);
        transport.connect();
        settle().await;
        assert_eq!(events.recv().await, Some(InboundEvent::Open));

        let generation = transport.shared.inner.lock().generation;
        transport.shared.handle_frame(generation + 1, r#"{"type":"streamStart"}"#);
        assert!(events.try_recv().is_err());

        transport.shared.handle_frame(generation, r#"{"type":"streamStart"}"#);
        assert_eq!(events.try_recv().ok(), Some(InboundEvent::StreamStart));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
