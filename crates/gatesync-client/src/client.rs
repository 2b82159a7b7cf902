use std::sync::Arc;

use gatesync_config::ClientConfig;
use gatesync_core::protocol::{Catalog, ChatTurn, EventKind, InboundEvent, OutboundRequest, Role};
use gatesync_core::{Dispatcher, Subscription};
use gatesync_session::projection::chat_history;
use gatesync_session::{ConnectionStatus, ConnectionStatusStore, Session, SessionStore};
use gatesync_transport::{
    ConnectionState, Connector, Transport, TransportConfig, WsConnector,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

/// Event kinds that change the conversation.
const SESSION_KINDS: [EventKind; 11] = [
    EventKind::Session,
    EventKind::History,
    EventKind::SessionPatch,
    EventKind::StreamStart,
    EventKind::StreamChunk,
    EventKind::StreamEnd,
    EventKind::Error,
    EventKind::PushMessage,
    EventKind::ToolCall,
    EventKind::ToolResult,
    EventKind::Close,
];

pub fn transport_config(config: &ClientConfig) -> TransportConfig {
    TransportConfig {
        url: config.gateway_url.clone(),
        heartbeat_interval: config.heartbeat_interval,
        reconnect_delay: config.reconnect_delay,
    }
}

/// Wires the transport, the dispatcher and both stores together.
///
/// Inbound events are applied one at a time by [`GatewayClient::run`] (or
/// [`GatewayClient::drain`]); each event's handlers all finish before the
/// next event is dispatched.
pub struct GatewayClient {
    transport: Transport,
    events: mpsc::UnboundedReceiver<InboundEvent>,
    dispatcher: Dispatcher,
    session: Arc<Mutex<SessionStore>>,
    status: Arc<Mutex<ConnectionStatusStore>>,
    catalog: Arc<Mutex<Option<Catalog>>>,
    subscriptions: Vec<Subscription>,
}

impl GatewayClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_connector(transport_config(config), Arc::new(WsConnector))
    }

    pub fn with_connector(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (transport, events) = Transport::new(config, connector);
        Self {
            transport,
            events,
            dispatcher: Dispatcher::new(),
            session: Arc::new(Mutex::new(SessionStore::new())),
            status: Arc::new(Mutex::new(ConnectionStatusStore::new())),
            catalog: Arc::new(Mutex::new(None)),
            subscriptions: Vec::new(),
        }
    }

    /// Subscribes the stores and the protocol handshake to the dispatcher.
    /// Calling it again does nothing.
    pub fn install_core_handlers(&mut self) {
        if !self.subscriptions.is_empty() {
            return;
        }

        for kind in SESSION_KINDS {
            let session = Arc::clone(&self.session);
            self.subscriptions.push(self.dispatcher.on(kind, move |event| {
                session.lock().apply(event);
            }));
        }

        let status = Arc::clone(&self.status);
        self.subscriptions
            .push(self.dispatcher.on_any(move |_, event| {
                status.lock().apply(event);
            }));

        let transport = self.transport.clone();
        self.subscriptions
            .push(self.dispatcher.on(EventKind::Open, move |_| {
                for request in [
                    OutboundRequest::GetConfig,
                    OutboundRequest::GetCatalog,
                    OutboundRequest::GetSession,
                ] {
                    transport.send(&request);
                }
            }));

        let transport = self.transport.clone();
        self.subscriptions
            .push(self.dispatcher.on(EventKind::ReloadHistory, move |_| {
                tracing::debug!("gateway asked for a history reload");
                transport.send(&OutboundRequest::GetSession);
            }));

        let catalog = Arc::clone(&self.catalog);
        self.subscriptions
            .push(self.dispatcher.on(EventKind::Catalog, move |event| {
                if let InboundEvent::Catalog(payload) = event {
                    *catalog.lock() = Some(payload.clone());
                }
            }));
    }

    /// Removes everything [`GatewayClient::install_core_handlers`] added.
    pub fn uninstall_core_handlers(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }

    pub fn connect(&self) {
        self.transport.connect();
    }

    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn session_store(&self) -> Arc<Mutex<SessionStore>> {
        Arc::clone(&self.session)
    }

    pub fn status_store(&self) -> Arc<Mutex<ConnectionStatusStore>> {
        Arc::clone(&self.status)
    }

    pub fn session(&self) -> Session {
        self.session.lock().session().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.lock().status().clone()
    }

    pub fn catalog(&self) -> Option<Catalog> {
        self.catalog.lock().clone()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Session> {
        self.session.lock().subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.lock().subscribe()
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    pub fn request_session(&self) -> bool {
        self.transport.send(&OutboundRequest::GetSession)
    }

    pub fn request_history(&self) -> bool {
        self.transport.send(&OutboundRequest::GetHistory)
    }

    pub fn request_config(&self) -> bool {
        self.transport.send(&OutboundRequest::GetConfig)
    }

    pub fn request_catalog(&self) -> bool {
        self.transport.send(&OutboundRequest::GetCatalog)
    }

    /// Sends the conversation so far plus `content` as a new user turn. The
    /// prompt is echoed into the session only if the frame went out.
    pub fn send_chat(&self, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }

        let mut messages: Vec<ChatTurn> = chat_history(self.session.lock().session());
        messages.push(ChatTurn {
            role: Role::User,
            content: content.to_string(),
        });

        let sent = self.transport.send(&OutboundRequest::Chat { messages });
        if sent {
            self.session.lock().append_user_message(content);
        }
        sent
    }

    pub fn set_provider(&self, provider: &str) -> bool {
        self.transport.send(&OutboundRequest::SetProvider {
            provider: provider.to_string(),
        })
    }

    pub fn get_models(&self) -> bool {
        self.transport.send(&OutboundRequest::GetModels)
    }

    pub fn set_model(&self, model: &str) -> bool {
        self.transport.send(&OutboundRequest::SetModel {
            model: model.to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Waits for the next transport event without dispatching it.
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }

    pub fn dispatch(&self, event: &InboundEvent) {
        self.dispatcher.dispatch(event);
    }

    /// Dispatches events as they arrive. Never returns on its own; drop the
    /// future to stop.
    pub async fn run(&mut self) {
        while let Some(event) = self.events.recv().await {
            self.dispatcher.dispatch(&event);
        }
    }

    /// Dispatches every event already queued and returns how many there were.
    pub fn drain(&mut self) -> usize {
        let mut dispatched = 0;
        while let Ok(event) = self.events.try_recv() {
            self.dispatcher.dispatch(&event);
            dispatched += 1;
        }
        dispatched
    }
}
