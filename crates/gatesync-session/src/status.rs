use gatesync_core::protocol::{ConfigPayload, InboundEvent, ProviderSet};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub latency_ms: u64,
    pub provider: Option<String>,
    pub provider_ready: bool,
    pub current_model: Option<String>,
}

/// Tracks connectivity and provider negotiation, independent of the session.
#[derive(Debug)]
pub struct ConnectionStatusStore {
    status: ConnectionStatus,
    tx: watch::Sender<ConnectionStatus>,
}

impl Default for ConnectionStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatusStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus::default());
        Self {
            status: ConnectionStatus::default(),
            tx,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    pub fn apply(&mut self, event: &InboundEvent) -> bool {
        match event {
            InboundEvent::Open => self.set_connected(true),
            InboundEvent::Close { .. } => self.set_connected(false),
            InboundEvent::Pong(pong) => match pong.latency_ms {
                Some(latency_ms) => self.record_latency(latency_ms),
                None => false,
            },
            InboundEvent::Config(config) => self.apply_config(config),
            InboundEvent::ProviderSet(ack) => self.apply_provider_set(ack),
            _ => false,
        }
    }

    /// Losing the connection also drops provider readiness; the gateway
    /// re-announces it after the next `getConfig`.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        self.update(|status| {
            status.connected = connected;
            if !connected {
                status.provider_ready = false;
            }
        })
    }

    pub fn record_latency(&mut self, latency_ms: u64) -> bool {
        self.update(|status| status.latency_ms = latency_ms)
    }

    pub fn apply_config(&mut self, config: &ConfigPayload) -> bool {
        self.update(|status| {
            if let Some(provider) = &config.provider {
                status.provider = Some(provider.clone());
            }
            if let Some(ready) = config.provider_ready {
                status.provider_ready = ready;
            }
            if let Some(model) = config.model() {
                status.current_model = Some(model.to_string());
            }
        })
    }

    pub fn apply_provider_set(&mut self, ack: &ProviderSet) -> bool {
        self.update(|status| {
            if let Some(provider) = &ack.provider {
                status.provider = Some(provider.clone());
            }
            status.provider_ready = ack.provider_ready.unwrap_or(true);
            if let Some(model) = &ack.model {
                status.current_model = Some(model.clone());
            }
        })
    }

    fn update(&mut self, mutate: impl FnOnce(&mut ConnectionStatus)) -> bool {
        let mut next = self.status.clone();
        mutate(&mut next);
        if next == self.status {
            return false;
        }
        tracing::debug!(
            connected = next.connected,
            provider = ?next.provider,
            provider_ready = next.provider_ready,
            "connection status changed"
        );
        self.status = next;
        self.tx.send_replace(self.status.clone());
        true
    }
}
