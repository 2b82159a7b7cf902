use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::error::TransportError;

/// An open text-frame channel to the gateway.
///
/// Dropping `outgoing` closes the connection; `incoming` ends when the peer
/// closes or the socket fails.
#[derive(Debug)]
pub struct Connection {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// The far side of a [`Connection`]: send to the client, receive from it.
pub type PeerEnds = (
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedReceiver<String>,
);

impl Connection {
    /// Creates a connected pair: the client-side [`Connection`] and the
    /// peer's ends of the same two channels.
    pub fn pair() -> (Connection, PeerEnds) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Connection {
                outgoing: out_tx,
                incoming: in_rx,
            },
            (in_tx, out_rx),
        )
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

enum Incoming {
    Text(String),
    Ignore,
    Closed,
}

fn classify(message: WsMessage) -> Incoming {
    match message {
        WsMessage::Text(text) => Incoming::Text(text.to_string()),
        WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Incoming::Text(text),
            Err(err) => {
                tracing::debug!(%err, "dropping non utf-8 binary frame");
                Incoming::Ignore
            }
        },
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Incoming::Ignore,
        WsMessage::Close(_) => Incoming::Closed,
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|err| TransportError::connect(url, err))?;
        let (mut sink, mut source) = stream.split();
        let (connection, (in_tx, mut out_rx)) = Connection::pair();

        let peer = url.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(err) = sink.send(WsMessage::Text(text.into())).await {
                                tracing::warn!(url = %peer, %err, "websocket send failed");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break;
                        }
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(message)) => match classify(message) {
                            Incoming::Text(text) => {
                                if in_tx.send(text).is_err() {
                                    break;
                                }
                            }
                            Incoming::Ignore => {}
                            Incoming::Closed => break,
                        },
                        Some(Err(err)) => {
                            tracing::debug!(url = %peer, %err, "websocket read failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!(url = %peer, "websocket bridge finished");
        });

        Ok(connection)
    }
}
