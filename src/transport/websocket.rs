//! WebSocket transport over `tokio-tungstenite`

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::{Connector, OutboundFrame, TransportEvent, TransportLink};
use crate::{Error, Result};

/// Opens WebSocket links (`ws://` and `wss://`)
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &str) -> Result<TransportLink> {
        let (stream, response) = connect_async(endpoint)
            .await
            .map_err(|e| Error::Transport(format!("connect to {endpoint} failed: {e}")))?;

        tracing::debug!(
            endpoint,
            status = response.status().as_u16(),
            "websocket handshake complete"
        );

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer: drains outbound frames until the session drops its sender or asks to close
        let writer_events = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let (message, closing) = match frame {
                    OutboundFrame::Text(text) => (Message::Text(text), false),
                    OutboundFrame::Close { code, reason } => (
                        Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };

                if let Err(e) = sink.send(message).await {
                    let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                if closing {
                    return;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: forwards text frames, finishes with exactly one Closed
        tokio::spawn(async move {
            let mut code = None;
            let mut reason = None;

            while let Some(item) = source.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        let _ = inbound_tx.send(TransportEvent::Frame(text));
                    }
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            code = Some(u16::from(frame.code));
                            reason = Some(frame.reason.into_owned());
                        }
                    }
                    Ok(other) => {
                        tracing::trace!(len = other.len(), "ignoring non-text websocket frame");
                    }
                    Err(
                        tokio_tungstenite::tungstenite::Error::ConnectionClosed
                        | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
                    ) => break,
                    Err(e) => {
                        let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }

            let _ = inbound_tx.send(TransportEvent::Closed { code, reason });
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
