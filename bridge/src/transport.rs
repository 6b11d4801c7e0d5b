//! Socket.IO over WebSocket transport
//!
//! Speaks just enough of Engine.IO v4 to hold one player's session: the open
//! handshake, namespace connect, ping/pong keep-alive and event frames.

use crate::connection::{Connector, TransportCommand, TransportEvent, TransportHandle};
use crate::error::ConnectionError;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use shared::{socket_url, Packet};
use tokio::net::TcpStream;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket per player against the game server.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, server_url: &str) -> Result<TransportHandle, ConnectionError> {
        let url = socket_url(server_url);
        let (mut socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let liveness = match next_packet(&mut socket).await? {
            Packet::Open(handshake) => {
                debug!(
                    "Engine.IO session {} (ping interval {}ms, timeout {}ms)",
                    handshake.sid, handshake.ping_interval, handshake.ping_timeout
                );
                handshake.liveness_window()
            }
            other => {
                return Err(ConnectionError::HandshakeRejected(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
        };

        socket
            .send(Message::Text(Packet::Connect.encode()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(pump(socket, command_rx, event_tx, liveness));

        Ok(TransportHandle {
            outbound: command_tx,
            inbound: event_rx,
            driver: Some(driver),
        })
    }
}

async fn next_packet(socket: &mut Socket) -> Result<Packet, ConnectionError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return Packet::decode(&text)
                    .map_err(|e| ConnectionError::HandshakeRejected(e.to_string()))
            }
            Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
        }
    }
}

/// Moves frames between the socket and the connection until either side
/// goes away. A server that sends nothing for `liveness` counts as gone.
async fn pump(
    socket: Socket,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    liveness: Duration,
) {
    let (mut sink, mut stream) = socket.split();
    let silence = sleep(liveness);
    tokio::pin!(silence);

    loop {
        tokio::select! {
            () = &mut silence => {
                warn!("No frame from server for {:?}, dropping session", liveness);
                let _ = events.send(TransportEvent::Disconnected("ping timeout".to_string()));
                break;
            }

            frame = stream.next() => {
                silence.as_mut().reset(Instant::now() + liveness);
                match frame {
                    Some(Ok(Message::Text(text))) => match Packet::decode(&text) {
                        Ok(Packet::Ping) => {
                            if let Err(e) = sink.send(Message::Text(Packet::Pong.encode())).await {
                                let _ = events.send(TransportEvent::Disconnected(e.to_string()));
                                break;
                            }
                        }
                        Ok(Packet::Connect) => {
                            let _ = events.send(TransportEvent::Connected);
                        }
                        Ok(Packet::ConnectError(reason)) => {
                            let _ = events.send(TransportEvent::Disconnected(reason));
                            break;
                        }
                        Ok(Packet::Disconnect) | Ok(Packet::Close) => {
                            let _ = events.send(TransportEvent::Disconnected(
                                "server closed the session".to_string(),
                            ));
                            break;
                        }
                        Ok(Packet::Event { name, data }) => {
                            let _ = events.send(TransportEvent::Event { name, data });
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Dropping malformed frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = events.send(TransportEvent::Disconnected("socket closed".to_string()));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Disconnected(e.to_string()));
                        break;
                    }
                }
            }

            command = commands.recv() => match command {
                Some(TransportCommand::Emit(event)) => {
                    let frame = event.into_packet().encode();
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        error!("Error sending frame: {}", e);
                        let _ = events.send(TransportEvent::Disconnected(e.to_string()));
                        break;
                    }
                }
                Some(TransportCommand::Close) | None => {
                    let _ = sink.send(Message::Text(Packet::Disconnect.encode())).await;
                    if let Err(e) = sink.close().await {
                        debug!("Error closing socket: {}", e);
                    }
                    break;
                }
            },
        }
    }
}
