//! WebSocket front end: one presence session per client socket.
//!
//! Clients exchange JSON text frames carrying [`ClientMessage`] and
//! [`ServerMessage`]. The first message names the player: either a `login` or
//! a `position_update`. After that every frame is fed to the player's session
//! until the socket closes or the server shuts down.

use crate::config::ServerSettings;
use crate::error::ServerError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use presence_core::{ClientMessage, PresenceRuntime, ServerMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type WsReceiver = SplitStream<WsStream>;

/// Accepts client sockets and runs a session for each.
pub struct GatewayServer {
    settings: ServerSettings,
    runtime: Arc<PresenceRuntime>,
    shutdown_sender: broadcast::Sender<()>,
    active_connections: Arc<AtomicUsize>,
}

impl GatewayServer {
    pub fn new(settings: ServerSettings, runtime: Arc<PresenceRuntime>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            settings,
            runtime,
            shutdown_sender,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sender that stops the accept loop and every connection when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let address: SocketAddr = self.settings.bind_address.parse().map_err(|e| {
            ServerError::Config(format!("Invalid bind address {}: {e}", self.settings.bind_address))
        })?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
        info!("Listening on {}", address);
        Ok(listener)
    }

    /// Binds and serves until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on `listener` until shutdown is signalled, then
    /// waits for every session to clean up and stops the presence runtime.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let maintenance = self.runtime.start_maintenance();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    if self.active_connections() >= self.settings.max_connections {
                        warn!(%addr, limit = self.settings.max_connections, "Connection limit reached, refusing client");
                        drop(stream);
                        continue;
                    }

                    let connection = Connection {
                        addr,
                        runtime: self.runtime.clone(),
                        client_buffer: self.runtime.config().client_buffer,
                        login_timeout: Duration::from_secs(self.settings.login_timeout_secs),
                        shutdown: self.shutdown_sender.subscribe(),
                    };
                    let counter = self.active_connections.clone();
                    counter.fetch_add(1, Ordering::Relaxed);
                    connections.spawn(async move {
                        if let Err(e) = connection.run(stream).await {
                            warn!(%addr, error = %e, "Connection ended with error");
                        }
                        counter.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            while let Some(finished) = connections.try_join_next() {
                if let Err(e) = finished {
                    error!("Connection task failed: {}", e);
                }
            }
        }

        drop(listener);
        info!(connections = connections.len(), "Waiting for sessions to close");
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!("Connection task failed: {}", e);
            }
        }

        for task in maintenance {
            task.abort();
        }
        self.runtime.shutdown().await;
        info!("Server stopped");
        Ok(())
    }
}

/// State for one accepted socket.
struct Connection {
    addr: SocketAddr,
    runtime: Arc<PresenceRuntime>,
    client_buffer: usize,
    login_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl Connection {
    async fn run(mut self, stream: TcpStream) -> Result<(), ServerError> {
        let addr = self.addr;
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| ServerError::Network(format!("WebSocket handshake failed for {addr}: {e}")))?;
        let (mut ws_sink, mut ws_receiver) = ws_stream.split();
        debug!(%addr, "WebSocket connection established");

        let first = tokio::select! {
            first = tokio::time::timeout(self.login_timeout, read_first_message(&mut ws_receiver, &mut ws_sink)) => {
                match first {
                    Ok(first) => first?,
                    Err(_) => {
                        warn!(%addr, "Client did not identify in time");
                        let _ = ws_sink.close().await;
                        return Ok(());
                    }
                }
            }
            _ = self.shutdown.recv() => {
                let _ = ws_sink.close().await;
                return Ok(());
            }
        };
        let Some(first) = first else {
            debug!(%addr, "Client left before identifying");
            return Ok(());
        };
        if let ClientMessage::Logout { player_id } = &first {
            info!(%addr, player = %player_id, "Player logged out before starting a session");
            let _ = ws_sink.close().await;
            return Ok(());
        }

        let player_id = first.player_id().to_string();
        info!(%addr, player = %player_id, "Client connected");

        let (outbound, outbound_rx) = mpsc::channel::<ServerMessage>(self.client_buffer);
        let (inbound, inbound_rx) = mpsc::channel::<ClientMessage>(self.client_buffer);
        let (control, control_rx) = mpsc::channel::<Message>(8);

        let session = self.runtime.session(player_id.clone(), outbound);
        let session_task = tokio::spawn(session.run(inbound_rx));
        let writer_task = tokio::spawn(write_frames(ws_sink, outbound_rx, control_rx));

        if inbound.send(first).await.is_ok() {
            self.read_frames(&mut ws_receiver, &inbound, &control).await;
        }
        drop(inbound);
        drop(control);

        let summary = session_task
            .await
            .map_err(|e| ServerError::Internal(format!("Session task failed: {e}")))?;
        if let Err(e) = writer_task.await {
            error!(%addr, error = %e, "Writer task failed");
        }

        info!(
            %addr,
            player = %player_id,
            accepted = summary.updates_accepted,
            rejected = summary.updates_rejected,
            transitions = summary.transitions,
            reason = ?summary.close_reason,
            "Client disconnected"
        );
        Ok(())
    }

    /// Feeds client frames to the session until the socket, the session or
    /// the server goes away.
    async fn read_frames(
        &mut self,
        ws_receiver: &mut WsReceiver,
        inbound: &mpsc::Sender<ClientMessage>,
        control: &mpsc::Sender<Message>,
    ) {
        let addr = self.addr;
        loop {
            tokio::select! {
                frame = ws_receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => match ClientMessage::from_json(text.as_str()) {
                        Ok(message) => {
                            if inbound.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(%addr, error = %e, "Ignoring malformed client message"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = control.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%addr, "Client closed the connection");
                        break;
                    }
                    Some(Ok(_)) => debug!(%addr, "Ignoring non-text frame"),
                    Some(Err(e)) => {
                        warn!(%addr, error = %e, "WebSocket error");
                        break;
                    }
                },
                _ = inbound.closed() => break,
                _ = self.shutdown.recv() => {
                    debug!(%addr, "Closing connection for shutdown");
                    break;
                }
            }
        }
    }
}

/// Waits for the message that names the player, answering pings meanwhile.
///
/// Returns `None` when the client disconnects first.
async fn read_first_message(
    ws_receiver: &mut WsReceiver,
    ws_sink: &mut WsSink,
) -> Result<Option<ClientMessage>, ServerError> {
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientMessage::from_json(text.as_str()) {
                Ok(message) if message.player_id().trim().is_empty() => {
                    warn!("Ignoring identification without a player id");
                }
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!(error = %e, "Ignoring malformed client message"),
            },
            Ok(Message::Ping(data)) => {
                ws_sink
                    .send(Message::Pong(data))
                    .await
                    .map_err(|e| ServerError::Network(e.to_string()))?;
            }
            Ok(Message::Close(_)) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(ServerError::Network(e.to_string())),
        }
    }
    Ok(None)
}

/// Serializes session output and control frames onto the socket.
async fn write_frames(
    mut ws_sink: WsSink,
    mut outbound: mpsc::Receiver<ServerMessage>,
    mut control: mpsc::Receiver<Message>,
) {
    loop {
        let frame = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => match message.to_json() {
                    Ok(text) => Message::text(text),
                    Err(e) => {
                        error!(error = %e, "Failed to encode server message");
                        continue;
                    }
                },
                None => break,
            },
            Some(frame) = control.recv() => frame,
        };

        if let Err(e) = ws_sink.send(frame).await {
            debug!(error = %e, "Socket write failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}
