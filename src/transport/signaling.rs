//! WebSocket Client für den Signaling-Server
//!
//! Verwaltet die WebSocket-Verbindung:
//! - Registrierung der Peer-Adresse
//! - Heartbeat-Keeping
//! - Message Signing
//! - Event-basierte Kommunikation

use super::address::{PeerAddress, UserId};
use super::messages::{CallId, CallMetadata, ClientMessage, ControlMessage, ServerMessage};
use crate::crypto::SessionKey;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Intervall für Heartbeats (Idle-Timeout des Servers liegt bei 30s)
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Maximale Wartezeit auf die Registrierungs-Antwort
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Server error: {code} - {message}")]
    ServerError { code: i32, message: String },
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// WebSocket verbunden
    Connected,

    /// Verbindung getrennt
    Disconnected,

    /// Peer-Adresse registriert
    Registered { address: PeerAddress },

    /// Eingehender Anruf
    IncomingOffer {
        from: PeerAddress,
        call_id: CallId,
        sdp: String,
        metadata: Option<CallMetadata>,
    },

    /// SDP Answer erhalten
    AnswerReceived {
        from: PeerAddress,
        call_id: CallId,
        sdp: String,
    },

    /// ICE Candidate erhalten
    IceCandidateReceived {
        from: PeerAddress,
        call_id: CallId,
        candidate: String,
    },

    /// Anruf von der Gegenseite geschlossen
    CallEnded { by: PeerAddress, call_id: CallId },

    /// Datenkanal von der Gegenseite geöffnet
    ChannelOpened { from: PeerAddress },

    /// Datenkanal von der Gegenseite geschlossen
    ChannelClosed { from: PeerAddress },

    /// Steuer-Nachricht erhalten
    ChannelData {
        from: PeerAddress,
        payload: ControlMessage,
    },

    /// Fehler vom Server
    Error { code: i32, message: String },
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    address: Option<PeerAddress>,
    /// Wird bei jeder neuen Verbindung erhöht
    generation: u64,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket Client für Signaling-Server Kommunikation
pub struct SignalingClient {
    ws_url: Url,
    user_id: UserId,
    key: Arc<SessionKey>,
    state: Arc<RwLock<ClientState>>,
    tx: Arc<RwLock<Option<mpsc::Sender<String>>>>,
    event_tx: broadcast::Sender<SignalingEvent>,
}

impl SignalingClient {
    /// Erstellt einen neuen SignalingClient
    pub fn new(ws_url: Url, user_id: UserId, key: Arc<SessionKey>) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            ws_url,
            user_id,
            key,
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: Arc::new(RwLock::new(None)),
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }

    /// Registrierte Peer-Adresse (falls verbunden)
    pub fn address(&self) -> Option<PeerAddress> {
        self.state.read().address.clone()
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Verbindet mit dem Signaling-Server und registriert die Peer-Adresse
    pub async fn connect_and_register(&self, address: PeerAddress) -> Result<(), SignalingError> {
        tracing::info!("Connecting to signaling server: {}", self.ws_url);

        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<String>(100);
        *self.tx.write() = Some(tx);

        let generation = {
            let mut state = self.state.write();
            state.is_connected = true;
            state.address = None;
            state.generation += 1;
            state.generation
        };

        let _ = self.event_tx.send(SignalingEvent::Connected);

        // Channel für Registrierungs-Response
        let (reg_tx, mut reg_rx) = mpsc::channel::<Result<PeerAddress, SignalingError>>(1);

        // Read-Task
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            Self::handle_server_message(server_msg, &state, &event_tx, &reg_tx)
                                .await
                        }
                        Err(e) => tracing::warn!("Ignoring malformed server message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Nur die aktuelle Verbindung darf den Status zurücksetzen
            let is_current = {
                let mut s = state.write();
                if s.generation == generation {
                    s.is_connected = false;
                    true
                } else {
                    false
                }
            };
            if is_current {
                let _ = event_tx.send(SignalingEvent::Disconnected);
            }
        });

        // Write-Task; endet wenn der Sender verworfen wird und schließt dann den Socket
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let registered = match self.await_registration(address, &mut reg_rx).await {
            Ok(registered) => registered,
            Err(e) => {
                tracing::warn!("Registration failed, closing connection: {}", e);
                self.disconnect();
                return Err(e);
            }
        };

        tracing::info!("Registered with peer address {}", registered);
        self.spawn_heartbeat(generation);
        Ok(())
    }

    async fn await_registration(
        &self,
        address: PeerAddress,
        reg_rx: &mut mpsc::Receiver<Result<PeerAddress, SignalingError>>,
    ) -> Result<PeerAddress, SignalingError> {
        self.send(ClientMessage::Register {
            peer_id: address,
            user_id: self.user_id.clone(),
            public_key: self.key.public_key_base64(),
        })?;

        tokio::select! {
            result = reg_rx.recv() => {
                match result {
                    Some(result) => result,
                    None => Err(SignalingError::RegistrationFailed("No response".to_string())),
                }
            }
            _ = tokio::time::sleep(REGISTRATION_TIMEOUT) => {
                Err(SignalingError::RegistrationFailed("Timeout".to_string()))
            }
        }
    }

    /// Schließt die Verbindung (Logout)
    pub fn disconnect(&self) {
        *self.tx.write() = None;
        let mut state = self.state.write();
        state.is_connected = false;
        state.address = None;
        state.generation += 1;
    }

    /// Versiegelt und sendet eine Nachricht (non-blocking)
    pub fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        let tx = self
            .tx
            .read()
            .clone()
            .ok_or(SignalingError::NotConnected)?;

        let envelope = self
            .key
            .seal(&message, Utc::now().timestamp_millis())
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        let msg_string = serde_json::to_string(&envelope)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.try_send(msg_string)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Startet den Heartbeat-Task für die aktuelle Verbindung
    fn spawn_heartbeat(&self, generation: u64) {
        let state = Arc::clone(&self.state);
        let tx = Arc::clone(&self.tx);
        let key = Arc::clone(&self.key);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;

                let address = {
                    let s = state.read();
                    if s.generation != generation || !s.is_connected {
                        tracing::debug!("Heartbeat: connection gone, stopping heartbeat task");
                        break;
                    }
                    s.address.clone()
                };

                let (Some(address), Some(sender)) = (address, tx.read().clone()) else {
                    continue;
                };

                let heartbeat = ClientMessage::Heartbeat { peer_id: address };
                match key.seal(&heartbeat, Utc::now().timestamp_millis()) {
                    Ok(envelope) => {
                        if let Err(e) = sender.try_send(envelope.to_string()) {
                            tracing::warn!("Failed to send heartbeat: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("Failed to seal heartbeat: {}", e),
                }
            }
        });
    }

    /// Verarbeitet eingehende Server-Nachrichten
    async fn handle_server_message(
        msg: ServerMessage,
        state: &Arc<RwLock<ClientState>>,
        event_tx: &broadcast::Sender<SignalingEvent>,
        reg_tx: &mpsc::Sender<Result<PeerAddress, SignalingError>>,
    ) {
        let event = match msg {
            ServerMessage::Registered { peer_id, .. } => {
                state.write().address = Some(peer_id.clone());
                let _ = reg_tx.send(Ok(peer_id.clone())).await;
                SignalingEvent::Registered { address: peer_id }
            }

            ServerMessage::IncomingOffer {
                from_peer_id,
                call_id,
                sdp,
                metadata,
                ..
            } => SignalingEvent::IncomingOffer {
                from: from_peer_id,
                call_id,
                sdp,
                metadata,
            },

            ServerMessage::IncomingAnswer {
                from_peer_id,
                call_id,
                sdp,
                ..
            } => SignalingEvent::AnswerReceived {
                from: from_peer_id,
                call_id,
                sdp,
            },

            ServerMessage::IncomingIceCandidate {
                from_peer_id,
                call_id,
                candidate,
                ..
            } => SignalingEvent::IceCandidateReceived {
                from: from_peer_id,
                call_id,
                candidate,
            },

            ServerMessage::CallEnded {
                by_peer_id,
                call_id,
                ..
            } => SignalingEvent::CallEnded {
                by: by_peer_id,
                call_id,
            },

            ServerMessage::ChannelOpened { from_peer_id, .. } => {
                SignalingEvent::ChannelOpened { from: from_peer_id }
            }

            ServerMessage::ChannelClosed { from_peer_id, .. } => {
                SignalingEvent::ChannelClosed { from: from_peer_id }
            }

            ServerMessage::ChannelData {
                from_peer_id,
                payload,
                ..
            } => SignalingEvent::ChannelData {
                from: from_peer_id,
                payload,
            },

            ServerMessage::Error { code, message, .. } => {
                tracing::error!("Server error {}: {}", code, message);
                // Bei Registrierungs-Fehlern auch dem reg_tx melden
                let _ = reg_tx.try_send(Err(SignalingError::ServerError {
                    code,
                    message: message.clone(),
                }));
                SignalingEvent::Error { code, message }
            }

            // Heartbeat-Response - nichts zu tun
            ServerMessage::Pong { .. } => return,
        };

        let _ = event_tx.send(event);
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("ws_url", &self.ws_url.as_str())
            .field("state", &*self.state.read())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
