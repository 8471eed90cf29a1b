//! Transport Module - Peer-to-Peer Verbindungen
//!
//! Dieses Modul verwaltet:
//! - Peer-Adressen pro Login-Session
//! - Signaling über WebSocket (signierte Nachrichten)
//! - WebRTC Peer Connections pro Anruf
//! - Den Datenkanal für Steuer-Nachrichten
//!
//! Der Call Controller kennt nur den `PeerTransport` Trait und den
//! Event-Kanal; konkrete Implementierung ist `WebRtcTransport`.

mod address;
mod messages;
mod peer;
mod signaling;

pub use address::{PeerAddress, UserId};
pub use messages::{CallId, CallMetadata, ClientMessage, ControlMessage, ServerMessage};
pub use peer::{default_ice_servers, IceServer, WebRtcTransport};
pub use signaling::{SignalingClient, SignalingError, SignalingEvent};

use crate::media::MediaStream;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Transport not open")]
    NotOpen,

    #[error("Unknown call: {0}")]
    UnknownCall(CallId),

    #[error("Data channel to {0} is not open")]
    ChannelClosed(PeerAddress),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Events des Peer-Transports, konsumiert vom Call Controller
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Transport ist offen und unter `address` erreichbar
    Open { address: PeerAddress },

    /// Eingehender Anruf
    IncomingCall {
        call_id: CallId,
        from: PeerAddress,
        metadata: Option<CallMetadata>,
    },

    /// Medien der Gegenseite empfangen
    RemoteStream { call_id: CallId, stream: MediaStream },

    /// Anruf wurde geschlossen
    CallClosed { call_id: CallId },

    /// Fehler auf Ebene eines Anrufs
    CallError { call_id: CallId, message: String },

    /// Steuer-Nachricht über den Datenkanal
    Control {
        from: PeerAddress,
        message: ControlMessage,
    },

    /// Netzwerkverbindung zum Signaling-Server verloren
    Disconnected,

    /// Schwerwiegender Transport-Fehler
    Error { message: String },
}

// ============================================================================
// PEER TRANSPORT
// ============================================================================

/// Schnittstelle des Peer-Transports
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Eigene Adresse, sobald der Transport offen ist
    fn local_address(&self) -> Option<PeerAddress>;

    /// Event-Receiver
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Startet einen ausgehenden Anruf mit den lokalen Medien
    async fn place_call(
        &self,
        to: &PeerAddress,
        local: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<CallId, TransportError>;

    /// Nimmt einen eingehenden Anruf an
    async fn answer_call(&self, call_id: CallId, local: &MediaStream)
        -> Result<(), TransportError>;

    /// Schließt einen Anruf (ausgehend oder eingehend)
    async fn close_call(&self, call_id: CallId);

    /// Öffnet den Datenkanal zu einem Peer
    async fn open_channel(&self, to: &PeerAddress) -> Result<(), TransportError>;

    /// Prüft ob ein Datenkanal zu dem Peer offen ist (in beide Richtungen)
    fn is_channel_open(&self, to: &PeerAddress) -> bool;

    /// Sendet eine Steuer-Nachricht über den Datenkanal
    async fn send_control(
        &self,
        to: &PeerAddress,
        message: ControlMessage,
    ) -> Result<(), TransportError>;

    /// Schließt den Datenkanal
    async fn close_channel(&self, to: &PeerAddress);

    /// Baut die Verbindung zum Signaling-Server neu auf
    async fn reconnect(&self) -> Result<(), TransportError>;
}
