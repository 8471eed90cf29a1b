//! Message Types für das Signaling-Protokoll
//!
//! Client- und Server-Nachrichten werden als JSON mit einem `type`-Feld
//! übertragen. Client-Nachrichten werden vor dem Senden mit dem
//! Session Key versiegelt (`timestamp` + `signature`).

use super::address::{PeerAddress, UserId};
use crate::call::CallKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// SHARED TYPES
// ============================================================================

/// ID eines einzelnen Anrufs (eine Peer Connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Metadaten die mit einem Anruf übertragen werden
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    #[serde(rename = "type")]
    pub kind: CallKind,
    #[serde(rename = "callerId", default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<UserId>,
}

/// Steuer-Nachrichten über den parallelen Datenkanal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    EndCall,
    DeclineCall,
}

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Alle Nachrichten die der Client an den Server sendet
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Peer-Adresse dieser Session registrieren
    Register {
        #[serde(rename = "peerId")]
        peer_id: PeerAddress,
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "publicKey")]
        public_key: String,
    },

    /// SDP Offer für einen neuen Anruf
    Offer {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "toPeerId")]
        to_peer_id: PeerAddress,
        #[serde(rename = "callId")]
        call_id: CallId,
        sdp: String,
        metadata: CallMetadata,
    },

    /// SDP Answer
    Answer {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "toPeerId")]
        to_peer_id: PeerAddress,
        #[serde(rename = "callId")]
        call_id: CallId,
        sdp: String,
    },

    /// ICE Candidate (JSON-kodiert)
    IceCandidate {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "toPeerId")]
        to_peer_id: PeerAddress,
        #[serde(rename = "callId")]
        call_id: CallId,
        candidate: String,
    },

    /// Anruf schließen
    Hangup {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "toPeerId")]
        to_peer_id: PeerAddress,
        #[serde(rename = "callId")]
        call_id: CallId,
    },

    /// Datenkanal zu einem Peer öffnen
    ChannelOpen {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "toPeerId")]
        to_peer_id: PeerAddress,
    },

    /// Datenkanal schließen
    ChannelClose {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "toPeerId")]
        to_peer_id: PeerAddress,
    },

    /// Steuer-Nachricht über den Datenkanal
    ChannelData {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "toPeerId")]
        to_peer_id: PeerAddress,
        payload: ControlMessage,
    },

    /// Heartbeat
    Heartbeat {
        #[serde(rename = "peerId")]
        peer_id: PeerAddress,
    },
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Alle möglichen Server-Nachrichten
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Peer-Adresse registriert
    Registered {
        #[serde(rename = "peerId")]
        peer_id: PeerAddress,
        timestamp: i64,
    },

    /// Eingehendes SDP Offer
    IncomingOffer {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "callId")]
        call_id: CallId,
        sdp: String,
        #[serde(default)]
        metadata: Option<CallMetadata>,
        timestamp: i64,
    },

    /// Eingehendes SDP Answer
    IncomingAnswer {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "callId")]
        call_id: CallId,
        sdp: String,
        timestamp: i64,
    },

    /// Eingehender ICE Candidate
    IncomingIceCandidate {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        #[serde(rename = "callId")]
        call_id: CallId,
        candidate: String,
        timestamp: i64,
    },

    /// Anruf wurde von der Gegenseite geschlossen
    CallEnded {
        #[serde(rename = "byPeerId")]
        by_peer_id: PeerAddress,
        #[serde(rename = "callId")]
        call_id: CallId,
        timestamp: i64,
    },

    /// Gegenseite hat einen Datenkanal geöffnet
    ChannelOpened {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        timestamp: i64,
    },

    /// Gegenseite hat den Datenkanal geschlossen
    ChannelClosed {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        timestamp: i64,
    },

    /// Steuer-Nachricht der Gegenseite
    ChannelData {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerAddress,
        payload: ControlMessage,
        timestamp: i64,
    },

    /// Fehler
    Error {
        code: i32,
        message: String,
        timestamp: i64,
    },

    /// Heartbeat Antwort
    Pong { timestamp: i64 },
}

// ============================================================================
// TESTS
// ============================================================================
