//! Externe Dienste des Call Controllers
//!
//! - Presence: aktuelle Peer-Adresse eines Benutzers
//! - Conversation: System-Nachrichten für begonnene/verpasste Anrufe
//! - Profile: Anzeigename und Avatar für das Overlay

use crate::call::CallKind;
use crate::store::StoreError;
use crate::transport::{PeerAddress, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Hinweis im Gesprächsverlauf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "kind", rename_all = "snake_case")]
pub enum CallNotice {
    Placed(CallKind),
    Missed(CallKind),
}

impl CallNotice {
    /// Text der System-Nachricht
    pub fn body(&self) -> String {
        match self {
            CallNotice::Placed(kind) => format!("{} call started", kind.title()),
            CallNotice::Missed(kind) => format!("Missed {} call", kind.as_str()),
        }
    }

    /// Kurzname für die Ablage
    pub fn label(&self) -> &'static str {
        match self {
            CallNotice::Placed(_) => "call_placed",
            CallNotice::Missed(_) => "call_missed",
        }
    }
}

/// Profil eines Benutzers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Registrierung der Peer-Adressen
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Speichert die aktuelle Adresse einer Session
    async fn publish(&self, user: &UserId, address: &PeerAddress) -> Result<(), StoreError>;

    /// Zuletzt veröffentlichte Adresse eines Benutzers
    async fn lookup(&self, user: &UserId) -> Result<Option<PeerAddress>, StoreError>;
}

/// Gesprächsverlauf zwischen zwei Benutzern
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn post_call_notice(
        &self,
        from: &UserId,
        to: &UserId,
        notice: CallNotice,
    ) -> Result<(), StoreError>;
}

/// Auflösung von Profilen
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn profile(&self, user: &UserId) -> Result<Option<Profile>, StoreError>;
}
