//! Benutzer-IDs und Peer-Adressen
//!
//! Eine Peer-Adresse identifiziert eine einzelne Login-Session eines
//! Benutzers: `<user_id>-<unix-millis>`. So kann derselbe Benutzer auf
//! mehreren Geräten gleichzeitig erreichbar sein.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ID eines Benutzers (Mitarbeiter oder Klient)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Adresse eines Peers beim Signaling-Server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Erzeugt die Adresse für eine neue Session des Benutzers
    pub fn for_session(user: &UserId, at: DateTime<Utc>) -> Self {
        Self(format!("{}-{}", user, at.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Erstes durch `-` getrenntes Segment als Benutzer-ID.
    ///
    /// Nur als Fallback gedacht, wenn ein eingehender Anruf keine
    /// `callerId` in den Metadaten trägt.
    pub fn user_hint(&self) -> Option<UserId> {
        self.0
            .split('-')
            .next()
            .filter(|s| !s.is_empty())
            .map(UserId::new)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
