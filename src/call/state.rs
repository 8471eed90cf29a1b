//! Call State
//!
//! Zustand einer Anruf-Session als Tagged Union plus der öffentliche
//! Snapshot, den das Overlay rendert.

use crate::services::{CallNotice, Profile};
use crate::transport::{PeerAddress, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Art des Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Audio => "audio",
            CallKind::Video => "video",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            CallKind::Audio => "Audio",
            CallKind::Video => "Video",
        }
    }
}

/// Aktueller Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Ausgehender Anruf klingelt bei der Gegenseite
    Calling { kind: CallKind },
    /// Eingehender Anruf wartet auf Antwort
    Ringing { kind: CallKind },
    /// Anruf aktiv
    Connected { kind: CallKind },
    /// Medien der Verbindung sind nicht mehr live, Wiederherstellung läuft
    Connecting { kind: CallKind },
    /// Anruf beendet
    Ended,
    /// Niemand hat abgenommen
    NoAnswer,
    /// Gegenseite bzw. Transport nicht erreichbar
    Unavailable,
    /// Netzwerkverbindung verloren
    Disconnected,
}

impl CallState {
    /// Anzeigename des Zustands
    pub fn label(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Calling {
                kind: CallKind::Audio,
            } => "audio-calling",
            CallState::Calling {
                kind: CallKind::Video,
            } => "video-calling",
            CallState::Ringing { .. } => "ringing",
            CallState::Connected {
                kind: CallKind::Audio,
            } => "audio-connected",
            CallState::Connected {
                kind: CallKind::Video,
            } => "video-connected",
            CallState::Connecting { .. } => "connecting",
            CallState::Ended => "ended",
            CallState::NoAnswer => "no-answer",
            CallState::Unavailable => "unavailable",
            CallState::Disconnected => "disconnected",
        }
    }

    /// Ein Anruf wird aufgebaut oder läuft
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Calling { .. }
                | CallState::Ringing { .. }
                | CallState::Connected { .. }
                | CallState::Connecting { .. }
        )
    }

    /// Abschluss-Zustand, der nach kurzer Anzeige zu `Idle` wird
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Ended
                | CallState::NoAnswer
                | CallState::Unavailable
                | CallState::Disconnected
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, CallState::Connected { .. })
    }

    pub fn kind(&self) -> Option<CallKind> {
        match self {
            CallState::Calling { kind }
            | CallState::Ringing { kind }
            | CallState::Connected { kind }
            | CallState::Connecting { kind } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Öffentliche Sicht auf die Session
#[derive(Debug, Clone, PartialEq)]
pub struct CallSnapshot {
    pub state: CallState,
    pub is_caller: bool,
    /// Eigene Peer-Adresse
    pub local_address: Option<PeerAddress>,
    pub remote_address: Option<PeerAddress>,
    /// Benutzer-ID der Gegenseite
    pub caller_id: Option<UserId>,
    pub remote_profile: Option<Profile>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub has_local_video: bool,
    pub has_remote_stream: bool,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            is_caller: false,
            local_address: None,
            remote_address: None,
            caller_id: None,
            remote_profile: None,
            started_at: None,
            duration: Duration::ZERO,
            is_muted: false,
            is_video_off: false,
            has_local_video: false,
            has_remote_stream: false,
        }
    }
}

/// Events die vom Call Controller ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    NoticePosted { to: UserId, notice: CallNotice },
    Error(String),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(
            CallState::Calling {
                kind: CallKind::Video
            }
            .label(),
            "video-calling"
        );
        assert_eq!(
            CallState::Connected {
                kind: CallKind::Audio
            }
            .to_string(),
            "audio-connected"
        );
        assert_eq!(CallState::NoAnswer.label(), "no-answer");
    }

    #[test]
    fn test_active_and_terminal_are_disjoint() {
        let all = [
            CallState::Idle,
            CallState::Calling {
                kind: CallKind::Audio,
            },
            CallState::Ringing {
                kind: CallKind::Audio,
            },
            CallState::Connected {
                kind: CallKind::Video,
            },
            CallState::Connecting {
                kind: CallKind::Video,
            },
            CallState::Ended,
            CallState::NoAnswer,
            CallState::Unavailable,
            CallState::Disconnected,
        ];

        for state in all {
            assert!(!(state.is_active() && state.is_terminal()), "{}", state);
        }
        assert!(!CallState::Idle.is_active());
        assert!(!CallState::Idle.is_terminal());
    }
}
