//! Call Overlay - Anzeige-Modell
//!
//! Reine Funktion vom `CallSnapshot` auf das, was die Oberfläche zeigt.
//! Keine eigene Logik, kein eigener Zustand.

use crate::call::{CallKind, CallSnapshot, CallState};
use serde::Serialize;
use std::time::Duration;

/// Bedienelemente, die im aktuellen Zustand sinnvoll sind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Accept,
    Decline,
    Hangup,
    Mute,
    Unmute,
    CameraOff,
    CameraOn,
    Dismiss,
}

/// Was das Overlay anzeigt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayView {
    pub visible: bool,
    pub title: String,
    /// Name der Gegenseite (Profil, sonst Benutzer-ID)
    pub peer_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Statuszeile, z.B. "Calling…" oder "04:12"
    pub status: String,
    pub controls: Vec<Control>,
    pub show_local_video: bool,
    pub show_remote_video: bool,
}

impl OverlayView {
    pub fn from_snapshot(snapshot: &CallSnapshot) -> Self {
        let peer_name = snapshot
            .remote_profile
            .as_ref()
            .map(|p| p.display_name.clone())
            .or_else(|| snapshot.caller_id.as_ref().map(|id| id.to_string()));
        let avatar_url = snapshot
            .remote_profile
            .as_ref()
            .and_then(|p| p.avatar_url.clone());

        let (title, status) = match snapshot.state {
            CallState::Idle => (String::new(), String::new()),
            CallState::Calling { kind } => (call_title(kind), "Calling…".to_string()),
            CallState::Ringing { kind } => {
                (format!("Incoming {} call", kind.as_str()), "Ringing…".to_string())
            }
            CallState::Connected { kind } => (call_title(kind), format_duration(snapshot.duration)),
            CallState::Connecting { kind } => (call_title(kind), "Reconnecting…".to_string()),
            CallState::Ended => ("Call Ended".to_string(), String::new()),
            CallState::NoAnswer => ("No Answer".to_string(), String::new()),
            CallState::Unavailable => (
                "Unavailable".to_string(),
                "The other party could not be reached".to_string(),
            ),
            CallState::Disconnected => (
                "Disconnected".to_string(),
                "Network connection lost".to_string(),
            ),
        };

        let is_video = snapshot.state.kind() == Some(CallKind::Video);

        Self {
            visible: snapshot.state != CallState::Idle,
            title,
            peer_name,
            avatar_url,
            status,
            controls: controls(snapshot),
            show_local_video: is_video && snapshot.has_local_video && !snapshot.is_video_off,
            show_remote_video: is_video && snapshot.has_remote_stream,
        }
    }
}

fn call_title(kind: CallKind) -> String {
    format!("{} call", kind.title())
}

fn controls(snapshot: &CallSnapshot) -> Vec<Control> {
    let media_controls = |controls: &mut Vec<Control>| {
        controls.push(if snapshot.is_muted {
            Control::Unmute
        } else {
            Control::Mute
        });
        if snapshot.has_local_video {
            controls.push(if snapshot.is_video_off {
                Control::CameraOn
            } else {
                Control::CameraOff
            });
        }
    };

    let mut controls = Vec::new();
    match snapshot.state {
        CallState::Idle => {}
        CallState::Ringing { .. } => {
            controls.push(Control::Accept);
            controls.push(Control::Decline);
        }
        CallState::Calling { .. } | CallState::Connected { .. } | CallState::Connecting { .. } => {
            media_controls(&mut controls);
            controls.push(Control::Hangup);
        }
        CallState::Ended | CallState::NoAnswer | CallState::Unavailable | CallState::Disconnected => {
            controls.push(Control::Dismiss);
        }
    }
    controls
}

/// `mm:ss`, ab einer Stunde `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

// ============================================================================
// TESTS
// ============================================================================
