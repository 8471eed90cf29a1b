//! Konfiguration
//!
//! Signaling-URL, Datenbank-Pfad, ICE-Server und die Zeitgeber des
//! Call Controllers.

use crate::transport::{default_ice_servers, IceServer, UserId};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default Signaling URL (kann über `SIGNALING_URL` überschrieben werden)
pub const DEFAULT_SIGNALING_URL: &str = "https://signaling.clinic-call.dev";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Could not determine app data directory")]
    NoDataDir,
}

/// Zeitgeber des Call Controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimings {
    /// Wartezeit bis `no-answer`
    pub no_answer: Duration,
    /// Erste Prüfung der Medien nach dem Verbinden
    pub liveness_check: Duration,
    /// Zweite Prüfung, danach wird der Anruf beendet
    pub recovery: Duration,
    /// Anzeigedauer der Abschluss-Zustände
    pub reset_delay: Duration,
    /// Auflösung des Gesprächsdauer-Zählers
    pub duration_tick: Duration,
}

impl Default for CallTimings {
    fn default() -> Self {
        Self {
            no_answer: Duration::from_secs(60),
            liveness_check: Duration::from_secs(10),
            recovery: Duration::from_secs(10),
            reset_delay: Duration::from_secs(3),
            duration_tick: Duration::from_secs(1),
        }
    }
}

/// Laufzeit-Konfiguration einer Login-Session
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub user_id: UserId,
    pub signaling_url: Url,
    /// `None` = In-Memory Datenbank
    pub database_path: Option<PathBuf>,
    pub ice_servers: Vec<IceServer>,
    pub timings: CallTimings,
}

impl AppConfig {
    /// Konfiguration mit Standardwerten für einen Benutzer
    pub fn new(user_id: UserId, signaling_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            user_id,
            signaling_url: Url::parse(signaling_url)?,
            database_path: Some(default_database_path()?),
            ice_servers: default_ice_servers(),
            timings: CallTimings::default(),
        })
    }

    /// Fügt einen TURN-Server hinzu
    pub fn with_turn_server(mut self, url: String, username: String, credential: String) -> Self {
        self.ice_servers.push(IceServer {
            urls: vec![url],
            username,
            credential,
        });
        self
    }

    /// WebSocket-Endpunkt des Signaling-Servers (`http` → `ws`, Pfad `/ws`)
    pub fn websocket_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.signaling_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::UnsupportedScheme(scheme.to_string()))?;

        if !url.path().ends_with("/ws") {
            let path = format!("{}/ws", url.path().trim_end_matches('/'));
            url.set_path(&path);
        }
        Ok(url)
    }
}

/// Standard-Pfad der Datenbank im App-Datenverzeichnis
pub fn default_database_path() -> Result<PathBuf, ConfigError> {
    let proj_dirs = directories::ProjectDirs::from("org", "clinic", "clinic-call")
        .ok_or(ConfigError::NoDataDir)?;

    let mut path = proj_dirs.data_dir().to_path_buf();
    path.push("calls.db");
    Ok(path)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> AppConfig {
        AppConfig {
            user_id: UserId::new("staff1"),
            signaling_url: Url::parse(url).unwrap(),
            database_path: None,
            ice_servers: default_ice_servers(),
            timings: CallTimings::default(),
        }
    }

    #[test]
    fn test_websocket_url_from_https() {
        let url = config("https://signal.example.org").websocket_url().unwrap();
        assert_eq!(url.as_str(), "wss://signal.example.org/ws");
    }

    #[test]
    fn test_websocket_url_keeps_existing_path() {
        let url = config("http://localhost:8787/ws").websocket_url().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8787/ws");

        let url = config("http://localhost:8787/signal/").websocket_url().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8787/signal/ws");
    }

    #[test]
    fn test_websocket_url_rejects_other_schemes() {
        assert!(matches!(
            config("ftp://example.org").websocket_url(),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_default_timings() {
        let timings = CallTimings::default();
        assert_eq!(timings.no_answer, Duration::from_secs(60));
        assert_eq!(timings.reset_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_turn_server_is_appended() {
        let config = config("https://signal.example.org").with_turn_server(
            "turn:turn.example.org:3478".to_string(),
            "user".to_string(),
            "secret".to_string(),
        );
        assert_eq!(config.ice_servers.len(), default_ice_servers().len() + 1);
    }
}
