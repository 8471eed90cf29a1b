//! Clinic Call - P2P Audio/Video-Anrufe zwischen Personal und Klienten
//!
//! Die Anruf-Session der Klinik-Applikation mit:
//! - WebSocket-Signaling mit Ed25519-signierten Nachrichten
//! - WebRTC für P2P Audio/Video
//! - Einem Call Controller als einzige Zustandsmaschine
//! - SQLite für Presence, Profile und Anruf-Hinweise

pub mod call;
pub mod config;
pub mod crypto;
pub mod media;
pub mod overlay;
pub mod services;
pub mod store;
pub mod transport;

use call::{CallController, CallHandle, Collaborators};
use config::{AppConfig, ConfigError};
use crypto::SessionKey;
use media::{CpalCues, SystemDevices};
use std::sync::Arc;
use std::time::Duration;
use store::{ClinicStore, StoreError};
use thiserror::Error;
use tokio::task::JoinHandle;
use transport::WebRtcTransport;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging (`RUST_LOG` überschreibt den Default)
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("clinic_call=debug,webrtc=warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Laufender Call Controller mit seinem Transport
struct Calling {
    handle: CallHandle,
    transport: Arc<WebRtcTransport>,
    task: JoinHandle<()>,
}

/// Application State einer Login-Session.
///
/// Wird beim Login erstellt und beim Logout mit `shutdown()` abgebaut.
pub struct AppState {
    config: AppConfig,
    store: Arc<ClinicStore>,
    calling: Option<Calling>,
}

impl AppState {
    /// Initialisiert Store, Transport und Call Controller.
    ///
    /// Kann der Transport nicht geöffnet werden, läuft die Session ohne
    /// Anruf-Funktionen weiter (`calls()` gibt `None` zurück).
    pub async fn start(config: AppConfig) -> Result<Self, AppError> {
        tracing::info!("Starting clinic call session for {}", config.user_id);

        let store = match &config.database_path {
            Some(path) => ClinicStore::open(path)?,
            None => ClinicStore::open_in_memory()?,
        };
        let store = Arc::new(store);
        let ws_url = config.websocket_url()?;

        // Schlüssel gilt nur für diese Login-Session
        let key = Arc::new(SessionKey::generate());
        tracing::debug!("Session key: {}", key.public_key_base64());

        let transport = Arc::new(WebRtcTransport::new(
            ws_url,
            config.user_id.clone(),
            key,
            config.ice_servers.clone(),
        ));

        let deps = Collaborators {
            transport: transport.clone(),
            media: Arc::new(SystemDevices::new()),
            cues: Arc::new(CpalCues::new()),
            presence: store.clone(),
            conversations: store.clone(),
            profiles: store.clone(),
        };
        let (handle, task) = CallController::spawn(config.user_id.clone(), deps, config.timings);

        let calling = match transport.open().await {
            Ok(address) => {
                tracing::info!("Calling available as {}", address);
                Some(Calling {
                    handle,
                    transport,
                    task,
                })
            }
            Err(e) => {
                tracing::error!("Peer transport unavailable, calling disabled: {}", e);
                drop(handle);
                transport.shutdown().await;
                task.abort();
                None
            }
        };

        Ok(Self {
            config,
            store,
            calling,
        })
    }

    /// Handle auf den Call Controller, falls Anrufe verfügbar sind
    pub fn calls(&self) -> Option<&CallHandle> {
        self.calling.as_ref().map(|c| &c.handle)
    }

    pub fn store(&self) -> &Arc<ClinicStore> {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Beendet laufende Anrufe und schließt den Transport (Logout)
    pub async fn shutdown(self) {
        let Some(Calling {
            handle,
            transport,
            task,
        }) = self.calling
        else {
            return;
        };

        if let Err(e) = handle.end_call().await {
            tracing::warn!("Failed to end call on shutdown: {}", e);
        }
        drop(handle);
        transport.shutdown().await;

        let abort = task.abort_handle();
        if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
            tracing::warn!("Call controller did not stop in time, aborting");
            abort.abort();
        }
        tracing::info!("Session for {} closed", self.config.user_id);
    }
}
