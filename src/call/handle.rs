//! Befehls-Schnittstelle zum Call Controller

use super::state::{CallEvent, CallKind, CallSnapshot};
use crate::transport::UserId;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Call controller has shut down")]
    ControllerClosed,
}

/// Befehle an den Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    StartCall { kind: CallKind, remote: UserId },
    Accept,
    Decline,
    End,
    ToggleMute,
    ToggleVideo,
    Dismiss,
}

pub(crate) type Envelope = (Command, oneshot::Sender<()>);

/// Klonbarer Handle auf den laufenden Controller.
///
/// Jeder Befehl wartet, bis der Controller ihn verarbeitet hat. Das
/// Ergebnis ist ausschließlich am Zustand sichtbar.
#[derive(Debug, Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<Envelope>,
    snapshot_rx: watch::Receiver<CallSnapshot>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Envelope>,
        snapshot_rx: watch::Receiver<CallSnapshot>,
        event_tx: broadcast::Sender<CallEvent>,
    ) -> Self {
        Self {
            commands,
            snapshot_rx,
            event_tx,
        }
    }

    pub async fn start_audio_call(&self, remote: UserId) -> Result<(), CallError> {
        self.send(Command::StartCall {
            kind: CallKind::Audio,
            remote,
        })
        .await
    }

    pub async fn start_video_call(&self, remote: UserId) -> Result<(), CallError> {
        self.send(Command::StartCall {
            kind: CallKind::Video,
            remote,
        })
        .await
    }

    /// Nimmt den klingelnden Anruf an. Ohne klingelnden Anruf wirkungslos.
    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.send(Command::Accept).await
    }

    pub async fn decline_call(&self) -> Result<(), CallError> {
        self.send(Command::Decline).await
    }

    /// Legt auf und gibt alle Medien frei, egal in welchem Zustand
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.send(Command::End).await
    }

    pub async fn toggle_mute(&self) -> Result<(), CallError> {
        self.send(Command::ToggleMute).await
    }

    pub async fn toggle_video(&self) -> Result<(), CallError> {
        self.send(Command::ToggleVideo).await
    }

    /// Schließt die Abschluss-Anzeige sofort
    pub async fn dismiss(&self) -> Result<(), CallError> {
        self.send(Command::Dismiss).await
    }

    /// Aktueller Zustand
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver für Zustandsänderungen
    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), CallError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send((command, ack_tx))
            .await
            .map_err(|_| CallError::ControllerClosed)?;
        ack_rx.await.map_err(|_| CallError::ControllerClosed)
    }
}
