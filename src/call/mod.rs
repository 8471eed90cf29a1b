//! Call Module - Zustandsmaschine einer Anruf-Session
//!
//! Dieses Modul verwaltet:
//! - Den Zustand eines Anrufs (ausgehend, eingehend, verbunden, beendet)
//! - Zeitgeber für No-Answer, Medien-Prüfung und Abschluss-Anzeige
//! - Die Freigabe aller Medien bei jedem Ende einer Session

mod controller;
mod handle;
mod state;

#[cfg(test)]
mod tests;

pub use controller::{CallController, Collaborators};
pub use handle::{CallError, CallHandle};
pub use state::{CallEvent, CallKind, CallSnapshot, CallState};
