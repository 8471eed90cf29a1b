//! Store Module - lokale SQLite-Ablage
//!
//! Speichert Peer-Adressen, Profile und Anruf-Hinweise.

mod sqlite;

pub use sqlite::{ClinicStore, ConversationMessage};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),
}
