//! Crypto Module - Ed25519 Session Keys
//!
//! Dieses Modul verwaltet die kryptographische Identität einer Login-Session:
//! - Erzeugung eines Ed25519 Schlüsselpaars pro Anmeldung
//! - Signierung von Nachrichten für den Signaling-Server
//!

mod session_key;

pub use session_key::{SessionKey, SessionKeyError};
