//! Ed25519 Session Key
//!
//! Für jede Anmeldung wird ein frisches Schlüsselpaar erzeugt. Der
//! Public Key wird bei der Registrierung der Peer-Adresse übertragen,
//! jede weitere Signaling-Nachricht wird damit signiert.
//!
//! ## Verwendung
//! ```rust
//! use clinic_call::crypto::SessionKey;
//!
//! let key = SessionKey::generate();
//! let envelope = key
//!     .seal(&serde_json::json!({ "type": "heartbeat", "peerId": "u1-1" }), 1_700_000_000_000)
//!     .unwrap();
//! assert!(envelope["signature"].is_string());
//! assert_eq!(envelope["timestamp"], 1_700_000_000_000u64);
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SessionKeyError {
    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to decode base64: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Missing signature field")]
    MissingSignature,

    #[error("Invalid key or signature bytes")]
    InvalidBytes,

    #[error("Signature verification failed")]
    BadSignature,
}

// ============================================================================
// SESSION KEY
// ============================================================================

/// Schlüsselpaar einer Login-Session
#[derive(Clone)]
pub struct SessionKey {
    signing_key: SigningKey,
}

impl SessionKey {
    /// Erzeugt ein neues zufälliges Schlüsselpaar
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Public Key als Base64 (44 Zeichen)
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Ergänzt `timestamp` und `signature` zu einem JSON-Objekt.
    ///
    /// Signiert wird der kanonische JSON-String (Keys sortiert) aller
    /// Felder außer `signature`.
    pub fn seal<T: Serialize>(&self, payload: &T, timestamp: i64) -> Result<Value, SessionKeyError> {
        let mut envelope = serde_json::to_value(payload)?;
        let obj = envelope.as_object_mut().ok_or(SessionKeyError::NotAnObject)?;
        obj.insert("timestamp".to_string(), Value::Number(timestamp.into()));

        let canonical = canonical_string(&envelope)?;
        let signature = self.signing_key.sign(canonical.as_bytes());

        if let Some(obj) = envelope.as_object_mut() {
            obj.insert(
                "signature".to_string(),
                Value::String(BASE64.encode(signature.to_bytes())),
            );
        }
        Ok(envelope)
    }

    /// Prüft die Signatur eines versiegelten Objekts (prüft sonst der Server)
    #[cfg(test)]
    pub(crate) fn verify(public_key_base64: &str, envelope: &Value) -> Result<(), SessionKeyError> {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let key_bytes: [u8; 32] = BASE64
            .decode(public_key_base64)?
            .try_into()
            .map_err(|_| SessionKeyError::InvalidBytes)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| SessionKeyError::InvalidBytes)?;

        let signature_b64 = envelope
            .get("signature")
            .and_then(Value::as_str)
            .ok_or(SessionKeyError::MissingSignature)?;
        let signature_bytes: [u8; 64] = BASE64
            .decode(signature_b64)?
            .try_into()
            .map_err(|_| SessionKeyError::InvalidBytes)?;
        let signature = Signature::from_bytes(&signature_bytes);

        let canonical = canonical_string(envelope)?;
        verifying_key
            .verify(canonical.as_bytes(), &signature)
            .map_err(|_| SessionKeyError::BadSignature)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

/// JSON mit rekursiv sortierten Keys, ohne `signature`
fn canonical_string(value: &Value) -> Result<String, SessionKeyError> {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<_> = map.keys().filter(|k| *k != "signature").collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for key in keys {
                    if let Some(v) = map.get(key) {
                        out.insert(key.clone(), sorted(v));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }

    Ok(serde_json::to_string(&sorted(value))?)
}

// ============================================================================
// TESTS
// ============================================================================
