//! SQLite Store
//!
//! Lokale Ablage für Presence, Profile und Gesprächs-Hinweise.
//! Implementiert die Dienst-Traits des Call Controllers.

use super::StoreError;
use crate::services::{CallNotice, ConversationService, PresenceRegistry, Profile, ProfileLookup};
use crate::transport::{PeerAddress, UserId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Gespeicherte System-Nachricht
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub from_user: String,
    pub to_user: String,
    pub kind: String,
    pub body: String,
    pub created_at: String,
}

/// SQLite-Datenbank (Thread-safe durch Mutex)
pub struct ClinicStore {
    conn: Mutex<Connection>,
}

impl ClinicStore {
    /// Öffnet oder erstellt die Datenbank
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening database at {:?}", path);

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-Memory Datenbank (Tests, `--ephemeral`)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialisiert das Datenbank-Schema
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS presence (
                user_id TEXT PRIMARY KEY,
                peer_address TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                avatar_url TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS conversation_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_user TEXT NOT NULL,
                to_user TEXT NOT NULL,
                kind TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_messages_pair
                ON conversation_messages(from_user, to_user);
            "#,
        )?;
        Ok(())
    }

    /// Legt ein Profil an oder aktualisiert es
    pub fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO profiles (user_id, display_name, avatar_url)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar_url = COALESCE(excluded.avatar_url, avatar_url),
                updated_at = datetime('now')
            "#,
            params![
                profile.user_id.as_str(),
                profile.display_name,
                profile.avatar_url
            ],
        )?;
        Ok(())
    }

    /// Alle Nachrichten zwischen zwei Benutzern, älteste zuerst
    pub fn messages_between(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, from_user, to_user, kind, body, created_at
            FROM conversation_messages
            WHERE (from_user = ?1 AND to_user = ?2)
               OR (from_user = ?2 AND to_user = ?1)
            ORDER BY id ASC
            "#,
        )?;

        let messages = stmt
            .query_map(params![a.as_str(), b.as_str()], |row| {
                Ok(ConversationMessage {
                    id: row.get(0)?,
                    from_user: row.get(1)?,
                    to_user: row.get(2)?,
                    kind: row.get(3)?,
                    body: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(messages)
    }
}

#[async_trait]
impl PresenceRegistry for ClinicStore {
    async fn publish(&self, user: &UserId, address: &PeerAddress) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO presence (user_id, peer_address)
            VALUES (?1, ?2)
            ON CONFLICT(user_id) DO UPDATE SET
                peer_address = excluded.peer_address,
                updated_at = datetime('now')
            "#,
            params![user.as_str(), address.as_str()],
        )?;
        tracing::debug!("Presence of {} is now {}", user, address);
        Ok(())
    }

    async fn lookup(&self, user: &UserId) -> Result<Option<PeerAddress>, StoreError> {
        let conn = self.conn.lock();
        let address = conn
            .query_row(
                "SELECT peer_address FROM presence WHERE user_id = ?1",
                params![user.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(address.map(PeerAddress::new))
    }
}

#[async_trait]
impl ConversationService for ClinicStore {
    async fn post_call_notice(
        &self,
        from: &UserId,
        to: &UserId,
        notice: CallNotice,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO conversation_messages (from_user, to_user, kind, body)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![from.as_str(), to.as_str(), notice.label(), notice.body()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ProfileLookup for ClinicStore {
    async fn profile(&self, user: &UserId) -> Result<Option<Profile>, StoreError> {
        let conn = self.conn.lock();
        let profile = conn
            .query_row(
                r#"
                SELECT user_id, display_name, avatar_url
                FROM profiles
                WHERE user_id = ?1
                "#,
                params![user.as_str()],
                |row| {
                    Ok(Profile {
                        user_id: UserId::new(row.get::<_, String>(0)?),
                        display_name: row.get(1)?,
                        avatar_url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }
}

impl std::fmt::Debug for ClinicStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClinicStore").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallKind;

    #[tokio::test]
    async fn test_presence_keeps_latest_address() {
        let store = ClinicStore::open_in_memory().unwrap();
        let user = UserId::new("staff1");

        assert_eq!(store.lookup(&user).await.unwrap(), None);

        store
            .publish(&user, &PeerAddress::new("staff1-100"))
            .await
            .unwrap();
        store
            .publish(&user, &PeerAddress::new("staff1-200"))
            .await
            .unwrap();

        assert_eq!(
            store.lookup(&user).await.unwrap(),
            Some(PeerAddress::new("staff1-200"))
        );
    }

    #[tokio::test]
    async fn test_call_notices_are_listed_in_order() {
        let store = ClinicStore::open_in_memory().unwrap();
        let staff = UserId::new("staff1");
        let client = UserId::new("client9");

        store
            .post_call_notice(&staff, &client, CallNotice::Placed(CallKind::Video))
            .await
            .unwrap();
        store
            .post_call_notice(&staff, &client, CallNotice::Missed(CallKind::Video))
            .await
            .unwrap();

        let messages = store.messages_between(&client, &staff).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, "call_placed");
        assert_eq!(messages[1].body, "Missed video call");
    }

    #[tokio::test]
    async fn test_profile_upsert_keeps_avatar() {
        let store = ClinicStore::open_in_memory().unwrap();
        let user = UserId::new("client9");

        store
            .upsert_profile(&Profile {
                user_id: user.clone(),
                display_name: "Jordan".to_string(),
                avatar_url: Some("https://cdn.example/j.png".to_string()),
            })
            .unwrap();
        store
            .upsert_profile(&Profile {
                user_id: user.clone(),
                display_name: "Jordan P.".to_string(),
                avatar_url: None,
            })
            .unwrap();

        let profile = store.profile(&user).await.unwrap().unwrap();
        assert_eq!(profile.display_name, "Jordan P.");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://cdn.example/j.png"));
    }
}
