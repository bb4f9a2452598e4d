//! SQLite-backed token store.
//!
//! One row per (principal, target). Access and refresh tokens are sealed with
//! the process-wide key before they reach the database.

use super::encryption::TokenCipher;
use super::{TokenRecord, TokenTarget};
use crate::error::{BrokerError, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Encrypted token persistence.
///
/// # Schema
/// ```sql
/// CREATE TABLE tokens (
///     principal_id  TEXT NOT NULL,
///     token_type    TEXT NOT NULL,   -- 'platform' | 'service'
///     target_id     TEXT NOT NULL,   -- '' for the platform
///     access_token  TEXT NOT NULL,   -- sealed
///     refresh_token TEXT NOT NULL,   -- sealed
///     token_expiry  INTEGER NOT NULL,-- Unix seconds
///     updated_at    TEXT NOT NULL,
///     PRIMARY KEY (principal_id, token_type, target_id)
/// );
/// ```
///
/// Every call goes to SQLite; there is no cache. The connection is behind a
/// `Mutex`, so the store is safe to share across request tasks.
pub struct TokenStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl TokenStore {
    /// Opens (or creates) the store.
    ///
    /// # Arguments
    /// * `db_path` - SQLite database file, or `":memory:"`
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> anyhow::Result<Self> {
        let cipher = TokenCipher::from_base64(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open token database")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                principal_id  TEXT NOT NULL,
                token_type    TEXT NOT NULL,
                target_id     TEXT NOT NULL,
                access_token  TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                token_expiry  INTEGER NOT NULL,
                updated_at    TEXT NOT NULL,
                PRIMARY KEY (principal_id, token_type, target_id)
            );
            "#,
        )
        .context("Failed to create tokens table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BrokerError::Storage(anyhow::anyhow!("token store lock poisoned")))
    }

    /// Stores a record, replacing any existing one for the same key.
    pub fn put(&self, principal_id: &str, target: &TokenTarget, record: &TokenRecord) -> Result<()> {
        let access_token = self
            .cipher
            .seal(&record.access_token)
            .context("Failed to encrypt access token")?;
        let refresh_token = self
            .cipher
            .seal(&record.refresh_token)
            .context("Failed to encrypt refresh token")?;

        let (token_type, target_id) = target.key();

        self.lock()?
            .execute(
                r#"
                INSERT INTO tokens (
                    principal_id, token_type, target_id,
                    access_token, refresh_token, token_expiry, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(principal_id, token_type, target_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    token_expiry = excluded.token_expiry,
                    updated_at = excluded.updated_at
                "#,
                params![
                    principal_id,
                    token_type,
                    target_id,
                    access_token,
                    refresh_token,
                    record.expires_at.timestamp(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to store token record")?;

        debug!(principal = %principal_id, target = %target, "Token record stored");
        Ok(())
    }

    /// Loads and decrypts a record; [`BrokerError::NotFound`] when absent.
    pub fn get(&self, principal_id: &str, target: &TokenTarget) -> Result<TokenRecord> {
        let (token_type, target_id) = target.key();

        let row: Option<(String, String, i64)> = self
            .lock()?
            .query_row(
                r#"
                SELECT access_token, refresh_token, token_expiry
                FROM tokens
                WHERE principal_id = ?1 AND token_type = ?2 AND target_id = ?3
                "#,
                params![principal_id, token_type, target_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("Failed to query token record")?;

        let Some((access_token, refresh_token, token_expiry)) = row else {
            return Err(BrokerError::NotFound(format!(
                "{} token for principal '{}'",
                target, principal_id
            )));
        };

        let expires_at = DateTime::<Utc>::from_timestamp(token_expiry, 0)
            .context("Stored token expiry out of range")?;

        Ok(TokenRecord {
            access_token: self
                .cipher
                .open(&access_token)
                .context("Failed to decrypt access token")?,
            refresh_token: self
                .cipher
                .open(&refresh_token)
                .context("Failed to decrypt refresh token")?,
            expires_at,
        })
    }

    /// Removes a record. Absence is logged, never an error.
    pub fn delete(&self, principal_id: &str, target: &TokenTarget) -> Result<()> {
        let (token_type, target_id) = target.key();

        let removed = self
            .lock()?
            .execute(
                "DELETE FROM tokens WHERE principal_id = ?1 AND token_type = ?2 AND target_id = ?3",
                params![principal_id, token_type, target_id],
            )
            .context("Failed to delete token record")?;

        if removed == 0 {
            warn!(principal = %principal_id, target = %target, "No token record to delete");
        }
        Ok(())
    }

    /// Target ids with a stored service token for `principal_id`, sorted.
    pub fn list_targets(&self, principal_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT target_id FROM tokens
                 WHERE principal_id = ?1 AND token_type = 'service'
                 ORDER BY target_id",
            )
            .context("Failed to prepare query")?;

        let targets = stmt
            .query_map(params![principal_id], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(targets)
    }
}
