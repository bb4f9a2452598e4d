//! Server-side sessions referenced by a private cookie.
//!
//! The cookie holds nothing but a random session id, encrypted and
//! authenticated with the process cookie key. Session values live in the
//! `sessions` table together with an absolute `expires_on`, which is pushed
//! forward by a fixed sliding window on every write.
//!
//! Well-known keys: [`USER_ID`], [`TOKEN_EXPIRY`], [`EXPIRES_ON`].

mod cookie;


pub use cookie::{strip_empty_session_cookie, EmptyCookieFilter};

use crate::config::SessionConfig;
use crate::error::{BrokerError, Result};
use anyhow::Context;
use axum_extra::extract::PrivateCookieJar;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Principal id of the logged-in platform user
pub const USER_ID: &str = "user_id";
/// Platform access token expiry (Unix seconds)
pub const TOKEN_EXPIRY: &str = "exp";
/// Absolute session expiry (Unix seconds), maintained by the store
pub const EXPIRES_ON: &str = "expires_on";

/// SQLite persistence for session rows.
pub struct SessionStore {
    conn: Mutex<Connection>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new<P: AsRef<Path>>(db_path: P, config: SessionConfig) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open session database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id         TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                expires_on INTEGER NOT NULL
            );",
        )
        .context("Failed to create sessions table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BrokerError::Storage(anyhow::anyhow!("session store lock poisoned")))
    }

    /// Returns the values of a live session, `None` if absent or expired.
    fn load_row(&self, id: &str) -> Result<Option<Map<String, Value>>> {
        let row: Option<(String, i64)> = self
            .lock()?
            .query_row(
                "SELECT data, expires_on FROM sessions WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query session")?;

        let Some((data, expires_on)) = row else {
            return Ok(None);
        };
        if expires_on <= Utc::now().timestamp() {
            debug!("Session expired");
            return Ok(None);
        }

        let values: Map<String, Value> =
            serde_json::from_str(&data).context("Corrupt session data")?;
        Ok(Some(values))
    }

    fn save_row(&self, id: &str, values: &Map<String, Value>, expires_on: i64) -> Result<()> {
        let data = serde_json::to_string(values).context("Failed to encode session data")?;
        self.lock()?
            .execute(
                "INSERT INTO sessions (id, data, expires_on) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data, expires_on = excluded.expires_on",
                params![id, data, expires_on],
            )
            .context("Failed to save session")?;
        Ok(())
    }

    fn delete_row(&self, id: &str) -> Result<()> {
        self.lock()?
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Deletes every expired row, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self
            .lock()?
            .execute(
                "DELETE FROM sessions WHERE expires_on <= ?1",
                params![Utc::now().timestamp()],
            )
            .context("Failed to purge sessions")?;
        Ok(removed)
    }
}

/// Background task to periodically purge expired sessions.
///
/// An interval of zero runs every second.
pub async fn run_session_cleanup(store: Arc<SessionStore>, interval_seconds: u64) {
    let period = tokio::time::Duration::from_secs(interval_seconds.max(1));
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        match store.purge_expired() {
            Ok(removed) => debug!(removed, "Session cleanup complete"),
            Err(e) => warn!(error = %e, "Session cleanup failed"),
        }
    }
}

/// The session attached to one request.
///
/// Built from the request's cookie jar; mutations update both the stored row
/// and the jar, which the handler hands back as part of its response.
pub struct Session {
    store: Arc<SessionStore>,
    jar: PrivateCookieJar,
    id: Option<String>,
    values: Map<String, Value>,
}

impl Session {
    /// Resolves the session referenced by the request cookie, if any.
    ///
    /// An unknown, expired or undecryptable cookie yields an empty session.
    pub fn load(store: Arc<SessionStore>, jar: PrivateCookieJar) -> Result<Self> {
        let mut session = Self {
            store,
            jar,
            id: None,
            values: Map::new(),
        };

        let cookie_id = session
            .jar
            .get(session.store.cookie_name())
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());

        if let Some(id) = cookie_id {
            if let Some(values) = session.store.load_row(&id)? {
                session.id = Some(id);
                session.values = values;
            }
        }

        Ok(session)
    }

    /// True when the request carried a live session.
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    pub fn value(&self, key: &str) -> Result<&Value> {
        if self.id.is_none() {
            return Err(BrokerError::SessionValueMissing(key.to_string()));
        }
        self.values
            .get(key)
            .ok_or_else(|| BrokerError::SessionValueMissing(key.to_string()))
    }

    pub fn string_value(&self, key: &str) -> Result<String> {
        self.value(key)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrokerError::SessionValueMissing(key.to_string()))
    }

    pub fn i64_value(&self, key: &str) -> Result<i64> {
        self.value(key)?
            .as_i64()
            .ok_or_else(|| BrokerError::SessionValueMissing(key.to_string()))
    }

    /// Absolute session expiry in Unix seconds.
    pub fn expires_on(&self) -> Result<i64> {
        self.i64_value(EXPIRES_ON)
    }

    /// Merges `values` into the session, slides `expires_on` and re-emits the
    /// cookie. A session is created if none is active.
    pub fn set_values<K: Into<String>>(
        &mut self,
        values: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<()> {
        for (key, value) in values {
            self.values.insert(key.into(), value);
        }

        let window = self.store.config.sliding_window_seconds;
        let expires_on = (Utc::now() + Duration::seconds(window)).timestamp();
        self.values.insert(EXPIRES_ON.to_string(), Value::from(expires_on));

        let id = self
            .id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        self.store.save_row(&id, &self.values, expires_on)?;

        let cookie = cookie::session_cookie(
            &self.store.config.cookie_name,
            &id,
            window,
            self.store.config.secure_cookies,
        );
        self.jar = self.jar.clone().add(cookie);
        Ok(())
    }

    /// Slides the expiry without changing any value.
    pub fn touch(&mut self) -> Result<()> {
        self.set_values(std::iter::empty::<(String, Value)>())
    }

    /// Forgets whatever session the request carried so the next write starts
    /// a fresh one. The old row is removed best-effort.
    pub fn reset(&mut self) {
        if let Some(old) = self.id.take() {
            if let Err(e) = self.store.delete_row(&old) {
                warn!(error = %e, "Failed to remove superseded session");
            }
        }
        self.values.clear();
    }

    /// Ends the session. The removal cookie is always emitted; a storage
    /// failure is returned after the in-memory state is already cleared.
    pub fn clear(&mut self) -> Result<()> {
        let old = self.id.take();
        self.values.clear();
        let removal = cookie::clear_session_cookie(&self.store.config.cookie_name);
        self.jar = self.jar.clone().remove(removal);

        match old {
            Some(id) => self.store.delete_row(&id),
            None => Ok(()),
        }
    }

    pub fn into_jar(self) -> PrivateCookieJar {
        self.jar
    }
}
