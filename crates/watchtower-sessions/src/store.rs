use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::auth::{hash_password, verify_password};
use crate::db::init_db;
use crate::error::{Result, SessionStoreError};
use crate::types::{ChatSession, StoredMessage, User};

const USER_COLS: &str = "id, username, email, full_name, is_active, is_admin, created_at, last_login";
const SESSION_COLS: &str = "id, user_id, title, message_count, created_at, updated_at";

/// Thread-safe store for users, chat sessions, and messages.
pub struct SessionStore {
    db: Mutex<Connection>,
}

impl SessionStore {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // ── users ───────────────────────────────────────────────────────────────

    /// Register a new account. Username and email must be unique.
    #[instrument(skip(self, password))]
    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<User> {
        if username.trim().is_empty() || email.trim().is_empty() {
            return Err(SessionStoreError::BadInput(
                "username and email are required".to_string(),
            ));
        }

        let password_hash = hash_password(password)?;
        let now = Utc::now().to_rfc3339();
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            full_name: full_name.map(String::from),
            is_active: true,
            is_admin: false,
            created_at: now.clone(),
            last_login: None,
        };

        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO users
                (id, username, email, password_hash, full_name, is_active, is_admin, created_at)
             VALUES (?1,?2,?3,?4,?5,1,0,?6)",
            params![user.id, user.username, user.email, password_hash, user.full_name, now],
        )?;
        if inserted == 0 {
            return Err(SessionStoreError::Conflict(
                "username or email already registered".to_string(),
            ));
        }
        Ok(user)
    }

    /// Verify credentials. Every failure mode returns the same `AuthFailed`
    /// so callers cannot probe which usernames exist.
    #[instrument(skip(self, password))]
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let db = self.db.lock().unwrap();
        let row: Option<(String, String)> = db
            .query_row(
                "SELECT id, password_hash FROM users
                 WHERE username = ?1 AND is_active = 1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((user_id, stored_hash)) = row else {
            return Err(SessionStoreError::AuthFailed);
        };
        if !verify_password(&stored_hash, password) {
            return Err(SessionStoreError::AuthFailed);
        }

        let now = Utc::now().to_rfc3339();
        db.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now, user_id],
        )?;

        db.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
            params![user_id],
            row_to_user,
        )
        .map_err(SessionStoreError::Database)
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        let user = db
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE id = ?1 AND is_active = 1"),
                params![user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    // ── sessions ────────────────────────────────────────────────────────────

    pub fn create_session(&self, user_id: &str, title: Option<&str>) -> Result<ChatSession> {
        let now = Utc::now();
        let title = title
            .map(String::from)
            .unwrap_or_else(|| format!("Chat Session {}", now.format("%Y-%m-%d %H:%M")));
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title,
            message_count: 0,
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chat_sessions (id, user_id, title, message_count, created_at, updated_at)
             VALUES (?1,?2,?3,0,?4,?4)",
            params![session.id, session.user_id, session.title, session.created_at],
        )?;
        debug!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Fetch a session, scoped to its owner.
    pub fn get_session(&self, session_id: &str, user_id: &str) -> Result<Option<ChatSession>> {
        let db = self.db.lock().unwrap();
        let session = db
            .query_row(
                &format!(
                    "SELECT {SESSION_COLS} FROM chat_sessions
                     WHERE id = ?1 AND user_id = ?2"
                ),
                params![session_id, user_id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Most recently updated sessions for a user.
    pub fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<ChatSession>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {SESSION_COLS} FROM chat_sessions
             WHERE user_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user_id, limit as i64], row_to_session)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(SessionStoreError::Database)
    }

    pub fn rename_session(&self, session_id: &str, user_id: &str, title: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE chat_sessions SET title = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            params![title, now, session_id, user_id],
        )?;
        if changed == 0 {
            return Err(SessionStoreError::NotFound("session"));
        }
        Ok(())
    }

    /// Delete a session; its messages cascade away with it.
    pub fn delete_session(&self, session_id: &str, user_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "DELETE FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
            params![session_id, user_id],
        )?;
        if changed == 0 {
            return Err(SessionStoreError::NotFound("session"));
        }
        Ok(())
    }

    /// Titles and message content LIKE search, newest sessions first.
    pub fn search_sessions(
        &self,
        user_id: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<ChatSession>> {
        let pattern = format!("%{term}%");
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT DISTINCT s.id, s.user_id, s.title, s.message_count, s.created_at, s.updated_at
             FROM chat_sessions s
             LEFT JOIN chat_messages m ON s.id = m.session_id
             WHERE s.user_id = ?1 AND (s.title LIKE ?2 OR m.content LIKE ?2)
             ORDER BY s.updated_at DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![user_id, pattern, limit as i64], row_to_session)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(SessionStoreError::Database)
    }

    // ── messages ────────────────────────────────────────────────────────────

    /// Append one message and bump the parent's count and updated_at, in one
    /// transaction — the `message_count == COUNT(messages)` invariant can
    /// never be observed broken.
    #[instrument(skip(self, content, tool_calls, thinking))]
    pub fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        tool_calls: Option<&serde_json::Value>,
        thinking: Option<&str>,
    ) -> Result<StoredMessage> {
        let now = Utc::now().to_rfc3339();
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: tool_calls.cloned(),
            thinking: thinking.map(String::from),
            created_at: now.clone(),
        };
        let tool_calls_json = message
            .tool_calls
            .as_ref()
            .map(|v| v.to_string());

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let bumped = tx.execute(
            "UPDATE chat_sessions
             SET message_count = message_count + 1, updated_at = ?1
             WHERE id = ?2",
            params![now, session_id],
        )?;
        if bumped == 0 {
            return Err(SessionStoreError::NotFound("session"));
        }
        tx.execute(
            "INSERT INTO chat_messages (id, session_id, role, content, tool_calls, thinking, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                message.id,
                message.session_id,
                message.role,
                message.content,
                tool_calls_json,
                message.thinking,
                message.created_at
            ],
        )?;
        tx.commit()?;
        Ok(message)
    }

    /// Messages in insertion order (rowid order — `created_at` alone cannot
    /// break same-millisecond ties).
    pub fn get_messages(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "SELECT id, session_id, role, content, tool_calls, thinking, created_at
             FROM chat_messages
             WHERE session_id = ?1
             ORDER BY rowid ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            let tool_calls_json: Option<String> = row.get(4)?;
            Ok(StoredMessage {
                id: row.get(0)?,
                session_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                tool_calls: tool_calls_json.and_then(|s| serde_json::from_str(&s).ok()),
                thinking: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(SessionStoreError::Database)
    }

    /// (sessions, messages) totals for the status endpoint.
    pub fn stats(&self) -> Result<(i64, i64)> {
        let db = self.db.lock().unwrap();
        let sessions: i64 =
            db.query_row("SELECT COUNT(*) FROM chat_sessions", [], |r| r.get(0))?;
        let messages: i64 =
            db.query_row("SELECT COUNT(*) FROM chat_messages", [], |r| r.get(0))?;
        Ok((sessions, messages))
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        is_admin: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        last_login: row.get(7)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSession> {
    Ok(ChatSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        message_count: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
