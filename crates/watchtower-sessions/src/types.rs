use serde::{Deserialize, Serialize};

/// An authenticated account. The password hash never leaves the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// A persisted conversation. `message_count` is maintained transactionally
/// with every append and always equals the number of child messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// One stored chat message. Messages are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    /// system / user / assistant / tool.
    pub role: String,
    pub content: String,
    /// Tool-call payload (JSON) for assistant messages that requested tools.
    pub tool_calls: Option<serde_json::Value>,
    /// Model-internal reasoning trace, kept out of the visible content.
    pub thinking: Option<String>,
    pub created_at: String,
}
