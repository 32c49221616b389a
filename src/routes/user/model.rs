use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Tier};

#[derive(Debug, Deserialize)]
pub struct UidRequest {
    #[serde(default)]
    pub uid: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub is_pro: bool,
    pub expiry: Option<DateTime<Utc>>,
    pub tier: Tier,
    pub token: String,
    pub token_expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub chats: Vec<Conversation>,
}
