use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const TITLE_MAX_CHARS: usize = 48;

/// 一轮问答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatExchange {
    pub user: String,
    pub assistant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub at: DateTime<Utc>,
}

/// 按追加顺序保存的会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub exchanges: Vec<ChatExchange>,
}

impl Conversation {
    pub fn new(id: &str, first: &ChatExchange) -> Self {
        Self {
            id: id.to_string(),
            title: title_from(&first.user),
            updated_at: first.at,
            exchanges: Vec::new(),
        }
    }

    /// 由按顺序存储的问答重建会话
    pub fn from_exchanges(id: &str, exchanges: Vec<ChatExchange>) -> Option<Self> {
        let first = exchanges.first()?;
        let mut conversation = Self::new(id, first);
        if let Some(last) = exchanges.last() {
            conversation.updated_at = last.at;
        }
        conversation.exchanges = exchanges;
        Some(conversation)
    }

    pub fn push(&mut self, exchange: ChatExchange) {
        self.updated_at = exchange.at;
        self.exchanges.push(exchange);
    }
}

fn title_from(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return "Image".to_string();
    }
    line.chars().take(TITLE_MAX_CHARS).collect()
}
