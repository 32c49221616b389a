/// 缓存键模块
/// 所有 Redis 键都带 `flux:` 前缀

const QUOTA_PREFIX: &str = "flux:quota:";
const USER_PREFIX: &str = "flux:user:";
const CHAT_PREFIX: &str = "flux:chat:";
const CHAT_INDEX_PREFIX: &str = "flux:chats:";

/// 用户限流窗口（hash: m / i / r）
pub fn quota_key(user_id: &str) -> String {
    format!("{}{}", QUOTA_PREFIX, user_id)
}

/// 用户订阅记录（JSON）
pub fn user_key(user_id: &str) -> String {
    format!("{}{}", USER_PREFIX, user_id)
}

/// 单个会话的问答列表（list，每项为 JSON）
pub fn conversation_key(user_id: &str, conversation_id: &str) -> String {
    format!("{}{}:{}", CHAT_PREFIX, user_id, conversation_id)
}

/// 用户会话索引（zset，score 为最后更新时间毫秒）
pub fn conversation_index_key(user_id: &str) -> String {
    format!("{}{}", CHAT_INDEX_PREFIX, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(quota_key("u1"), "flux:quota:u1");
        assert_eq!(user_key("u1"), "flux:user:u1");
        assert_eq!(conversation_key("u1", "c9"), "flux:chat:u1:c9");
        assert_eq!(conversation_index_key("u1"), "flux:chats:u1");
    }
}
