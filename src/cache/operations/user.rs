use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use redis::{AsyncCommands, Client as RedisClient};

use crate::cache::keys;
use crate::error::StoreError;
use crate::models::{ChatExchange, Conversation, Tier, UserRecord};

/// 历史列表最多返回的会话数
pub const HISTORY_LIMIT: usize = 50;

/// 用户订阅与聊天记录的存储接口
#[async_trait]
pub trait UserStore: Send + Sync {
    /// 读取用户记录，不存在则创建；第二项表示本次是否新建
    async fn ensure_user(&self, user_id: &str) -> Result<(UserRecord, bool), StoreError>;

    /// 读取当前有效等级；不存在的用户为 FREE，过期的等级会被降级并写回
    async fn get_user_tier(&self, user_id: &str) -> Result<Tier, StoreError>;

    async fn set_user_tier(
        &self,
        user_id: &str,
        tier: Tier,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<UserRecord, StoreError>;

    async fn append_exchange(
        &self,
        user_id: &str,
        conversation_id: &str,
        exchange: ChatExchange,
    ) -> Result<(), StoreError>;

    /// 最近更新的会话在前
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, UserRecord>,
    conversations: DashMap<String, Vec<Conversation>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn ensure_user(&self, user_id: &str) -> Result<(UserRecord, bool), StoreError> {
        let now = Utc::now();
        match self.users.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().expire_if_due(now);
                Ok((entry.get().clone(), false))
            }
            Entry::Vacant(entry) => {
                tracing::info!("Created user record: {}", user_id);
                let record = entry.insert(UserRecord::new(user_id, now));
                Ok((record.clone(), true))
            }
        }
    }

    async fn get_user_tier(&self, user_id: &str) -> Result<Tier, StoreError> {
        Ok(match self.users.get_mut(user_id) {
            Some(mut record) => {
                record.expire_if_due(Utc::now());
                record.tier
            }
            None => Tier::Free,
        })
    }

    async fn set_user_tier(
        &self,
        user_id: &str,
        tier: Tier,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<UserRecord, StoreError> {
        let mut record = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserRecord::new(user_id, Utc::now()));
        record.tier = tier;
        record.tier_expires_at = expiry;
        Ok(record.clone())
    }

    async fn append_exchange(
        &self,
        user_id: &str,
        conversation_id: &str,
        exchange: ChatExchange,
    ) -> Result<(), StoreError> {
        let mut conversations = self.conversations.entry(user_id.to_string()).or_default();
        match conversations.iter_mut().find(|c| c.id == conversation_id) {
            Some(conversation) => conversation.push(exchange),
            None => {
                let mut conversation = Conversation::new(conversation_id, &exchange);
                conversation.push(exchange);
                conversations.push(conversation);
            }
        }
        Ok(())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut list = self
            .conversations
            .get(user_id)
            .map(|c| c.clone())
            .unwrap_or_default();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list.truncate(HISTORY_LIMIT);
        Ok(list)
    }
}

/// Redis 用户存储
pub struct RedisUserStore {
    redis: Arc<RedisClient>,
}

impl RedisUserStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    async fn load(
        conn: &mut redis::aio::MultiplexedConnection,
        user_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let json: Option<String> = conn.get(keys::user_key(user_id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(
        conn: &mut redis::aio::MultiplexedConnection,
        record: &UserRecord,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let _: () = conn.set(keys::user_key(&record.user_id), json).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for RedisUserStore {
    async fn ensure_user(&self, user_id: &str) -> Result<(UserRecord, bool), StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let now = Utc::now();

        match Self::load(&mut conn, user_id).await? {
            Some(mut record) => {
                if record.expire_if_due(now) {
                    Self::save(&mut conn, &record).await?;
                }
                Ok((record, false))
            }
            None => {
                let record = UserRecord::new(user_id, now);
                let json = serde_json::to_string(&record)?;
                // SETNX 避免并发首次访问互相覆盖
                let created: bool = conn.set_nx(keys::user_key(user_id), json).await?;
                if created {
                    tracing::info!("Created user record: {}", user_id);
                    return Ok((record, true));
                }
                Self::load(&mut conn, user_id)
                    .await?
                    .map(|record| (record, false))
                    .ok_or_else(|| StoreError::Unavailable(format!("user {} vanished", user_id)))
            }
        }
    }

    async fn get_user_tier(&self, user_id: &str) -> Result<Tier, StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        match Self::load(&mut conn, user_id).await? {
            Some(mut record) => {
                if record.expire_if_due(Utc::now()) {
                    Self::save(&mut conn, &record).await?;
                }
                Ok(record.tier)
            }
            None => Ok(Tier::Free),
        }
    }

    async fn set_user_tier(
        &self,
        user_id: &str,
        tier: Tier,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<UserRecord, StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let mut record = Self::load(&mut conn, user_id)
            .await?
            .unwrap_or_else(|| UserRecord::new(user_id, Utc::now()));
        record.tier = tier;
        record.tier_expires_at = expiry;
        Self::save(&mut conn, &record).await?;
        Ok(record)
    }

    async fn append_exchange(
        &self,
        user_id: &str,
        conversation_id: &str,
        exchange: ChatExchange,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(&exchange)?;

        let _: () = redis::pipe()
            .atomic()
            .rpush(keys::conversation_key(user_id, conversation_id), json)
            .ignore()
            .zadd(
                keys::conversation_index_key(user_id),
                conversation_id,
                exchange.at.timestamp_millis(),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn
            .zrevrange(
                keys::conversation_index_key(user_id),
                0,
                HISTORY_LIMIT as isize - 1,
            )
            .await?;

        let mut conversations = Vec::with_capacity(ids.len());
        for id in ids {
            let items: Vec<String> = conn
                .lrange(keys::conversation_key(user_id, &id), 0, -1)
                .await?;
            let mut exchanges = Vec::with_capacity(items.len());
            for item in items {
                match serde_json::from_str::<ChatExchange>(&item) {
                    Ok(exchange) => exchanges.push(exchange),
                    Err(e) => tracing::warn!("Skipping corrupt exchange in {}: {}", id, e),
                }
            }
            if let Some(conversation) = Conversation::from_exchanges(&id, exchanges) {
                conversations.push(conversation);
            }
        }
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn exchange(user: &str, at: DateTime<Utc>) -> ChatExchange {
        ChatExchange {
            user: user.to_string(),
            assistant: format!("re: {}", user),
            model: Some("test/model".to_string()),
            at,
        }
    }

    #[tokio::test]
    async fn ensure_user_creates_once() {
        let store = MemoryUserStore::new();
        let (first, created) = store.ensure_user("u1").await.unwrap();
        assert!(created);
        assert_eq!(first.tier, Tier::Free);

        store.set_user_tier("u1", Tier::Pro, None).await.unwrap();
        let (second, created) = store.ensure_user("u1").await.unwrap();
        assert!(!created);
        assert_eq!(second.tier, Tier::Pro);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn unknown_user_is_free() {
        let store = MemoryUserStore::new();
        assert_eq!(store.get_user_tier("nobody").await.unwrap(), Tier::Free);
    }

    #[tokio::test]
    async fn expired_grant_is_downgraded_on_lookup() {
        let store = MemoryUserStore::new();
        let past = Utc::now() - Duration::minutes(1);
        store.set_user_tier("u1", Tier::Ultra, Some(past)).await.unwrap();

        assert_eq!(store.get_user_tier("u1").await.unwrap(), Tier::Free);
        let (record, _) = store.ensure_user("u1").await.unwrap();
        assert_eq!(record.tier_expires_at, None);
    }

    #[tokio::test]
    async fn history_groups_by_conversation_newest_first() {
        let store = MemoryUserStore::new();
        let t0 = Utc::now();
        store.append_exchange("u1", "a", exchange("first", t0)).await.unwrap();
        store
            .append_exchange("u1", "b", exchange("other", t0 + Duration::seconds(1)))
            .await
            .unwrap();
        store
            .append_exchange("u1", "a", exchange("follow-up", t0 + Duration::seconds(2)))
            .await
            .unwrap();

        let chats = store.list_conversations("u1").await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, "a");
        assert_eq!(chats[0].title, "first");
        assert_eq!(chats[0].exchanges.len(), 2);
        assert_eq!(chats[1].id, "b");

        assert!(store.list_conversations("u2").await.unwrap().is_empty());
    }

    // 设置了 REDIS_URL 时才连接真实 Redis
    fn redis_store() -> Option<RedisUserStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        Some(RedisUserStore::new(Arc::new(RedisClient::open(url).ok()?)))
    }

    #[tokio::test]
    async fn redis_user_record_is_created_once_and_keeps_grants() {
        let Some(store) = redis_store() else {
            return;
        };
        let user = format!("test-{}", uuid::Uuid::new_v4());

        let (first, created) = store.ensure_user(&user).await.unwrap();
        assert!(created);
        assert_eq!(first.tier, Tier::Free);
        let (_, created) = store.ensure_user(&user).await.unwrap();
        assert!(!created);

        let until = Utc::now() + Duration::days(30);
        store.set_user_tier(&user, Tier::Ultra, Some(until)).await.unwrap();
        assert_eq!(store.get_user_tier(&user).await.unwrap(), Tier::Ultra);

        let past = Utc::now() - Duration::minutes(1);
        store.set_user_tier(&user, Tier::Pro, Some(past)).await.unwrap();
        assert_eq!(store.get_user_tier(&user).await.unwrap(), Tier::Free);
    }

    #[tokio::test]
    async fn redis_history_round_trips_newest_first() {
        let Some(store) = redis_store() else {
            return;
        };
        let user = format!("test-{}", uuid::Uuid::new_v4());
        let t0 = Utc::now();
        store.append_exchange(&user, "a", exchange("first", t0)).await.unwrap();
        store
            .append_exchange(&user, "b", exchange("other", t0 + Duration::seconds(1)))
            .await
            .unwrap();
        store
            .append_exchange(&user, "a", exchange("follow-up", t0 + Duration::seconds(2)))
            .await
            .unwrap();

        let chats = store.list_conversations(&user).await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, "a");
        assert_eq!(chats[0].title, "first");
        assert_eq!(chats[0].exchanges.len(), 2);
        assert_eq!(chats[0].exchanges[1].user, "follow-up");
        assert_eq!(chats[1].id, "b");
    }
}
