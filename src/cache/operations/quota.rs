use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::{AsyncCommands, Client as RedisClient, Script};

use crate::cache::keys;
use crate::error::StoreError;
use crate::models::{QuotaKind, RateLimitBucket, TierLimits};

/// 一次配额扣减请求
#[derive(Debug, Clone, Copy)]
pub struct QuotaRequest {
    pub with_image: bool,
    pub limits: TierLimits,
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// 已通过并扣减，附带扣减后的窗口
    Admitted(RateLimitBucket),
    Rejected {
        kind: QuotaKind,
        bucket: RateLimitBucket,
    },
}

/// 限流窗口存储。`try_consume` 必须把检查和扣减作为一个原子步骤完成
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn try_consume(
        &self,
        user_id: &str,
        request: QuotaRequest,
        now: DateTime<Utc>,
    ) -> Result<Admission, StoreError>;

    /// 退还一次扣减。`window_reset_at` 是扣减时所在窗口，窗口已滚动则不退
    async fn refund(
        &self,
        user_id: &str,
        with_image: bool,
        window_reset_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn bucket(&self, user_id: &str) -> Result<Option<RateLimitBucket>, StoreError>;
}

/// 进程内限流存储
#[derive(Default)]
pub struct MemoryQuotaStore {
    buckets: DashMap<String, RateLimitBucket>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清理已过期的窗口，返回清理数量
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.window_reset_at >= now);
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn consume_sync(&self, user_id: &str, request: QuotaRequest, now: DateTime<Utc>) -> Admission {
        // entry 持有分片锁，检查与扣减之间不会被其他请求插入
        let mut bucket = self
            .buckets
            .entry(user_id.to_string())
            .or_insert_with(|| RateLimitBucket::new(now, request.window));
        bucket.roll_window(now, request.window);

        match bucket.check(request.with_image, &request.limits) {
            Ok(()) => {
                bucket.debit(request.with_image);
                Admission::Admitted(bucket.clone())
            }
            Err(kind) => Admission::Rejected {
                kind,
                bucket: bucket.clone(),
            },
        }
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn try_consume(
        &self,
        user_id: &str,
        request: QuotaRequest,
        now: DateTime<Utc>,
    ) -> Result<Admission, StoreError> {
        Ok(self.consume_sync(user_id, request, now))
    }

    async fn refund(
        &self,
        user_id: &str,
        with_image: bool,
        window_reset_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(mut bucket) = self.buckets.get_mut(user_id) {
            if bucket.window_reset_at == window_reset_at {
                bucket.refund(with_image);
            } else {
                tracing::debug!("Skipping refund for {}: window already rolled", user_id);
            }
        }
        Ok(())
    }

    async fn bucket(&self, user_id: &str) -> Result<Option<RateLimitBucket>, StoreError> {
        Ok(self.buckets.get(user_id).map(|b| b.clone()))
    }
}

// 返回 {status, message_count, image_count, reset_at_ms}
// status: 1 通过, -1 消息超额, -2 图片超额
const CONSUME_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local with_image = ARGV[3] == '1'
local max_msg = tonumber(ARGV[4])
local max_img = tonumber(ARGV[5])
local vals = redis.call('HMGET', KEYS[1], 'm', 'i', 'r')
local m = tonumber(vals[1]) or 0
local i = tonumber(vals[2]) or 0
local r = tonumber(vals[3])
if r == nil or now > r then
  m = 0
  i = 0
  r = now + window
end
local status = 1
if with_image and max_img >= 0 and i >= max_img then
  status = -2
elseif max_msg >= 0 and m >= max_msg then
  status = -1
else
  m = m + 1
  if with_image then i = i + 1 end
end
redis.call('HSET', KEYS[1], 'm', m, 'i', i, 'r', r)
redis.call('PEXPIREAT', KEYS[1], r + 1000)
return {status, m, i, r}
"#;

// ARGV[2] 为扣减时的窗口结束时间，不一致说明窗口已滚动
const REFUND_SCRIPT: &str = r#"
local r = tonumber(redis.call('HGET', KEYS[1], 'r'))
if r == nil or r ~= tonumber(ARGV[2]) then return 0 end
local m = tonumber(redis.call('HGET', KEYS[1], 'm') or '0')
if m > 0 then redis.call('HINCRBY', KEYS[1], 'm', -1) end
if ARGV[1] == '1' then
  local i = tonumber(redis.call('HGET', KEYS[1], 'i') or '0')
  if i > 0 then redis.call('HINCRBY', KEYS[1], 'i', -1) end
end
return 1
"#;

/// Redis 限流存储，键在窗口结束后自动过期
pub struct RedisQuotaStore {
    redis: Arc<RedisClient>,
    consume: Script,
    refund: Script,
}

impl RedisQuotaStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self {
            redis,
            consume: Script::new(CONSUME_SCRIPT),
            refund: Script::new(REFUND_SCRIPT),
        }
    }
}

fn limit_arg(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}

fn bucket_from_parts(message: i64, image: i64, reset_ms: i64) -> Result<RateLimitBucket, StoreError> {
    let window_reset_at = DateTime::from_timestamp_millis(reset_ms)
        .ok_or_else(|| StoreError::Unavailable(format!("invalid window timestamp {}", reset_ms)))?;
    Ok(RateLimitBucket {
        message_count: message.max(0) as u32,
        image_count: image.max(0) as u32,
        window_reset_at,
    })
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn try_consume(
        &self,
        user_id: &str,
        request: QuotaRequest,
        now: DateTime<Utc>,
    ) -> Result<Admission, StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let reply: Vec<i64> = self
            .consume
            .key(keys::quota_key(user_id))
            .arg(now.timestamp_millis())
            .arg(request.window.num_milliseconds())
            .arg(if request.with_image { "1" } else { "0" })
            .arg(limit_arg(request.limits.messages))
            .arg(limit_arg(request.limits.images))
            .invoke_async(&mut conn)
            .await?;

        let [status, message, image, reset_ms] = reply[..] else {
            return Err(StoreError::Unavailable(format!(
                "unexpected quota script reply: {:?}",
                reply
            )));
        };
        let bucket = bucket_from_parts(message, image, reset_ms)?;

        Ok(match status {
            1 => Admission::Admitted(bucket),
            -2 => Admission::Rejected {
                kind: QuotaKind::Image,
                bucket,
            },
            _ => Admission::Rejected {
                kind: QuotaKind::Message,
                bucket,
            },
        })
    }

    async fn refund(
        &self,
        user_id: &str,
        with_image: bool,
        window_reset_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let refunded: i64 = self
            .refund
            .key(keys::quota_key(user_id))
            .arg(if with_image { "1" } else { "0" })
            .arg(window_reset_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if refunded == 0 {
            tracing::debug!("Skipping refund for {}: window already rolled", user_id);
        }
        Ok(())
    }

    async fn bucket(&self, user_id: &str) -> Result<Option<RateLimitBucket>, StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let vals: Vec<Option<i64>> = conn
            .hget(keys::quota_key(user_id), &["m", "i", "r"])
            .await?;

        match vals[..] {
            [Some(message), Some(image), Some(reset_ms)] => {
                Ok(Some(bucket_from_parts(message, image, reset_ms)?))
            }
            _ => Ok(None),
        }
    }
}
