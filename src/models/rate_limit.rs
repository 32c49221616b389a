use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::tier::TierLimits;

/// 配额种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaKind {
    Message,
    Image,
}

/// 单个用户的限流计数窗口
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub message_count: u32,
    pub image_count: u32,
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitBucket {
    pub fn new(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            message_count: 0,
            image_count: 0,
            window_reset_at: now + window,
        }
    }

    /// 当前时间严格晚于窗口结束时清零并开启新窗口
    pub fn roll_window(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        if now > self.window_reset_at {
            self.message_count = 0;
            self.image_count = 0;
            self.window_reset_at = now + window;
            return true;
        }
        false
    }

    /// 检查配额；不修改计数
    pub fn check(&self, with_image: bool, limits: &TierLimits) -> Result<(), QuotaKind> {
        if with_image {
            if let Some(max) = limits.images {
                if self.image_count >= max {
                    return Err(QuotaKind::Image);
                }
            }
        }
        if let Some(max) = limits.messages {
            if self.message_count >= max {
                return Err(QuotaKind::Message);
            }
        }
        Ok(())
    }

    pub fn debit(&mut self, with_image: bool) {
        self.message_count = self.message_count.saturating_add(1);
        if with_image {
            self.image_count = self.image_count.saturating_add(1);
        }
    }

    pub fn refund(&mut self, with_image: bool) {
        self.message_count = self.message_count.saturating_sub(1);
        if with_image {
            self.image_count = self.image_count.saturating_sub(1);
        }
    }
}
