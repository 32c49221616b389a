use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tier::Tier;

/// 用户订阅记录，首次访问时创建，永不删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub tier: Tier,
    pub tier_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            tier: Tier::Free,
            tier_expires_at: None,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.tier_expires_at, Some(expiry) if now > expiry)
    }

    /// 过期检查：过期后降级为 FREE，返回是否发生了变更
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.tier != Tier::Free && self.is_expired(now) {
            tracing::info!(
                "Tier {} for user {} expired, downgrading to FREE",
                self.tier,
                self.user_id
            );
            self.tier = Tier::Free;
            self.tier_expires_at = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expired_tier_downgrades_to_free() {
        let now = Utc::now();
        let mut record = UserRecord::new("u1", now);
        record.tier = Tier::Pro;
        record.tier_expires_at = Some(now + Duration::days(1));

        assert!(!record.expire_if_due(now));
        assert_eq!(record.tier, Tier::Pro);

        assert!(record.expire_if_due(now + Duration::days(2)));
        assert_eq!(record.tier, Tier::Free);
        assert_eq!(record.tier_expires_at, None);
    }

    #[test]
    fn tier_without_expiry_never_expires() {
        let now = Utc::now();
        let mut record = UserRecord::new("u1", now);
        record.tier = Tier::Ultra;
        assert!(!record.expire_if_due(now + Duration::days(3650)));
    }
}
