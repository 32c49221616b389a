use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 订阅等级，按权限从低到高排序
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Ultra,
    Admin,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Pro, Tier::Ultra, Tier::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "FREE",
            Tier::Pro => "PRO",
            Tier::Ultra => "ULTRA",
            Tier::Admin => "ADMIN",
        }
    }

    /// 是否不受配额限制
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Tier::Admin)
    }

    /// 是否为付费等级（前端的 isPro 标志）
    pub fn is_paid(&self) -> bool {
        *self > Tier::Free
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(Tier::Free),
            "PRO" => Ok(Tier::Pro),
            "ULTRA" => Ok(Tier::Ultra),
            "ADMIN" => Ok(Tier::Admin),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// 单个等级在一个配额窗口内的上限，`None` 表示不限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub messages: Option<u32>,
    pub images: Option<u32>,
}

impl TierLimits {
    pub const UNLIMITED: TierLimits = TierLimits {
        messages: None,
        images: None,
    };

    pub fn new(messages: u32, images: u32) -> Self {
        Self {
            messages: Some(messages),
            images: Some(images),
        }
    }
}

/// 各等级配额表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaTable {
    pub free: TierLimits,
    pub pro: TierLimits,
    pub ultra: TierLimits,
}

impl QuotaTable {
    pub fn limits_for(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Ultra => self.ultra,
            Tier::Admin => TierLimits::UNLIMITED,
        }
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            free: TierLimits::new(15, 3),
            pro: TierLimits::new(100, 30),
            ultra: TierLimits::new(500, 100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("pro".parse::<Tier>(), Ok(Tier::Pro));
        assert_eq!(" Ultra ".parse::<Tier>(), Ok(Tier::Ultra));
        assert!("vip".parse::<Tier>().is_err());
    }

    #[test]
    fn unknown_tier_is_a_std_error() {
        let err: Box<dyn std::error::Error> = Box::new("vip".parse::<Tier>().unwrap_err());
        assert_eq!(err.to_string(), "unknown tier: vip");
    }

    #[test]
    fn ordering_follows_privilege() {
        assert!(Tier::Free < Tier::Pro);
        assert!(Tier::Ultra < Tier::Admin);
        assert!(Tier::Pro.is_paid());
        assert!(!Tier::Free.is_paid());
    }

    #[test]
    fn admin_is_unlimited() {
        let table = QuotaTable::default();
        assert_eq!(table.limits_for(Tier::Admin), TierLimits::UNLIMITED);
        assert_eq!(table.limits_for(Tier::Free).messages, Some(15));
    }
}
