pub mod chat;
pub mod rate_limit;
pub mod tier;
pub mod user;

pub use chat::{ChatExchange, Conversation};
pub use rate_limit::{QuotaKind, RateLimitBucket};
pub use tier::{QuotaTable, Tier, TierLimits, UnknownTier};
pub use user::UserRecord;
