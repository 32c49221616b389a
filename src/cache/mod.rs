// 缓存模块
// 限流窗口与用户数据的存储接口，内存实现用于开发和测试，Redis 实现用于生产

pub mod keys;
pub mod operations;

pub use operations::quota::{
    Admission, MemoryQuotaStore, QuotaRequest, QuotaStore, RedisQuotaStore,
};
pub use operations::user::{MemoryUserStore, RedisUserStore, UserStore};
