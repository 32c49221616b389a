/// 缓存操作
/// 提供限流计数与用户数据的存储实现

pub mod quota;
pub mod user;
