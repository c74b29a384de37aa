//! Redis任务队列实现
//!
//! 每个队列对应四个有序集合分区，任务与结果记录以JSON字符串保存并带TTL。

pub mod keys;
pub mod scripts;
pub mod store;

pub use keys::{KeySpace, QueueKeys};
pub use store::RedisTaskQueue;
