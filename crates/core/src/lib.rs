//! 任务队列核心库
//!
//! 定义任务模型、队列存储与处理器接口、统一错误类型以及配置模型，
//! 供存储实现、Worker和自动扩缩容器共同依赖。

pub mod config;
pub mod constants;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::{Result, TaskQueueError};
