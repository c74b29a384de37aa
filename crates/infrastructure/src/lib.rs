//! 任务队列基础设施
//!
//! Redis与内存两种队列存储实现、存储工厂、任务生产者以及Prometheus指标。

pub mod in_memory_queue;
pub mod observability;
pub mod producer;
pub mod queue_store_factory;
pub mod redis_queue;
mod task_transitions;

pub use in_memory_queue::InMemoryTaskQueue;
pub use producer::{
    AiAnalysisRequest, AlertIngestRequest, ConfigSyncRequest, NotificationRequest, TaskProducer,
};
pub use queue_store_factory::QueueStoreFactory;
pub use redis_queue::RedisTaskQueue;
