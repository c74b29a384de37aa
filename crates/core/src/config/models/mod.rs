pub mod app_config;
pub mod autoscaler;
pub mod redis_queue;
pub mod worker_monitor;

pub use app_config::AppConfig;
pub use autoscaler::AutoscalerConfig;
pub use redis_queue::{QueueBackend, QueueConfig, RedisConfig};
pub use worker_monitor::{MonitorConfig, WorkerConfig};
