//! Worker实例自动扩缩容
//!
//! 周期性采集实例指标，按Worker类型评估扩缩容策略，
//! 通过 [`taskq_worker::WorkerManager`] 创建或移除实例。

pub mod autoscaler;
pub mod collector;
pub mod policy;

pub use autoscaler::Autoscaler;
pub use collector::{process_memory_bytes, MetricsCollector};
pub use policy::{evaluate, TypeMetrics};
