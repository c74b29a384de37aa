//! Worker实例与实例管理
//!
//! 提供处理器注册表、消费循环、队列监控与回收器、健康检查端点，
//! 以及按名称管理多个实例的 [`WorkerManager`]。

pub mod components;
pub mod handlers;
pub mod instance;
pub mod manager;
pub mod registry;

pub use components::{HealthReport, QueueMonitor, ReapReport, Reaper};
pub use handlers::LoggingHandler;
pub use instance::WorkerInstance;
pub use manager::{ManagerStats, WorkerManager};
pub use registry::{HandlerCatalog, HandlerRegistry};
