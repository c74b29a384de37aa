pub mod queue;
pub mod scaling;
pub mod task;
pub mod worker;

pub use queue::{HealthStatus, QueueHealth, QueueStats};
pub use scaling::{ScalingAction, ScalingDecision, ScalingEvent, ScalingPolicy};
pub use task::{Task, TaskPayload, TaskPriority, TaskResult, TaskStatus, TaskType};
pub use worker::{InstanceConfig, InstanceState, WorkerMetrics, WorkerStats, WorkerType};
