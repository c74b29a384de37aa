pub mod health;
pub mod monitor;
pub mod reaper;
pub mod worker_loop;

pub use health::{create_health_routes, HealthState};
pub use monitor::{HealthReport, QueueMonitor};
pub use reaper::{ReapReport, Reaper};
pub use worker_loop::{LoopSettings, LoopShared, WorkerLoop};
