pub mod queue_store;
pub mod task_handler;

pub use queue_store::{NackOutcome, QueueStore};
pub use task_handler::{TaskContext, TaskHandler};
