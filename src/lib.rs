pub mod app;
pub mod common;
pub mod shutdown;

pub use app::{AppMode, Application};
pub use shutdown::ShutdownManager;
