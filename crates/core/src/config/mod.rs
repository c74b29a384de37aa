//! 配置管理
//!
//! 配置由默认值、TOML配置文件和 `TASKQ__` 前缀的环境变量三层合并而成，
//! 每个配置段都提供 `validate()`，在加载完成后统一校验。

pub mod models;

#[cfg(test)]
mod tests;

pub use models::{
    AppConfig, AutoscalerConfig, MonitorConfig, QueueBackend, QueueConfig, RedisConfig,
    WorkerConfig,
};
