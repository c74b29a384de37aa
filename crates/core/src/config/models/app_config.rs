use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    autoscaler::AutoscalerConfig,
    redis_queue::{QueueConfig, RedisConfig},
    worker_monitor::{MonitorConfig, WorkerConfig},
};
use crate::models::InstanceConfig;

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub monitor: MonitorConfig,
    pub autoscaler: AutoscalerConfig,
    /// 进程启动时创建的初始实例
    pub instances: Vec<InstanceConfig>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认值
    /// 2. 配置文件（TOML）
    /// 3. 环境变量覆盖（前缀 `TASKQ__`，层级分隔符 `__`，如 `TASKQ__WORKER__CONCURRENCY`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/taskq.toml", "taskq.toml", "/etc/taskq/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 校验配置有效性
    pub fn validate(&self) -> Result<()> {
        self.redis.validate().context("Redis配置验证失败")?;
        self.queue.validate().context("队列配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.monitor.validate().context("监控配置验证失败")?;
        self.autoscaler
            .validate()
            .context("自动扩缩容配置验证失败")?;

        // 回收阈值不大于任务超时时，仍在执行的任务会被重新入队并被第二个消费者取走
        if self.monitor.reaper_enabled
            && self.monitor.max_processing_seconds <= self.worker.task_timeout_seconds
        {
            return Err(anyhow::anyhow!(
                "monitor.max_processing_seconds ({}) 必须大于 worker.task_timeout_seconds ({})",
                self.monitor.max_processing_seconds,
                self.worker.task_timeout_seconds
            ));
        }

        let mut names = HashSet::new();
        for instance in &self.instances {
            instance.validate().context("实例配置验证失败")?;
            if !names.insert(instance.name.as_str()) {
                return Err(anyhow::anyhow!("实例名称重复: {}", instance.name));
            }
        }

        Ok(())
    }
}
