use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_RETRY, DEFAULT_RECORD_TTL_SECONDS};

/// 队列存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    Redis,
    Memory,
}

/// Redis连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 5,
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }

        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Redis连接超时时间必须大于0"));
        }

        Ok(())
    }

    /// 构建Redis连接URL
    pub fn build_url(&self) -> String {
        let auth = match &self.password {
            Some(password) if !password.is_empty() => format!(":{password}@"),
            _ => String::new(),
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

/// 队列行为配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis键前缀
    pub key_prefix: String,
    /// 生产者未指定时使用的最大重试次数
    pub default_max_retry: u32,
    /// 线性退避的基础延迟
    pub retry_delay_ms: u64,
    /// 任务与结果记录的保留时间
    pub record_ttl_seconds: u64,
    /// 每次消费最多提升的到期延迟任务数
    pub promote_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            key_prefix: "taskq".to_string(),
            default_max_retry: DEFAULT_MAX_RETRY,
            retry_delay_ms: 5_000,
            record_ttl_seconds: DEFAULT_RECORD_TTL_SECONDS,
            promote_batch_size: 100,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.key_prefix.trim().is_empty() {
            return Err(anyhow::anyhow!("队列键前缀不能为空"));
        }
        if self.record_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("记录保留时间必须大于0"));
        }
        if self.promote_batch_size == 0 {
            return Err(anyhow::anyhow!("延迟任务提升批量必须大于0"));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_seconds)
    }
}
