use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker运行配置（所有实例共享）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 实例未指定时的并发循环数
    pub concurrency: usize,
    /// 所有队列都为空时的轮询间隔
    pub poll_interval_ms: u64,
    /// 单个任务的执行超时
    pub task_timeout_seconds: u64,
    /// 停止实例时等待循环退出的宽限期
    pub stop_grace_seconds: u64,
    pub stats_refresh_seconds: u64,
    pub health_port: u16,
    /// 大于0且实例只消费一个队列时使用阻塞消费
    pub blocking_consume_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval_ms: 500,
            task_timeout_seconds: 300,
            stop_grace_seconds: 30,
            stats_refresh_seconds: 10,
            health_port: 8081,
            blocking_consume_timeout_ms: 0,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("Worker并发数必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.task_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.stats_refresh_seconds == 0 {
            return Err(anyhow::anyhow!("统计刷新间隔必须大于0"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn stats_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.stats_refresh_seconds)
    }

    pub fn blocking_consume_timeout(&self) -> Option<Duration> {
        (self.blocking_consume_timeout_ms > 0)
            .then(|| Duration::from_millis(self.blocking_consume_timeout_ms))
    }
}

/// 监控与回收配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub reaper_enabled: bool,
    pub reap_interval_seconds: u64,
    /// 处理中任务超过该时长未确认即视为被遗弃
    pub max_processing_seconds: u64,
    pub reap_batch_size: usize,
    /// 就绪积压超过该值时队列降级
    pub pending_threshold: u64,
    /// 错误率超过该值时队列降级
    pub error_rate_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reaper_enabled: true,
            reap_interval_seconds: 30,
            max_processing_seconds: 600,
            reap_batch_size: 100,
            pending_threshold: 1_000,
            error_rate_threshold: 0.2,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reap_interval_seconds == 0 {
            return Err(anyhow::anyhow!("回收扫描间隔必须大于0"));
        }

        if self.max_processing_seconds == 0 {
            return Err(anyhow::anyhow!("最大处理时长必须大于0"));
        }

        if self.reap_batch_size == 0 {
            return Err(anyhow::anyhow!("回收批量必须大于0"));
        }

        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(anyhow::anyhow!(
                "错误率阈值必须在0到1之间: {}",
                self.error_rate_threshold
            ));
        }

        Ok(())
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }

    pub fn max_processing(&self) -> Duration {
        Duration::from_secs(self.max_processing_seconds)
    }
}
