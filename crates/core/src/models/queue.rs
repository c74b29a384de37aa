use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 队列统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    /// 就绪分区中的任务数
    pub pending: u64,
    /// 延迟分区中的任务数
    pub delayed: u64,
    /// 处理中分区中的任务数
    pub processing: u64,
    /// 累计完成数
    pub completed: u64,
    /// 累计失败（进入死信）数
    pub failed: u64,
    /// 死信分区中的任务数
    pub dead_letter: u64,
}

impl QueueStats {
    pub fn empty(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// 错误率 = failed / (completed + failed)，无数据时为0
    pub fn error_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }

    /// 尚未完成的积压量（就绪 + 延迟）
    pub fn backlog(&self) -> u64 {
        self.pending + self.delayed
    }
}

/// 健康状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// 合并两个状态，取较差者
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// 单个队列的健康快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    pub queue: String,
    pub status: HealthStatus,
    pub stats: Option<QueueStats>,
    /// 每分钟完成的任务数（由相邻两次采样计算）
    pub throughput_per_minute: f64,
    pub error_rate: f64,
    pub avg_duration_ms: f64,
    pub reason: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate() {
        let mut stats = QueueStats::empty("default");
        assert_eq!(stats.error_rate(), 0.0);

        stats.completed = 3;
        stats.failed = 1;
        assert!((stats.error_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_health_status_worst() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
    }
}
