use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::queues;
use crate::models::{HealthStatus, TaskType};

/// Worker类型，决定实例注册哪些处理器、默认消费哪些队列
///
/// 无法识别的类型字符串按 `General` 处理（注册全部处理器）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerType {
    AiAnalysis,
    Notification,
    ConfigSync,
    #[default]
    #[serde(other)]
    General,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::AiAnalysis => "ai-analysis",
            WorkerType::Notification => "notification",
            WorkerType::ConfigSync => "config-sync",
            WorkerType::General => "general",
        }
    }

    /// 该类型默认消费的队列
    pub fn default_queues(&self) -> Vec<String> {
        let names: &[&str] = match self {
            WorkerType::AiAnalysis => &[queues::AI_ANALYSIS],
            WorkerType::Notification => &[queues::NOTIFICATION],
            WorkerType::ConfigSync => &[queues::CONFIG_SYNC],
            WorkerType::General => &queues::ALL,
        };
        names.iter().map(|q| q.to_string()).collect()
    }

    /// 该类型实例需要注册处理器的任务类型
    pub fn task_types(&self) -> Vec<TaskType> {
        match self {
            WorkerType::AiAnalysis => vec![TaskType::AiAnalysis],
            WorkerType::Notification => vec![TaskType::Notification],
            WorkerType::ConfigSync => vec![TaskType::ConfigSync],
            WorkerType::General => TaskType::ALL.to_vec(),
        }
    }
}

impl From<&str> for WorkerType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "ai-analysis" | "ai" => WorkerType::AiAnalysis,
            "notification" => WorkerType::Notification,
            "config-sync" => WorkerType::ConfigSync,
            _ => WorkerType::General,
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker实例配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(default)]
    pub worker_type: WorkerType,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 为空时使用Worker类型的默认队列
    #[serde(default)]
    pub queues: Vec<String>,
    /// 0 表示不启动健康检查端点
    #[serde(default)]
    pub health_port: u16,
}

fn default_concurrency() -> usize {
    2
}

impl InstanceConfig {
    pub fn new(name: impl Into<String>, worker_type: WorkerType) -> Self {
        Self {
            name: name.into(),
            worker_type,
            concurrency: default_concurrency(),
            queues: Vec::new(),
            health_port: 0,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }

    /// 实际消费的队列列表
    pub fn effective_queues(&self) -> Vec<String> {
        let explicit: Vec<String> = self
            .queues
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if explicit.is_empty() {
            self.worker_type.default_queues()
        } else {
            explicit
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("实例名称不能为空"));
        }
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("实例 {} 的并发数必须大于0", self.name));
        }
        Ok(())
    }
}

/// Worker实例状态
///
/// Created → Running → Stopping → Stopped，Stopped后可再次启动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn is_running(&self) -> bool {
        matches!(self, InstanceState::Running)
    }
}

/// 实例的滚动统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    /// 已出队的任务数
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
    /// 当前正在执行处理器的循环数
    pub busy_loops: usize,
    pub concurrency: usize,
    pub queue_depths: HashMap<String, u64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl WorkerStats {
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// 没有已出队但未结束的任务（尽力而为的判断）
    pub fn is_idle(&self) -> bool {
        self.processed == self.finished()
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let finished = self.finished();
        if finished == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / finished as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        let finished = self.finished();
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }

    /// CPU代理指标：忙碌循环数 / 并发数 × 100
    pub fn cpu_usage(&self) -> f64 {
        if self.concurrency == 0 {
            0.0
        } else {
            self.busy_loops as f64 / self.concurrency as f64 * 100.0
        }
    }

    pub fn total_queue_depth(&self) -> u64 {
        self.queue_depths.values().sum()
    }

    pub fn health(&self, error_rate_threshold: f64) -> HealthStatus {
        if self.error_rate() > error_rate_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// 自动扩缩容采集的实例指标样本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub instance_name: String,
    pub worker_type: WorkerType,
    pub cpu_usage: f64,
    pub memory_bytes: u64,
    pub tasks_per_second: f64,
    pub avg_latency_ms: f64,
    pub queue_depth: u64,
    pub error_rate: f64,
    pub processed: u64,
    pub collected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_worker_type_is_general() {
        assert_eq!(WorkerType::from("ai_analysis"), WorkerType::AiAnalysis);
        assert_eq!(WorkerType::from("something-else"), WorkerType::General);

        let parsed: WorkerType = serde_json::from_str("\"mystery\"").unwrap();
        assert_eq!(parsed, WorkerType::General);
        assert_eq!(WorkerType::General.task_types().len(), TaskType::ALL.len());
    }

    #[test]
    fn test_effective_queues_fall_back_to_type_defaults() {
        let config = InstanceConfig::new("n-1", WorkerType::Notification);
        assert_eq!(config.effective_queues(), vec!["notification".to_string()]);

        let config = config.with_queues(vec!["custom".to_string(), " ".to_string()]);
        assert_eq!(config.effective_queues(), vec!["custom".to_string()]);
    }

    #[test]
    fn test_stats_derivations() {
        let stats = WorkerStats {
            processed: 5,
            succeeded: 3,
            failed: 1,
            total_duration_ms: 400,
            busy_loops: 1,
            concurrency: 4,
            ..Default::default()
        };
        assert!(!stats.is_idle());
        assert_eq!(stats.avg_latency_ms(), 100.0);
        assert_eq!(stats.cpu_usage(), 25.0);
        assert_eq!(stats.error_rate(), 0.25);
    }
}
