use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskq_core::config::MonitorConfig;
use taskq_core::models::{HealthStatus, QueueHealth, QueueStats, WorkerStats};
use taskq_core::traits::QueueStore;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// 上一次采样时各队列已结束的任务数，用于计算吞吐量
#[derive(Debug, Clone, Copy)]
struct Sample {
    finished: u64,
    at: DateTime<Utc>,
}

/// 实例的综合健康快照
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub queues: Vec<QueueHealth>,
    pub checked_at: DateTime<Utc>,
}

/// 队列监控器
pub struct QueueMonitor {
    store: Arc<dyn QueueStore>,
    queues: Vec<String>,
    config: MonitorConfig,
    stats: Arc<RwLock<WorkerStats>>,
    samples: Mutex<HashMap<String, Sample>>,
}

impl QueueMonitor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        queues: Vec<String>,
        config: MonitorConfig,
        stats: Arc<RwLock<WorkerStats>>,
    ) -> Self {
        Self {
            store,
            queues,
            config,
            stats,
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// 检查单个队列：统计不可读为unhealthy，积压或错误率超阈值为degraded
    pub async fn check_queue(&self, queue: &str) -> QueueHealth {
        let now = Utc::now();
        let avg_duration_ms = self.stats.read().await.avg_latency_ms();

        let stats = match self.store.get_queue_stats(queue).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(queue, "读取队列统计失败: {}", e);
                return QueueHealth {
                    queue: queue.to_string(),
                    status: HealthStatus::Unhealthy,
                    stats: None,
                    throughput_per_minute: 0.0,
                    error_rate: 0.0,
                    avg_duration_ms,
                    reason: Some(format!("队列统计不可读: {e}")),
                    checked_at: now,
                };
            }
        };

        let throughput_per_minute = self.throughput(&stats, now).await;
        let error_rate = stats.error_rate();

        let mut status = HealthStatus::Healthy;
        let mut reasons = Vec::new();
        if stats.pending > self.config.pending_threshold {
            status = HealthStatus::Degraded;
            reasons.push(format!(
                "积压 {} 超过阈值 {}",
                stats.pending, self.config.pending_threshold
            ));
        }
        if error_rate > self.config.error_rate_threshold {
            status = HealthStatus::Degraded;
            reasons.push(format!(
                "错误率 {:.2} 超过阈值 {:.2}",
                error_rate, self.config.error_rate_threshold
            ));
        }

        debug!(queue, status = status.as_str(), pending = stats.pending, "队列健康检查");

        QueueHealth {
            queue: queue.to_string(),
            status,
            stats: Some(stats),
            throughput_per_minute,
            error_rate,
            avg_duration_ms,
            reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
            checked_at: now,
        }
    }

    /// 检查实例的全部队列，综合状态取最差者
    pub async fn check_all(&self) -> HealthReport {
        let mut queues = Vec::with_capacity(self.queues.len());
        let mut status = HealthStatus::Healthy;
        for queue in &self.queues {
            let health = self.check_queue(queue).await;
            status = status.worst(health.status);
            queues.push(health);
        }

        HealthReport {
            status,
            queues,
            checked_at: Utc::now(),
        }
    }

    async fn throughput(&self, stats: &QueueStats, now: DateTime<Utc>) -> f64 {
        let finished = stats.completed + stats.failed;
        let mut samples = self.samples.lock().await;
        let previous = samples.insert(stats.queue.clone(), Sample { finished, at: now });

        match previous {
            Some(prev) => {
                let minutes = (now - prev.at).num_milliseconds() as f64 / 60_000.0;
                if minutes <= 0.0 {
                    0.0
                } else {
                    finished.saturating_sub(prev.finished) as f64 / minutes
                }
            }
            None => 0.0,
        }
    }
}
