//! 任务队列指标
//!
//! 通过 `metrics` 宏记录任务结果、延迟与队列深度，
//! 由进程内唯一的Prometheus记录器导出。

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use taskq_core::models::TaskType;
use taskq_core::{Result, TaskQueueError};
use tracing::info;

static PROMETHEUS: OnceLock<std::result::Result<PrometheusHandle, String>> = OnceLock::new();

/// 安装Prometheus记录器（每个进程只安装一次），返回用于渲染 `/metrics` 的句柄
pub fn init_metrics() -> Result<PrometheusHandle> {
    PROMETHEUS
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| format!("安装Prometheus指标记录器失败: {e}"))?;
            info!("Prometheus metrics recorder installed");
            Ok(handle)
        })
        .clone()
        .map_err(TaskQueueError::Internal)
}

/// 单个Worker实例的任务指标
#[derive(Debug, Clone)]
pub struct TaskMetrics {
    instance: String,
}

impl TaskMetrics {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn record_dequeued(&self, queue: &str, task_type: TaskType) {
        counter!(
            "taskq_tasks_processed_total",
            "instance" => self.instance.clone(),
            "queue" => queue.to_string(),
            "task_type" => task_type.as_str()
        )
        .increment(1);
    }

    pub fn record_succeeded(&self, queue: &str, task_type: TaskType, duration: Duration) {
        counter!(
            "taskq_tasks_succeeded_total",
            "instance" => self.instance.clone(),
            "queue" => queue.to_string(),
            "task_type" => task_type.as_str()
        )
        .increment(1);
        histogram!(
            "taskq_task_duration_seconds",
            "instance" => self.instance.clone(),
            "task_type" => task_type.as_str()
        )
        .record(duration.as_secs_f64());
    }

    /// `outcome` 为 `retrying`、`dead_letter` 或 `ignored`
    pub fn record_failed(&self, queue: &str, task_type: TaskType, outcome: &'static str) {
        counter!(
            "taskq_tasks_failed_total",
            "instance" => self.instance.clone(),
            "queue" => queue.to_string(),
            "task_type" => task_type.as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn record_missing_handler(&self, task_type: TaskType) {
        counter!(
            "taskq_missing_handler_total",
            "instance" => self.instance.clone(),
            "task_type" => task_type.as_str()
        )
        .increment(1);
    }

    pub fn record_reaped(&self, queue: &str, count: usize) {
        counter!(
            "taskq_tasks_reaped_total",
            "instance" => self.instance.clone(),
            "queue" => queue.to_string()
        )
        .increment(count as u64);
    }

    pub fn set_queue_depth(&self, queue: &str, depth: u64) {
        gauge!("taskq_queue_depth", "queue" => queue.to_string()).set(depth as f64);
    }

    pub fn set_avg_latency(&self, avg_ms: f64) {
        gauge!("taskq_task_avg_latency_ms", "instance" => self.instance.clone()).set(avg_ms);
    }

    pub fn set_busy_loops(&self, busy: usize) {
        gauge!("taskq_busy_loops", "instance" => self.instance.clone()).set(busy as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics().unwrap();
        let second = init_metrics().unwrap();

        let metrics = TaskMetrics::new("metrics-test");
        metrics.record_dequeued("default", TaskType::Notification);
        metrics.set_queue_depth("default", 7);

        let rendered = second.render();
        assert!(rendered.contains("taskq_tasks_processed_total"));
        assert!(rendered.contains("taskq_queue_depth"));
        drop(first);
    }
}
