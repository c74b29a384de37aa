use std::sync::Arc;

use chrono::Utc;
use taskq_core::config::MonitorConfig;
use taskq_core::traits::{NackOutcome, QueueStore};
use taskq_core::{Result, TaskQueueError};
use taskq_infrastructure::observability::TaskMetrics;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

const REAPED_ERROR: &str = "处理超时，任务被回收";

/// 一轮回收的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: usize,
    pub dead_lettered: usize,
    /// 任务记录已过期，仅从处理中分区移除
    pub dropped: usize,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.requeued + self.dead_lettered + self.dropped
    }
}

/// 处理中任务回收器
///
/// 扫描处理中分区里开始时间早于 `now - max_processing` 的任务，
/// 按与Nack相同的规则重试或进入死信。
pub struct Reaper {
    store: Arc<dyn QueueStore>,
    queues: Vec<String>,
    config: MonitorConfig,
    metrics: TaskMetrics,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn QueueStore>,
        queues: Vec<String>,
        config: MonitorConfig,
        metrics: TaskMetrics,
    ) -> Self {
        Self {
            store,
            queues,
            config,
            metrics,
        }
    }

    pub async fn reap_once(&self) -> Result<ReapReport> {
        let mut report = ReapReport::default();
        for queue in &self.queues {
            let queue_report = self.reap_queue(queue).await?;
            if queue_report.total() > 0 {
                self.metrics.record_reaped(queue, queue_report.total());
            }
            report.requeued += queue_report.requeued;
            report.dead_lettered += queue_report.dead_lettered;
            report.dropped += queue_report.dropped;
        }
        Ok(report)
    }

    async fn reap_queue(&self, queue: &str) -> Result<ReapReport> {
        let max_processing = chrono::Duration::from_std(self.config.max_processing())
            .map_err(|e| TaskQueueError::Configuration(e.to_string()))?;
        let started_before = Utc::now() - max_processing;

        let stale = self
            .store
            .list_stale_in_flight(queue, started_before, self.config.reap_batch_size)
            .await?;

        let mut report = ReapReport::default();
        for task_id in stale {
            let mut task = match self.store.get_task_status(&task_id).await {
                Ok(task) => task,
                Err(TaskQueueError::TaskNotFound { .. }) => {
                    if self.store.discard_in_flight(queue, &task_id).await? {
                        warn!(task_id = %task_id, queue, "处理中任务的记录已过期，直接移除");
                        report.dropped += 1;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            task.error = Some(REAPED_ERROR.to_string());
            let requeue = task.can_retry();
            match self.store.nack(&task, requeue).await? {
                NackOutcome::Retrying { retry_count, .. } => {
                    warn!(task_id = %task.id, queue, retry_count, "回收超时任务并重新入队");
                    report.requeued += 1;
                }
                NackOutcome::DeadLettered => {
                    warn!(task_id = %task.id, queue, "回收超时任务，重试次数已耗尽，进入死信");
                    report.dead_lettered += 1;
                }
                NackOutcome::Ignored => {
                    debug!(task_id = %task.id, queue, "任务已被确认，跳过回收");
                }
            }
        }
        Ok(report)
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.reap_interval());
        info!(queues = ?self.queues, "回收器启动");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reap_once().await {
                        Ok(report) if report.total() > 0 => {
                            info!(
                                requeued = report.requeued,
                                dead_lettered = report.dead_lettered,
                                dropped = report.dropped,
                                "回收完成"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("回收处理中任务失败: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("回收器退出");
                    break;
                }
            }
        }
    }
}
