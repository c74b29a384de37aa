//! 任务状态迁移规则
//!
//! Redis与内存两种存储后端共用同一套迁移规则，保证重试/死信决策一致。

use std::time::Duration;

use chrono::{DateTime, Utc};
use taskq_core::models::{Task, TaskResult, TaskStatus};
use taskq_core::traits::NackOutcome;

/// 延迟分区成员：`{priority}:{id}`，提升时无需加载任务记录即可计算就绪分值
pub(crate) fn delayed_member(task: &Task) -> String {
    format!("{}:{}", task.priority.ordinal(), task.id)
}

/// 出队：标记为处理中
pub(crate) fn mark_processing(task: &mut Task, now: DateTime<Utc>) {
    task.status = TaskStatus::Processing;
    task.started_at = Some(now);
    task.completed_at = None;
}

/// 确认：标记为完成
pub(crate) fn mark_completed(task: &Task, now: DateTime<Utc>) -> Task {
    let mut updated = task.clone();
    updated.status = TaskStatus::Completed;
    updated.completed_at = Some(now);
    updated.error = None;
    updated
}

/// Nack的迁移结果
pub(crate) struct NackResolution {
    pub task: Task,
    pub outcome: NackOutcome,
    /// 进入死信时需要持久化的失败结果
    pub dead_letter_result: Option<TaskResult>,
}

/// 重试或死信决策：`requeue` 且仍有剩余重试次数时按线性退避重新入队，否则进入死信
pub(crate) fn resolve_nack(
    task: &Task,
    requeue: bool,
    retry_delay: Duration,
    now: DateTime<Utc>,
) -> NackResolution {
    let mut updated = task.clone();

    if requeue && updated.can_retry() {
        updated.retry_count += 1;
        updated.status = TaskStatus::Retrying;
        let delay = updated.backoff(retry_delay);
        updated.scheduled_at = Some(now + chrono_duration(delay));
        updated.started_at = None;

        let outcome = NackOutcome::Retrying {
            retry_count: updated.retry_count,
            delay,
        };
        return NackResolution {
            task: updated,
            outcome,
            dead_letter_result: None,
        };
    }

    updated.status = TaskStatus::Failed;
    updated.completed_at = Some(now);
    let error = updated
        .error
        .clone()
        .unwrap_or_else(|| "任务重试次数已耗尽".to_string());
    let elapsed = updated
        .started_at
        .map(|started| (now - started).to_std().unwrap_or_default())
        .unwrap_or_default();
    let result = TaskResult::failure(&updated.id, error, elapsed, updated.worker_id.clone());

    NackResolution {
        task: updated,
        outcome: NackOutcome::DeadLettered,
        dead_letter_result: Some(result),
    }
}

pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
