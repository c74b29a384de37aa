use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskq_core::config::QueueConfig;
use taskq_core::models::{QueueStats, Task, TaskResult};
use taskq_core::traits::{NackOutcome, QueueStore};
use taskq_core::{Result, TaskQueueError};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::task_transitions::{
    chrono_duration, mark_completed, mark_processing, resolve_nack,
};

/// 内存任务队列实现
///
/// 与Redis实现相同的四分区模型，所有分区保存在一把异步互斥锁之后，
/// 适用于嵌入式部署和测试。阻塞消费通过 `Notify` 唤醒。
#[derive(Debug)]
pub struct InMemoryTaskQueue {
    state: Mutex<StoreState>,
    notify: Notify,
    config: QueueConfig,
}

#[derive(Debug, Default)]
struct StoreState {
    queues: HashMap<String, QueuePartitions>,
    records: HashMap<String, Expiring<Task>>,
    results: HashMap<String, Expiring<TaskResult>>,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueuePartitions {
    /// (优先级降序, 序号升序) -> 任务ID
    ready: BTreeMap<(Reverse<u8>, u64), String>,
    /// (可消费时间, 序号) -> 任务
    delayed: BTreeMap<(i64, u64), DelayedEntry>,
    /// 任务ID -> 开始处理时间
    processing: HashMap<String, DateTime<Utc>>,
    /// (进入死信时间, 序号) -> 任务ID
    dead: BTreeMap<(i64, u64), String>,
    completed: u64,
    failed: u64,
}

#[derive(Debug)]
struct DelayedEntry {
    id: String,
    priority: u8,
}

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl StoreState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn partitions(&mut self, queue: &str) -> &mut QueuePartitions {
        self.queues.entry(queue.to_string()).or_default()
    }

    fn record(&self, id: &str, now: DateTime<Utc>) -> Option<&Task> {
        self.records
            .get(id)
            .filter(|r| r.expires_at > now)
            .map(|r| &r.value)
    }

    /// 更新记录内容，保留原有的过期时间
    fn update_record(&mut self, task: Task, ttl: Duration, now: DateTime<Utc>) {
        let expires_at = self
            .records
            .get(&task.id)
            .map(|r| r.expires_at)
            .unwrap_or_else(|| now + chrono_duration(ttl));
        self.records.insert(
            task.id.clone(),
            Expiring {
                value: task,
                expires_at,
            },
        );
    }

    fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len() + self.results.len();
        self.records.retain(|_, r| r.expires_at > now);
        self.results.retain(|_, r| r.expires_at > now);
        before - (self.records.len() + self.results.len())
    }

    /// 将到期的延迟任务移入就绪分区
    fn promote_due(&mut self, queue: &str, now: DateTime<Utc>, batch: usize) -> usize {
        let now_ms = now.timestamp_millis();
        let due: Vec<(i64, u64)> = match self.queues.get(queue) {
            Some(partitions) => partitions
                .delayed
                .range(..=(now_ms, u64::MAX))
                .take(batch)
                .map(|(k, _)| *k)
                .collect(),
            None => return 0,
        };

        let mut promoted = 0;
        for key in due {
            let seq = self.next_seq();
            let partitions = self.partitions(queue);
            if let Some(entry) = partitions.delayed.remove(&key) {
                partitions
                    .ready
                    .insert((Reverse(entry.priority), seq), entry.id);
                promoted += 1;
            }
        }
        promoted
    }

    fn next_delayed_at(&self, queue: &str) -> Option<i64> {
        self.queues
            .get(queue)
            .and_then(|p| p.delayed.keys().next().map(|(ms, _)| *ms))
    }
}

impl InMemoryTaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        info!(
            "Creating in-memory task queue (retry_delay={:?}, record_ttl={:?})",
            config.retry_delay(),
            config.record_ttl()
        );
        Self {
            state: Mutex::new(StoreState::default()),
            notify: Notify::new(),
            config,
        }
    }

    /// 清理过期的任务与结果记录，返回清理数量
    pub async fn prune_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        state.prune_expired(Utc::now())
    }

    async fn insert(&self, queue: &str, mut task: Task, delay: Option<Duration>) -> Result<Task> {
        let now = Utc::now();
        task.prepare_for_publish(queue, self.config.default_max_retry);

        let mut state = self.state.lock().await;
        state.prune_expired(now);
        if state.records.contains_key(&task.id) {
            return Err(TaskQueueError::DuplicateTask { id: task.id });
        }

        let seq = state.next_seq();
        let priority = task.priority.ordinal();
        match delay {
            Some(delay) => {
                let scheduled_at = now + chrono_duration(delay);
                task.scheduled_at = Some(scheduled_at);
                state.partitions(queue).delayed.insert(
                    (scheduled_at.timestamp_millis(), seq),
                    DelayedEntry {
                        id: task.id.clone(),
                        priority,
                    },
                );
            }
            None => {
                state
                    .partitions(queue)
                    .ready
                    .insert((Reverse(priority), seq), task.id.clone());
            }
        }
        state.update_record(task.clone(), self.config.record_ttl(), now);
        drop(state);

        self.notify.notify_waiters();
        debug!(task_id = %task.id, queue, "任务已发布到内存队列");
        Ok(task)
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl QueueStore for InMemoryTaskQueue {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, queue: &str, task: Task) -> Result<Task> {
        self.insert(queue, task, None).await
    }

    async fn publish_delayed(&self, queue: &str, task: Task, delay: Duration) -> Result<Task> {
        self.insert(queue, task, Some(delay)).await
    }

    async fn consume(&self, queue: &str) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.promote_due(queue, now, self.config.promote_batch_size);

        loop {
            let id = match state.partitions(queue).ready.pop_first() {
                Some((_, id)) => id,
                None => return Ok(None),
            };

            let Some(mut task) = state.record(&id, now).cloned() else {
                warn!(task_id = %id, queue, "就绪任务的记录已过期，丢弃");
                continue;
            };

            mark_processing(&mut task, now);
            state
                .partitions(queue)
                .processing
                .insert(task.id.clone(), now);
            state.update_record(task.clone(), self.config.record_ttl(), now);
            return Ok(Some(task));
        }
    }

    async fn consume_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<Task>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.consume(queue).await? {
                return Ok(Some(task));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            // 最早的延迟任务到期时也需要醒来
            let mut wait = deadline - now;
            if let Some(next_ms) = self.state.lock().await.next_delayed_at(queue) {
                let until_due = (next_ms - Utc::now().timestamp_millis()).max(0) as u64;
                wait = wait.min(Duration::from_millis(until_due));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn ack(&self, task: &Task, result: &TaskResult) -> Result<bool> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let partitions = state.partitions(&task.queue);
        if partitions.processing.remove(&task.id).is_none() {
            debug!(task_id = %task.id, "任务不在处理中分区，忽略重复确认");
            return Ok(false);
        }
        partitions.completed += 1;

        state.update_record(mark_completed(task, now), self.config.record_ttl(), now);
        state.results.insert(
            task.id.clone(),
            Expiring {
                value: result.clone(),
                expires_at: now + chrono_duration(self.config.record_ttl()),
            },
        );
        Ok(true)
    }

    async fn nack(&self, task: &Task, requeue: bool) -> Result<NackOutcome> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        if state
            .partitions(&task.queue)
            .processing
            .remove(&task.id)
            .is_none()
        {
            debug!(task_id = %task.id, "任务不在处理中分区，忽略重复拒绝");
            return Ok(NackOutcome::Ignored);
        }

        let resolution = resolve_nack(task, requeue, self.config.retry_delay(), now);
        let seq = state.next_seq();
        match resolution.outcome {
            NackOutcome::Retrying { .. } => {
                let scheduled_ms = resolution
                    .task
                    .scheduled_at
                    .map(|at| at.timestamp_millis())
                    .unwrap_or_else(|| now.timestamp_millis());
                state.partitions(&task.queue).delayed.insert(
                    (scheduled_ms, seq),
                    DelayedEntry {
                        id: task.id.clone(),
                        priority: task.priority.ordinal(),
                    },
                );
            }
            _ => {
                let partitions = state.partitions(&task.queue);
                partitions
                    .dead
                    .insert((now.timestamp_millis(), seq), task.id.clone());
                partitions.failed += 1;
                if let Some(result) = resolution.dead_letter_result {
                    state.results.insert(
                        task.id.clone(),
                        Expiring {
                            value: result,
                            expires_at: now + chrono_duration(self.config.record_ttl()),
                        },
                    );
                }
            }
        }
        state.update_record(resolution.task, self.config.record_ttl(), now);
        drop(state);

        self.notify.notify_waiters();
        Ok(resolution.outcome)
    }

    async fn get_queue_stats(&self, queue: &str) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let Some(p) = state.queues.get(queue) else {
            return Ok(QueueStats::empty(queue));
        };
        Ok(QueueStats {
            queue: queue.to_string(),
            pending: p.ready.len() as u64,
            delayed: p.delayed.len() as u64,
            processing: p.processing.len() as u64,
            completed: p.completed,
            failed: p.failed,
            dead_letter: p.dead.len() as u64,
        })
    }

    async fn get_task_status(&self, task_id: &str) -> Result<Task> {
        let state = self.state.lock().await;
        state
            .record(task_id, Utc::now())
            .cloned()
            .ok_or_else(|| TaskQueueError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    async fn get_task_result(&self, task_id: &str) -> Result<Option<TaskResult>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        Ok(state
            .results
            .get(task_id)
            .filter(|r| r.expires_at > now)
            .map(|r| r.value.clone()))
    }

    async fn list_stale_in_flight(
        &self,
        queue: &str,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let Some(p) = state.queues.get(queue) else {
            return Ok(Vec::new());
        };
        let mut stale: Vec<(&DateTime<Utc>, &String)> = p
            .processing
            .iter()
            .filter(|(_, started)| **started <= started_before)
            .map(|(id, started)| (started, id))
            .collect();
        stale.sort();
        Ok(stale
            .into_iter()
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn discard_in_flight(&self, queue: &str, task_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.partitions(queue).processing.remove(task_id).is_some())
    }

    async fn list_dead_letter(&self, queue: &str, limit: usize) -> Result<Vec<Task>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        let Some(p) = state.queues.get(queue) else {
            return Ok(Vec::new());
        };
        Ok(p.dead
            .values()
            .rev()
            .filter_map(|id| state.record(id, now).cloned())
            .take(limit)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskq_core::models::{TaskPayload, TaskPriority, TaskStatus, TaskType};

    fn store() -> InMemoryTaskQueue {
        InMemoryTaskQueue::new(QueueConfig {
            retry_delay_ms: 20,
            ..QueueConfig::default()
        })
    }

    fn task(priority: TaskPriority) -> Task {
        Task::new(TaskType::AiAnalysis, TaskPayload::new()).with_priority(priority)
    }

    #[tokio::test]
    async fn test_consume_orders_by_priority_then_publish_order() {
        let store = store();
        let low = store.publish("q", task(TaskPriority::Low)).await.unwrap();
        let first_normal = store.publish("q", task(TaskPriority::Normal)).await.unwrap();
        let second_normal = store.publish("q", task(TaskPriority::Normal)).await.unwrap();
        let critical = store.publish("q", task(TaskPriority::Critical)).await.unwrap();

        let order: Vec<String> = [
            store.consume("q").await.unwrap().unwrap(),
            store.consume("q").await.unwrap().unwrap(),
            store.consume("q").await.unwrap().unwrap(),
            store.consume("q").await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|t| t.id)
        .collect();

        assert_eq!(order, vec![critical.id, first_normal.id, second_normal.id, low.id]);
        assert!(store.consume("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consume_marks_processing() {
        let store = store();
        let published = store.publish("q", task(TaskPriority::High)).await.unwrap();
        let consumed = store.consume("q").await.unwrap().unwrap();

        assert_eq!(consumed.id, published.id);
        assert_eq!(consumed.status, TaskStatus::Processing);
        assert!(consumed.started_at.is_some());

        let stats = store.get_queue_stats("q").await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = store();
        store
            .publish("q", task(TaskPriority::Low).with_id("same"))
            .await
            .unwrap();
        let err = store
            .publish("q", task(TaskPriority::Low).with_id("same"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskQueueError::DuplicateTask { .. }));
    }

    #[tokio::test]
    async fn test_delayed_task_not_consumable_before_schedule() {
        let store = store();
        store
            .publish_delayed("q", task(TaskPriority::Critical), Duration::from_millis(80))
            .await
            .unwrap();

        assert!(store.consume("q").await.unwrap().is_none());
        assert_eq!(store.get_queue_stats("q").await.unwrap().delayed, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let task = store.consume("q").await.unwrap().unwrap();
        assert!(task.scheduled_at.unwrap() <= Utc::now());
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let store = store();
        store.publish("q", task(TaskPriority::Normal)).await.unwrap();
        let consumed = store.consume("q").await.unwrap().unwrap();
        let result = TaskResult::success(&consumed.id, TaskPayload::new(), Duration::from_millis(5), None);

        assert!(store.ack(&consumed, &result).await.unwrap());
        assert!(!store.ack(&consumed, &result).await.unwrap());

        let stored = store.get_task_status(&consumed.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        let stats = store.get_queue_stats("q").await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
        assert!(store.get_task_result(&consumed.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_nack_requeues_until_dead_letter() {
        let store = store();
        store
            .publish("q", task(TaskPriority::Normal).with_max_retry(1))
            .await
            .unwrap();

        let first = store.consume("q").await.unwrap().unwrap();
        let outcome = store.nack(&first, true).await.unwrap();
        assert!(matches!(outcome, NackOutcome::Retrying { retry_count: 1, .. }));
        assert_eq!(
            store.get_task_status(&first.id).await.unwrap().status,
            TaskStatus::Retrying
        );

        let second = store
            .consume_blocking("q", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.retry_count, 1);
        assert_eq!(store.nack(&second, true).await.unwrap(), NackOutcome::DeadLettered);
        assert_eq!(store.nack(&second, true).await.unwrap(), NackOutcome::Ignored);

        let dead = store.list_dead_letter("q", 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].status, TaskStatus::Failed);
        let stats = store.get_queue_stats("q").await.unwrap();
        assert_eq!(stats.dead_letter, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_consume_blocking_wakes_on_publish() {
        let store = std::sync::Arc::new(store());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.consume_blocking("q", Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.publish("q", task(TaskPriority::Low)).await.unwrap();

        let consumed = waiter.await.unwrap().unwrap();
        assert!(consumed.is_some());
    }

    #[tokio::test]
    async fn test_consume_blocking_times_out() {
        let store = store();
        let start = std::time::Instant::now();
        let result = store
            .consume_blocking("q", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_stale_in_flight_listing() {
        let store = store();
        let published = store.publish("q", task(TaskPriority::Normal)).await.unwrap();
        store.consume("q").await.unwrap().unwrap();

        let none = store
            .list_stale_in_flight("q", Utc::now() - chrono::Duration::seconds(60), 10)
            .await
            .unwrap();
        assert!(none.is_empty());

        let stale = store
            .list_stale_in_flight("q", Utc::now() + chrono::Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(stale, vec![published.id.clone()]);

        assert!(store.discard_in_flight("q", &published.id).await.unwrap());
        assert!(!store.discard_in_flight("q", &published.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_never_share_a_task() {
        let store = std::sync::Arc::new(store());
        let mut published = std::collections::HashSet::new();
        for i in 0..200 {
            let priority = TaskPriority::try_from((i % 4) as u8).unwrap();
            published.insert(store.publish("q", task(priority)).await.unwrap().id);
        }

        let consumers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(task) = store.consume("q").await.unwrap() {
                        seen.push(task.id);
                        tokio::task::yield_now().await;
                    }
                    seen
                })
            })
            .collect();

        let mut consumed = Vec::new();
        for handle in consumers {
            consumed.extend(handle.await.unwrap());
        }

        assert_eq!(consumed.len(), published.len());
        let unique: std::collections::HashSet<_> = consumed.into_iter().collect();
        assert_eq!(unique, published);
        assert_eq!(store.get_queue_stats("q").await.unwrap().processing, 200);
    }

    #[tokio::test]
    async fn test_publish_applies_configured_default_max_retry() {
        let store = InMemoryTaskQueue::new(QueueConfig {
            default_max_retry: 1,
            ..QueueConfig::default()
        });
        let defaulted = store.publish("q", task(TaskPriority::Normal)).await.unwrap();
        assert_eq!(defaulted.max_retry, Some(1));

        let explicit = store
            .publish("q", task(TaskPriority::Normal).with_max_retry(5))
            .await
            .unwrap();
        assert_eq!(explicit.max_retry, Some(5));

        let consumed = store.consume("q").await.unwrap().unwrap();
        assert_eq!(consumed.id, defaulted.id);
        assert!(matches!(
            store.nack(&consumed, true).await.unwrap(),
            NackOutcome::Retrying { retry_count: 1, .. }
        ));
        assert!(!store.get_task_status(&consumed.id).await.unwrap().can_retry());
    }
}
