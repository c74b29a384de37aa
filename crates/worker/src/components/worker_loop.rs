use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskq_core::models::{Task, TaskPayload, TaskResult, WorkerStats};
use taskq_core::traits::{NackOutcome, QueueStore, TaskContext};
use taskq_core::{Result, TaskQueueError};
use taskq_infrastructure::observability::TaskMetrics;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::registry::HandlerRegistry;

/// 消费循环的运行参数
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub task_timeout: Duration,
    /// 仅在实例只消费一个队列时生效
    pub blocking_timeout: Option<Duration>,
}

/// 同一实例的所有消费循环共享的依赖
pub struct LoopShared {
    pub instance_name: String,
    pub queues: Vec<String>,
    pub store: Arc<dyn QueueStore>,
    pub registry: Arc<HandlerRegistry>,
    pub stats: Arc<RwLock<WorkerStats>>,
    pub metrics: TaskMetrics,
    pub settings: LoopSettings,
}

/// 单个消费循环
///
/// 依次轮询实例的各个队列，取到任务后交给对应处理器执行；
/// 所有队列都为空时休眠一个轮询间隔。停止信号只在任务之间检查，
/// 正在执行的任务总会先完成（或超时）再退出。
pub struct WorkerLoop {
    shared: Arc<LoopShared>,
    worker_id: String,
    cursor: usize,
}

impl WorkerLoop {
    pub fn new(shared: Arc<LoopShared>, index: usize) -> Self {
        let worker_id = format!("{}-{}", shared.instance_name, index);
        let cursor = if shared.queues.is_empty() {
            0
        } else {
            index % shared.queues.len()
        };
        Self {
            shared,
            worker_id,
            cursor,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn blocking_timeout(&self) -> Option<Duration> {
        if self.shared.queues.len() == 1 {
            self.shared.settings.blocking_timeout
        } else {
            None
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = %self.worker_id, queues = ?self.shared.queues, "消费循环启动");

        loop {
            match shutdown_rx.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => break,
            }

            let next = match self.blocking_timeout() {
                Some(timeout) => {
                    let queue = self.shared.queues[0].clone();
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        result = self.shared.store.consume_blocking(&queue, timeout) => {
                            result.map(|task| task.map(|t| (queue.clone(), t)))
                        }
                    }
                }
                None => self.consume_round_robin().await,
            };

            let idle = match next {
                Ok(Some((queue, task))) => {
                    self.execute(&queue, task).await;
                    false
                }
                Ok(None) => self.blocking_timeout().is_none(),
                Err(e) => {
                    error!(worker_id = %self.worker_id, "消费任务失败: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(self.shared.settings.poll_interval) => {}
                }
            }
        }

        info!(worker_id = %self.worker_id, "消费循环已退出");
    }

    /// 从当前游标开始轮询各队列，返回第一个取到的任务
    pub async fn consume_round_robin(&mut self) -> Result<Option<(String, Task)>> {
        let count = self.shared.queues.len();
        let mut last_error = None;

        for _ in 0..count {
            let queue = &self.shared.queues[self.cursor % count];
            self.cursor = (self.cursor + 1) % count;

            match self.shared.store.consume(queue).await {
                Ok(Some(task)) => return Ok(Some((queue.clone(), task))),
                Ok(None) => continue,
                Err(e) => {
                    warn!(worker_id = %self.worker_id, queue = %queue, "队列消费失败: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// 执行一个已出队的任务并确认/拒绝
    pub async fn execute(&self, queue: &str, mut task: Task) {
        {
            let mut stats = self.shared.stats.write().await;
            stats.processed += 1;
            stats.busy_loops += 1;
        }
        self.shared.metrics.record_dequeued(queue, task.task_type);
        task.worker_id = Some(self.worker_id.clone());

        let started = Instant::now();
        let outcome = match self.shared.registry.get(task.task_type).await {
            Some(handler) => {
                let ctx = TaskContext {
                    worker_id: self.worker_id.clone(),
                    instance_name: self.shared.instance_name.clone(),
                    queue: queue.to_string(),
                    attempt: task.retry_count + 1,
                    timeout: self.shared.settings.task_timeout,
                };
                Some(run_handler(handler, ctx, task.clone(), self.shared.settings.task_timeout).await)
            }
            None => None,
        };
        let elapsed = started.elapsed();

        let succeeded = match outcome {
            Some(Ok(payload)) => self.complete(queue, &task, payload, elapsed).await,
            Some(Err(e)) => {
                task.error = Some(e.to_string());
                let requeue = task.can_retry();
                self.fail(queue, &task, requeue).await;
                false
            }
            None => {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    worker_id = %self.worker_id,
                    "没有注册对应的处理器，任务直接进入死信"
                );
                self.shared.metrics.record_missing_handler(task.task_type);
                task.error = Some(
                    TaskQueueError::UnknownTaskType(format!("{} 没有注册处理器", task.task_type))
                        .to_string(),
                );
                self.fail(queue, &task, false).await;
                false
            }
        };

        let mut stats = self.shared.stats.write().await;
        stats.busy_loops = stats.busy_loops.saturating_sub(1);
        if succeeded {
            stats.succeeded += 1;
            stats.total_duration_ms += elapsed.as_millis() as u64;
        } else {
            stats.failed += 1;
        }
    }

    async fn complete(&self, queue: &str, task: &Task, payload: TaskPayload, elapsed: Duration) -> bool {
        let result = TaskResult::success(&task.id, payload, elapsed, Some(self.worker_id.clone()));
        match self.shared.store.ack(task, &result).await {
            Ok(true) => {
                debug!(task_id = %task.id, queue, duration_ms = result.duration_ms, "任务完成");
            }
            Ok(false) => {
                warn!(task_id = %task.id, queue, "任务已不在处理中分区（可能已被回收），确认被忽略");
            }
            Err(e) => {
                // 确认失败的任务留在处理中分区，由回收器按超时处理
                error!(task_id = %task.id, queue, "确认任务失败: {}", e);
            }
        }
        self.shared
            .metrics
            .record_succeeded(queue, task.task_type, elapsed);
        true
    }

    async fn fail(&self, queue: &str, task: &Task, requeue: bool) {
        let error = task.error.as_deref().unwrap_or_default();
        match self.shared.store.nack(task, requeue).await {
            Ok(NackOutcome::Retrying { retry_count, delay }) => {
                warn!(
                    task_id = %task.id,
                    queue,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "任务执行失败，稍后重试: {}",
                    error
                );
                self.shared
                    .metrics
                    .record_failed(queue, task.task_type, "retrying");
            }
            Ok(NackOutcome::DeadLettered) => {
                error!(
                    task_id = %task.id,
                    queue,
                    retry_count = task.retry_count,
                    "任务进入死信: {}",
                    error
                );
                self.shared
                    .metrics
                    .record_failed(queue, task.task_type, "dead_letter");
            }
            Ok(NackOutcome::Ignored) => {
                warn!(task_id = %task.id, queue, "任务已不在处理中分区，拒绝被忽略");
                self.shared
                    .metrics
                    .record_failed(queue, task.task_type, "ignored");
            }
            Err(e) => {
                error!(task_id = %task.id, queue, "拒绝任务失败: {}", e);
            }
        }
    }
}

/// 在独立的tokio任务中执行处理器：超时即中止，panic转换为普通错误
async fn run_handler(
    handler: Arc<dyn taskq_core::traits::TaskHandler>,
    ctx: TaskContext,
    task: Task,
    timeout: Duration,
) -> Result<TaskPayload> {
    let handle = tokio::spawn(async move { handler.handle(&ctx, &task).await });
    let abort = handle.abort_handle();

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) if join_error.is_panic() => Err(TaskQueueError::Handler(format!(
            "处理器panic: {}",
            panic_message(join_error.into_panic())
        ))),
        Ok(Err(join_error)) => Err(TaskQueueError::Handler(format!(
            "处理器任务被取消: {join_error}"
        ))),
        Err(_) => {
            abort.abort();
            Err(TaskQueueError::ExecutionTimeout)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskq_core::config::QueueConfig;
    use taskq_core::models::{TaskStatus, TaskType};
    use taskq_core::traits::TaskHandler;
    use taskq_infrastructure::InMemoryTaskQueue;

    struct PanicHandler;

    #[async_trait]
    impl TaskHandler for PanicHandler {
        fn task_type(&self) -> TaskType {
            TaskType::AiAnalysis
        }

        async fn handle(&self, _ctx: &TaskContext, _task: &Task) -> Result<TaskPayload> {
            panic!("model exploded");
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl TaskHandler for SlowHandler {
        fn task_type(&self) -> TaskType {
            TaskType::Notification
        }

        async fn handle(&self, _ctx: &TaskContext, _task: &Task) -> Result<TaskPayload> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TaskPayload::new())
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        fn task_type(&self) -> TaskType {
            TaskType::ConfigSync
        }

        async fn handle(&self, _ctx: &TaskContext, _task: &Task) -> Result<TaskPayload> {
            Ok(TaskPayload::new())
        }
    }

    async fn shared(queues: &[&str], handler: Option<Arc<dyn TaskHandler>>) -> Arc<LoopShared> {
        shared_with(queues, handler, None).await
    }

    async fn shared_with(
        queues: &[&str],
        handler: Option<Arc<dyn TaskHandler>>,
        blocking_timeout: Option<Duration>,
    ) -> Arc<LoopShared> {
        let registry = HandlerRegistry::new();
        if let Some(handler) = handler {
            registry.register(handler).await.unwrap();
        }
        let store = InMemoryTaskQueue::new(QueueConfig {
            retry_delay_ms: 10,
            ..QueueConfig::default()
        });
        Arc::new(LoopShared {
            instance_name: "test".to_string(),
            queues: queues.iter().map(|q| q.to_string()).collect(),
            store: Arc::new(store),
            registry: Arc::new(registry),
            stats: Arc::new(RwLock::new(WorkerStats::default())),
            metrics: TaskMetrics::new("test"),
            settings: LoopSettings {
                poll_interval: Duration::from_millis(10),
                task_timeout: Duration::from_millis(100),
                blocking_timeout,
            },
        })
    }

    #[tokio::test]
    async fn test_panic_is_converted_to_failure() {
        let shared = shared(&["q"], Some(Arc::new(PanicHandler))).await;
        let task = shared
            .store
            .publish("q", Task::new(TaskType::AiAnalysis, TaskPayload::new()))
            .await
            .unwrap();

        let mut worker = WorkerLoop::new(shared.clone(), 0);
        let (queue, consumed) = worker.consume_round_robin().await.unwrap().unwrap();
        worker.execute(&queue, consumed).await;

        let stored = shared.store.get_task_status(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Retrying);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error.unwrap().contains("model exploded"));

        let stats = shared.stats.read().await;
        assert_eq!((stats.processed, stats.failed, stats.busy_loops), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_timeout_is_treated_as_failure() {
        let shared = shared(&["q"], Some(Arc::new(SlowHandler))).await;
        let task = shared
            .store
            .publish(
                "q",
                Task::new(TaskType::Notification, TaskPayload::new()).with_max_retry(0),
            )
            .await
            .unwrap();

        let mut worker = WorkerLoop::new(shared.clone(), 0);
        let (queue, consumed) = worker.consume_round_robin().await.unwrap().unwrap();
        let started = Instant::now();
        worker.execute(&queue, consumed).await;
        assert!(started.elapsed() < Duration::from_secs(2));

        let stored = shared.store.get_task_status(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(
            shared.store.list_dead_letter("q", 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_handler_dead_letters_without_retry() {
        let shared = shared(&["q"], None).await;
        let task = shared
            .store
            .publish("q", Task::new(TaskType::ConfigSync, TaskPayload::new()))
            .await
            .unwrap();

        let mut worker = WorkerLoop::new(shared.clone(), 0);
        let (queue, consumed) = worker.consume_round_robin().await.unwrap().unwrap();
        worker.execute(&queue, consumed).await;

        let stored = shared.store.get_task_status(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_round_robin_visits_every_queue() {
        let shared = shared(&["a", "b"], None).await;
        shared
            .store
            .publish("b", Task::new(TaskType::ConfigSync, TaskPayload::new()))
            .await
            .unwrap();
        shared
            .store
            .publish("a", Task::new(TaskType::ConfigSync, TaskPayload::new()))
            .await
            .unwrap();

        let mut worker = WorkerLoop::new(shared.clone(), 0);
        let (first, _) = worker.consume_round_robin().await.unwrap().unwrap();
        let (second, _) = worker.consume_round_robin().await.unwrap().unwrap();
        assert_eq!(first, "a");
        assert_eq!(second, "b");
        assert!(worker.consume_round_robin().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocking_loop_consumes_and_stops_without_losing_tasks() {
        let shared = shared_with(
            &["config_sync"],
            Some(Arc::new(EchoHandler)),
            Some(Duration::from_secs(2)),
        )
        .await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = WorkerLoop::new(shared.clone(), 0);
        assert!(worker.blocking_timeout().is_some());
        let handle = tokio::spawn(worker.run(shutdown_rx));

        // 阻塞等待中发布的任务被立即消费
        tokio::time::sleep(Duration::from_millis(50)).await;
        let first = shared
            .store
            .publish("config_sync", Task::new(TaskType::ConfigSync, TaskPayload::new()))
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        while shared.store.get_task_status(&first.id).await.unwrap().status != TaskStatus::Completed {
            assert!(Instant::now() < deadline, "blocked loop never picked up the task");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // 阻塞等待中收到停止信号，循环在阻塞超时之前退出
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stopping = Instant::now();
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(stopping.elapsed() < Duration::from_secs(1));

        shared
            .store
            .publish("config_sync", Task::new(TaskType::ConfigSync, TaskPayload::new()))
            .await
            .unwrap();
        let stats = shared.store.get_queue_stats("config_sync").await.unwrap();
        assert_eq!((stats.pending, stats.processing, stats.completed), (1, 0, 1));
    }
}
