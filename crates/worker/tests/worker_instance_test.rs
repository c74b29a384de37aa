use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskq_core::config::{MonitorConfig, QueueConfig, WorkerConfig};
use taskq_core::models::{InstanceConfig, Task, TaskPayload, TaskPriority, TaskStatus, TaskType, WorkerType};
use taskq_core::traits::{QueueStore, TaskContext, TaskHandler};
use taskq_core::{Result, TaskQueueError};
use taskq_infrastructure::InMemoryTaskQueue;
use taskq_worker::{HandlerCatalog, LoggingHandler, WorkerManager};
use tokio::sync::Mutex;

/// 记录处理顺序的处理器
struct RecordingHandler {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Notification
    }

    async fn handle(&self, _ctx: &TaskContext, task: &Task) -> Result<TaskPayload> {
        self.seen.lock().await.push(task.id.clone());
        Ok(TaskPayload::new())
    }
}

/// 总是失败的处理器
struct FailingHandler {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl TaskHandler for FailingHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ConfigSync
    }

    async fn handle(&self, _ctx: &TaskContext, _task: &Task) -> Result<TaskPayload> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TaskQueueError::Handler("下游不可用".to_string()))
    }
}

fn fast_store() -> Arc<InMemoryTaskQueue> {
    Arc::new(InMemoryTaskQueue::new(QueueConfig {
        retry_delay_ms: 20,
        ..QueueConfig::default()
    }))
}

fn manager(store: Arc<InMemoryTaskQueue>, catalog: HandlerCatalog) -> WorkerManager {
    WorkerManager::new(
        store,
        catalog,
        WorkerConfig {
            poll_interval_ms: 10,
            task_timeout_seconds: 5,
            stop_grace_seconds: 5,
            ..WorkerConfig::default()
        },
        MonitorConfig::default(),
    )
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_instance_processes_tasks_by_priority() {
    let store = fast_store();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let catalog = HandlerCatalog::new().with_handler(Arc::new(RecordingHandler { seen: seen.clone() }));
    let manager = manager(store.clone(), catalog);

    let low = store
        .publish(
            "notification",
            Task::new(TaskType::Notification, TaskPayload::new()).with_priority(TaskPriority::Low),
        )
        .await
        .unwrap();
    let critical = store
        .publish(
            "notification",
            Task::new(TaskType::Notification, TaskPayload::new())
                .with_priority(TaskPriority::Critical),
        )
        .await
        .unwrap();

    let instance = manager
        .create_and_start(InstanceConfig::new("n-1", WorkerType::Notification).with_concurrency(1))
        .await
        .unwrap();

    wait_until(|| async { seen.lock().await.len() == 2 }).await;
    assert_eq!(*seen.lock().await, vec![critical.id.clone(), low.id.clone()]);

    wait_until(|| async { instance.stats().await.succeeded == 2 }).await;
    let result = store.get_task_result(&critical.id).await.unwrap().unwrap();
    assert!(result.is_success());
    assert_eq!(result.worker_id.as_deref(), Some("n-1-0"));

    manager.stop_all().await;
}

#[tokio::test]
async fn test_failing_handler_exhausts_retries() {
    let store = fast_store();
    let attempts = Arc::new(AtomicU32::new(0));
    let catalog = HandlerCatalog::new().with_handler(Arc::new(FailingHandler {
        attempts: attempts.clone(),
    }));
    let manager = manager(store.clone(), catalog);

    let task = store
        .publish(
            "config_sync",
            Task::new(TaskType::ConfigSync, TaskPayload::new()).with_max_retry(2),
        )
        .await
        .unwrap();

    let instance = manager
        .create_and_start(InstanceConfig::new("c-1", WorkerType::ConfigSync))
        .await
        .unwrap();

    wait_until(|| async {
        store
            .get_task_status(&task.id)
            .await
            .map(|t| t.status == TaskStatus::Failed)
            .unwrap_or(false)
    })
    .await;

    let stored = store.get_task_status(&task.id).await.unwrap();
    assert_eq!(stored.retry_count, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.list_dead_letter("config_sync", 10).await.unwrap().len(), 1);

    wait_until(|| async { instance.stats().await.failed == 3 }).await;
    manager.stop_all().await;
}

#[tokio::test]
async fn test_general_worker_consumes_every_default_queue() {
    let store = fast_store();
    let manager = manager(store.clone(), LoggingHandler::catalog());

    let mut ids = Vec::new();
    for task_type in TaskType::ALL {
        let task = store
            .publish(task_type.default_queue(), Task::new(task_type, TaskPayload::new()))
            .await
            .unwrap();
        ids.push(task.id);
    }

    manager
        .create_and_start(InstanceConfig::new("g-1", WorkerType::General))
        .await
        .unwrap();

    for id in &ids {
        wait_until(|| async {
            store
                .get_task_status(id)
                .await
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
        .await;
    }

    manager.stop_all().await;
}
