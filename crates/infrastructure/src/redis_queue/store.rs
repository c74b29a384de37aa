use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, Script};
use taskq_core::config::{QueueConfig, RedisConfig};
use taskq_core::models::{QueueStats, Task, TaskResult};
use taskq_core::traits::{NackOutcome, QueueStore};
use taskq_core::{Result, TaskQueueError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::keys::{KeySpace, QueueKeys};
use super::scripts;
use crate::task_transitions::{delayed_member, mark_completed, mark_processing, resolve_nack};

fn store_err(e: redis::RedisError) -> TaskQueueError {
    TaskQueueError::Store(format!("Redis command failed: {e}"))
}

/// 基于Redis有序集合的任务队列
///
/// 普通命令走共享的 `ConnectionManager`（断线自动重连），
/// 阻塞消费的 `BLPOP` 使用从空闲池借出的独立连接，避免阻塞其他命令。
/// 阻塞消费只等待唤醒信号，任务出队仍由脚本原子完成，
/// 因此在等待期间取消调用不会让任务脱离所有分区。
pub struct RedisTaskQueue {
    client: Client,
    manager: ConnectionManager,
    blocking_pool: Mutex<Vec<MultiplexedConnection>>,
    keys: KeySpace,
    config: QueueConfig,
    enqueue_ready: Script,
    enqueue_delayed: Script,
    promote_and_claim: Script,
    ack_script: Script,
    retry_script: Script,
    dead_letter_script: Script,
}

impl RedisTaskQueue {
    pub async fn connect(redis_config: &RedisConfig, config: QueueConfig) -> Result<Self> {
        let client = Client::open(redis_config.build_url()).map_err(|e| {
            TaskQueueError::Configuration(format!("Failed to create Redis client: {e}"))
        })?;

        let manager = tokio::time::timeout(
            redis_config.connection_timeout(),
            ConnectionManager::new(client.clone()),
        )
        .await
        .map_err(|_| {
            TaskQueueError::Network(format!(
                "连接Redis超时: {}:{}",
                redis_config.host, redis_config.port
            ))
        })?
        .map_err(store_err)?;

        let store = Self {
            client,
            manager,
            blocking_pool: Mutex::new(Vec::new()),
            keys: KeySpace::new(config.key_prefix.clone()),
            config,
            enqueue_ready: Script::new(scripts::ENQUEUE_READY),
            enqueue_delayed: Script::new(scripts::ENQUEUE_DELAYED),
            promote_and_claim: Script::new(scripts::PROMOTE_AND_CLAIM),
            ack_script: Script::new(scripts::ACK),
            retry_script: Script::new(scripts::RETRY),
            dead_letter_script: Script::new(scripts::DEAD_LETTER),
        };
        store.ping().await?;

        info!(
            "Successfully connected to Redis at {}:{} (prefix={})",
            redis_config.host, redis_config.port, store.config.key_prefix
        );
        Ok(store)
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// 借出一条阻塞连接，池为空时新建
    async fn checkout_blocking(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.blocking_pool.lock().await.pop() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_err)
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        self.blocking_pool.lock().await.push(conn);
    }

    fn ttl_seconds(&self) -> u64 {
        self.config.record_ttl_seconds
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<Task>> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.keys.task(task_id))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        raw.map(|json| serde_json::from_str(&json).map_err(TaskQueueError::from))
            .transpose()
    }

    /// 已弹出并记入处理中分区的任务：加载记录并标记为处理中。
    /// 记录已过期时从处理中分区移除并返回 `None`。
    async fn claim(&self, keys: &QueueKeys, task_id: &str, now: DateTime<Utc>) -> Result<Option<Task>> {
        let Some(mut task) = self.load_task(task_id).await? else {
            warn!(task_id, "任务记录已过期，从处理中分区移除");
            let mut conn = self.conn();
            let _: i64 = redis::cmd("ZREM")
                .arg(&keys.processing)
                .arg(task_id)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            return Ok(None);
        };

        mark_processing(&mut task, now);
        let json = serde_json::to_string(&task)?;
        let mut conn = self.conn();
        let _: Option<String> = redis::cmd("SET")
            .arg(self.keys.task(task_id))
            .arg(json)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(Some(task))
    }
}

#[async_trait]
impl QueueStore for RedisTaskQueue {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, queue: &str, mut task: Task) -> Result<Task> {
        task.prepare_for_publish(queue, self.config.default_max_retry);
        let keys = self.keys.queue(queue);
        let json = serde_json::to_string(&task)?;

        let mut conn = self.conn();
        let mut invocation = self.enqueue_ready.prepare_invoke();
        invocation
            .key(self.keys.task(&task.id))
            .key(&keys.ready)
            .key(self.keys.seq())
            .key(&keys.wake)
            .arg(json)
            .arg(self.ttl_seconds())
            .arg(&task.id)
            .arg(task.priority.ordinal())
            .arg(scripts::WAKE_CAP);
        let inserted: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;

        if inserted == 0 {
            return Err(TaskQueueError::DuplicateTask { id: task.id });
        }

        debug!(task_id = %task.id, queue, priority = %task.priority, "任务已发布");
        Ok(task)
    }

    async fn publish_delayed(&self, queue: &str, mut task: Task, delay: Duration) -> Result<Task> {
        task.prepare_for_publish(queue, self.config.default_max_retry);
        let scheduled_at = Utc::now() + crate::task_transitions::chrono_duration(delay);
        task.scheduled_at = Some(scheduled_at);
        let keys = self.keys.queue(queue);
        let json = serde_json::to_string(&task)?;

        let mut conn = self.conn();
        let mut invocation = self.enqueue_delayed.prepare_invoke();
        invocation
            .key(self.keys.task(&task.id))
            .key(&keys.delayed)
            .arg(json)
            .arg(self.ttl_seconds())
            .arg(delayed_member(&task))
            .arg(scheduled_at.timestamp_millis());
        let inserted: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;

        if inserted == 0 {
            return Err(TaskQueueError::DuplicateTask { id: task.id });
        }

        debug!(task_id = %task.id, queue, delay_ms = delay.as_millis() as u64, "延迟任务已发布");
        Ok(task)
    }

    async fn consume(&self, queue: &str) -> Result<Option<Task>> {
        let keys = self.keys.queue(queue);

        loop {
            let now = Utc::now();
            let mut conn = self.conn();
            let mut invocation = self.promote_and_claim.prepare_invoke();
            invocation
                .key(&keys.delayed)
                .key(&keys.ready)
                .key(&keys.processing)
                .key(self.keys.seq())
                .key(&keys.wake)
                .arg(now.timestamp_millis())
                .arg(self.config.promote_batch_size)
                .arg(scripts::WAKE_CAP);
            let popped: Option<String> = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(store_err)?;

            let Some(task_id) = popped else {
                return Ok(None);
            };

            if let Some(task) = self.claim(&keys, &task_id, now).await? {
                return Ok(Some(task));
            }
        }
    }

    async fn consume_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<Task>> {
        if let Some(task) = self.consume(queue).await? {
            return Ok(Some(task));
        }
        if timeout.is_zero() {
            return Ok(None);
        }

        let keys = self.keys.queue(queue);
        let mut blocking = self.checkout_blocking().await?;
        // 调用方放弃等待最多丢掉一个信号，任务仍在就绪分区；出错的连接不放回池中
        let woken: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&keys.wake)
            .arg(timeout.as_secs_f64())
            .query_async(&mut blocking)
            .await
            .map_err(store_err)?;
        self.checkin_blocking(blocking).await;

        if woken.is_none() {
            return Ok(None);
        }
        self.consume(queue).await
    }

    async fn ack(&self, task: &Task, result: &TaskResult) -> Result<bool> {
        let keys = self.keys.queue(&task.queue);
        let completed = mark_completed(task, Utc::now());

        let mut conn = self.conn();
        let mut invocation = self.ack_script.prepare_invoke();
        invocation
            .key(&keys.processing)
            .key(self.keys.task(&task.id))
            .key(self.keys.result(&task.id))
            .key(&keys.completed)
            .arg(&task.id)
            .arg(serde_json::to_string(&completed)?)
            .arg(serde_json::to_string(result)?)
            .arg(self.ttl_seconds());
        let removed: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;

        if removed == 0 {
            debug!(task_id = %task.id, "任务不在处理中分区，忽略重复确认");
        }
        Ok(removed == 1)
    }

    async fn nack(&self, task: &Task, requeue: bool) -> Result<NackOutcome> {
        let now = Utc::now();
        let keys = self.keys.queue(&task.queue);
        let resolution = resolve_nack(task, requeue, self.config.retry_delay(), now);
        let json = serde_json::to_string(&resolution.task)?;

        let mut conn = self.conn();
        let removed: i64 = match (&resolution.outcome, &resolution.dead_letter_result) {
            (NackOutcome::Retrying { .. }, _) => {
                let scheduled_ms = resolution
                    .task
                    .scheduled_at
                    .map(|at| at.timestamp_millis())
                    .unwrap_or_else(|| now.timestamp_millis());
                let mut invocation = self.retry_script.prepare_invoke();
                invocation
                    .key(&keys.processing)
                    .key(self.keys.task(&task.id))
                    .key(&keys.delayed)
                    .arg(&task.id)
                    .arg(json)
                    .arg(delayed_member(&resolution.task))
                    .arg(scheduled_ms);
                invocation
                    .invoke_async(&mut conn)
                    .await
                    .map_err(store_err)?
            }
            (_, result) => {
                let result_json = match result {
                    Some(result) => serde_json::to_string(result)?,
                    None => String::new(),
                };
                let mut invocation = self.dead_letter_script.prepare_invoke();
                invocation
                    .key(&keys.processing)
                    .key(self.keys.task(&task.id))
                    .key(&keys.dead)
                    .key(self.keys.result(&task.id))
                    .key(&keys.failed)
                    .arg(&task.id)
                    .arg(json)
                    .arg(now.timestamp_millis())
                    .arg(result_json)
                    .arg(self.ttl_seconds());
                invocation
                    .invoke_async(&mut conn)
                    .await
                    .map_err(store_err)?
            }
        };

        if removed == 0 {
            debug!(task_id = %task.id, "任务不在处理中分区，忽略重复拒绝");
            return Ok(NackOutcome::Ignored);
        }
        Ok(resolution.outcome)
    }

    async fn get_queue_stats(&self, queue: &str) -> Result<QueueStats> {
        let keys = self.keys.queue(queue);
        let mut conn = self.conn();
        let (pending, delayed, processing, dead_letter, completed, failed): (
            u64,
            u64,
            u64,
            u64,
            Option<u64>,
            Option<u64>,
        ) = redis::pipe()
            .cmd("ZCARD")
            .arg(&keys.ready)
            .cmd("ZCARD")
            .arg(&keys.delayed)
            .cmd("ZCARD")
            .arg(&keys.processing)
            .cmd("ZCARD")
            .arg(&keys.dead)
            .cmd("GET")
            .arg(&keys.completed)
            .cmd("GET")
            .arg(&keys.failed)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(QueueStats {
            queue: queue.to_string(),
            pending,
            delayed,
            processing,
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
            dead_letter,
        })
    }

    async fn get_task_status(&self, task_id: &str) -> Result<Task> {
        self.load_task(task_id)
            .await?
            .ok_or_else(|| TaskQueueError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    async fn get_task_result(&self, task_id: &str) -> Result<Option<TaskResult>> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.keys.result(task_id))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        raw.map(|json| serde_json::from_str(&json).map_err(TaskQueueError::from))
            .transpose()
    }

    async fn list_stale_in_flight(
        &self,
        queue: &str,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let keys = self.keys.queue(queue);
        let mut conn = self.conn();
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&keys.processing)
            .arg("-inf")
            .arg(started_before.timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(ids)
    }

    async fn discard_in_flight(&self, queue: &str, task_id: &str) -> Result<bool> {
        let keys = self.keys.queue(queue);
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("ZREM")
            .arg(&keys.processing)
            .arg(task_id)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn list_dead_letter(&self, queue: &str, limit: usize) -> Result<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self.keys.queue(queue);
        let mut conn = self.conn();
        let ids: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(&keys.dead)
            .arg(0)
            .arg(limit as i64 - 1)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let record_keys: Vec<String> = ids.iter().map(|id| self.keys.task(id)).collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&record_keys)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        raws.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(TaskQueueError::from))
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(TaskQueueError::Store(format!(
                "Unexpected PING response: {response}"
            )))
        }
    }
}
