use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{QueueStats, Task, TaskResult};
use crate::Result;

/// Nack的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// 已重新放入延迟分区，等待退避时间后再次可消费
    Retrying { retry_count: u32, delay: Duration },
    /// 已进入死信分区（终态）
    DeadLettered,
    /// 任务已不在处理中分区（重复的Ack/Nack），未做任何修改
    Ignored,
}

/// 任务队列存储抽象接口
///
/// 每个队列由四个有序分区组成：就绪（按优先级）、延迟（按可消费时间）、
/// 处理中（按开始时间）和死信。任务在任意时刻只属于其中一个分区，
/// 分区之间的迁移依赖存储的原子弹出/移动原语，因此同一任务同时只对一个消费者可见。
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// 存储后端名称
    fn backend_name(&self) -> &'static str;

    /// 发布任务到指定队列的就绪分区，返回填充默认值后的任务
    async fn publish(&self, queue: &str, task: Task) -> Result<Task>;

    /// 发布延迟任务，`scheduled_at = now + delay`
    async fn publish_delayed(&self, queue: &str, task: Task, delay: Duration) -> Result<Task>;

    /// 非阻塞消费：先提升到期的延迟任务，再弹出优先级最高的就绪任务
    async fn consume(&self, queue: &str) -> Result<Option<Task>>;

    /// 阻塞消费，就绪分区为空时最多等待 `timeout`
    ///
    /// 等待期间可以安全取消：取消不会让任务脱离就绪/处理中分区
    async fn consume_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<Task>>;

    /// 确认任务完成，持久化执行结果。任务不在处理中分区时返回 `false` 且不做修改
    async fn ack(&self, task: &Task, result: &TaskResult) -> Result<bool>;

    /// 拒绝任务：还有剩余重试次数且 `requeue` 时按线性退避重新入队，否则进入死信
    async fn nack(&self, task: &Task, requeue: bool) -> Result<NackOutcome>;

    /// 获取队列统计
    async fn get_queue_stats(&self, queue: &str) -> Result<QueueStats>;

    /// 按ID查询任务记录，不存在时返回 `TaskNotFound`
    async fn get_task_status(&self, task_id: &str) -> Result<Task>;

    /// 查询任务执行结果
    async fn get_task_result(&self, task_id: &str) -> Result<Option<TaskResult>>;

    /// 列出开始时间早于 `started_before` 的处理中任务ID
    async fn list_stale_in_flight(
        &self,
        queue: &str,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// 从处理中分区移除记录已过期的任务
    async fn discard_in_flight(&self, queue: &str, task_id: &str) -> Result<bool>;

    /// 列出死信任务，供人工排查
    async fn list_dead_letter(&self, queue: &str, limit: usize) -> Result<Vec<Task>>;

    /// 检查存储连通性
    async fn ping(&self) -> Result<()>;
}
