//! 任务处理器接口定义
//!
//! 处理器是告警领域逻辑（AI分析、通知发送、配置同步等）接入队列的唯一边界。
//! 每个Worker实例中，一个任务类型只能绑定一个处理器。
//!
//! ## 实现示例
//!
//! ```ignore
//! use async_trait::async_trait;
//! use taskq_core::traits::{TaskContext, TaskHandler};
//! use taskq_core::models::{Task, TaskPayload, TaskType};
//!
//! pub struct WebhookHandler;
//!
//! #[async_trait]
//! impl TaskHandler for WebhookHandler {
//!     fn task_type(&self) -> TaskType {
//!         TaskType::Notification
//!     }
//!
//!     async fn handle(&self, ctx: &TaskContext, task: &Task) -> taskq_core::Result<TaskPayload> {
//!         // 发送webhook ...
//!         Ok(TaskPayload::new())
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Task, TaskPayload, TaskType};
use crate::Result;

/// 处理器执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// 执行该任务的Worker循环标识，形如 `{instance}-{index}`
    pub worker_id: String,
    pub instance_name: String,
    pub queue: String,
    /// 第几次尝试（从1开始）
    pub attempt: u32,
    /// 本次执行的超时时间
    pub timeout: Duration,
}

/// 任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 处理的任务类型
    fn task_type(&self) -> TaskType;

    /// 执行任务，返回结果载荷。返回错误会触发重试或进入死信
    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<TaskPayload>;
}
