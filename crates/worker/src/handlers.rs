use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use taskq_core::models::{Task, TaskPayload, TaskType};
use taskq_core::traits::{TaskContext, TaskHandler};
use taskq_core::Result;
use tracing::info;

use crate::registry::HandlerCatalog;

/// 内置处理器：记录任务并回显载荷摘要
///
/// 独立Worker进程在没有接入具体告警集成时使用，保证任务能被正常确认。
pub struct LoggingHandler {
    task_type: TaskType,
}

impl LoggingHandler {
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type }
    }

    /// 每种任务类型一个日志处理器
    pub fn catalog() -> HandlerCatalog {
        TaskType::ALL
            .iter()
            .fold(HandlerCatalog::new(), |catalog, task_type| {
                catalog.with_handler(Arc::new(LoggingHandler::new(*task_type)))
            })
    }
}

#[async_trait]
impl TaskHandler for LoggingHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<TaskPayload> {
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            worker_id = %ctx.worker_id,
            attempt = ctx.attempt,
            "处理任务"
        );

        let mut keys: Vec<&String> = task.payload.keys().collect();
        keys.sort();
        let mut result = TaskPayload::new();
        result.insert("handled_by".to_string(), json!(ctx.worker_id));
        result.insert("payload_keys".to_string(), json!(keys));
        Ok(result)
    }
}
