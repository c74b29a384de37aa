use std::collections::HashMap;
use std::sync::Arc;

use taskq_core::models::{TaskType, WorkerType};
use taskq_core::traits::TaskHandler;
use taskq_core::{Result, TaskQueueError};
use tokio::sync::RwLock;
use tracing::debug;

/// 实例内的处理器注册表：任务类型 -> 处理器，一个类型只能绑定一个处理器
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let task_type = handler.task_type();
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&task_type) {
            return Err(TaskQueueError::DuplicateHandler(task_type.to_string()));
        }
        debug!(task_type = %task_type, "注册任务处理器");
        handlers.insert(task_type, handler);
        Ok(())
    }

    pub async fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(&task_type).cloned()
    }

    pub async fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.read().await.keys().copied().collect();
        types.sort();
        types
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 全部可用处理器的目录，按Worker类型挑选后填充实例注册表
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加（或替换）某任务类型的处理器
    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.task_type(), handler);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    /// 为指定Worker类型构建注册表；目录中缺少的类型不注册，
    /// 对应任务会作为"无处理器"直接进入死信
    pub async fn registry_for(&self, worker_type: WorkerType) -> Result<HandlerRegistry> {
        let registry = HandlerRegistry::new();
        for task_type in worker_type.task_types() {
            if let Some(handler) = self.get(task_type) {
                registry.register(handler).await?;
            }
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::LoggingHandler;

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = HandlerRegistry::new();
        registry
            .register(Arc::new(LoggingHandler::new(TaskType::Notification)))
            .await
            .unwrap();
        let err = registry
            .register(Arc::new(LoggingHandler::new(TaskType::Notification)))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskQueueError::DuplicateHandler(_)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_registry_for_worker_type() {
        let catalog = LoggingHandler::catalog();

        let ai = catalog.registry_for(WorkerType::AiAnalysis).await.unwrap();
        assert_eq!(ai.task_types().await, vec![TaskType::AiAnalysis]);
        assert!(ai.get(TaskType::Notification).await.is_none());

        let general = catalog.registry_for(WorkerType::General).await.unwrap();
        assert_eq!(general.len().await, TaskType::ALL.len());
    }
}
