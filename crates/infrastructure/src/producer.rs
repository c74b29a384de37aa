//! 任务生产者
//!
//! 将告警领域对象封装为任务信封，填充默认值后交给队列存储。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskq_core::models::{Task, TaskPriority, TaskType};
use taskq_core::traits::QueueStore;
use taskq_core::{Result, TaskQueueError};
use tracing::info;

/// AI分析请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysisRequest {
    pub alert_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

/// 通知发送请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub channel: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub content: String,
    #[serde(default)]
    pub alert_id: Option<String>,
}

/// 配置同步请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSyncRequest {
    pub resource: String,
    pub version: u64,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// 告警接入请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertIngestRequest {
    pub source: String,
    pub fingerprint: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TaskQueueError::InvalidPayload(format!("{field} 不能为空")));
    }
    Ok(())
}

impl AiAnalysisRequest {
    fn validate(&self) -> Result<()> {
        require("alert_id", &self.alert_id)?;
        require("tenant_id", &self.tenant_id)
    }
}

impl NotificationRequest {
    fn validate(&self) -> Result<()> {
        require("channel", &self.channel)?;
        require("content", &self.content)?;
        if self.recipients.iter().all(|r| r.trim().is_empty()) {
            return Err(TaskQueueError::InvalidPayload(
                "recipients 至少需要一个接收人".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigSyncRequest {
    fn validate(&self) -> Result<()> {
        require("resource", &self.resource)
    }
}

impl AlertIngestRequest {
    fn validate(&self) -> Result<()> {
        require("source", &self.source)?;
        require("fingerprint", &self.fingerprint)
    }
}

/// 任务生产者
#[derive(Clone)]
pub struct TaskProducer {
    store: Arc<dyn QueueStore>,
}

impl TaskProducer {
    /// 最大重试次数的默认值由队列存储按配置填充
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// 发布到任务类型的默认队列
    pub async fn publish(&self, task: Task) -> Result<Task> {
        let queue = task.task_type.default_queue();
        self.store.publish(queue, task).await
    }

    pub async fn publish_to(&self, queue: &str, task: Task) -> Result<Task> {
        self.store.publish(queue, task).await
    }

    pub async fn publish_delayed(&self, task: Task, delay: Duration) -> Result<Task> {
        let queue = task.task_type.default_queue();
        self.store.publish_delayed(queue, task, delay).await
    }

    fn envelope<T: Serialize>(
        &self,
        task_type: TaskType,
        request: &T,
        priority: TaskPriority,
    ) -> Result<Task> {
        Ok(Task::from_serializable(task_type, request)?.with_priority(priority))
    }

    pub async fn submit_ai_analysis(
        &self,
        request: &AiAnalysisRequest,
        priority: TaskPriority,
    ) -> Result<Task> {
        request.validate()?;
        let task = self.publish(self.envelope(TaskType::AiAnalysis, request, priority)?).await?;
        info!(task_id = %task.id, alert_id = %request.alert_id, "AI分析任务已提交");
        Ok(task)
    }

    pub async fn submit_notification(
        &self,
        request: &NotificationRequest,
        priority: TaskPriority,
    ) -> Result<Task> {
        request.validate()?;
        let task = self
            .publish(self.envelope(TaskType::Notification, request, priority)?)
            .await?;
        info!(task_id = %task.id, channel = %request.channel, "通知任务已提交");
        Ok(task)
    }

    /// 通知可延迟发送（如静默期结束后）
    pub async fn submit_notification_delayed(
        &self,
        request: &NotificationRequest,
        priority: TaskPriority,
        delay: Duration,
    ) -> Result<Task> {
        request.validate()?;
        let task = self
            .publish_delayed(self.envelope(TaskType::Notification, request, priority)?, delay)
            .await?;
        info!(task_id = %task.id, channel = %request.channel, delay_ms = delay.as_millis() as u64, "延迟通知任务已提交");
        Ok(task)
    }

    pub async fn submit_config_sync(&self, request: &ConfigSyncRequest) -> Result<Task> {
        request.validate()?;
        let task = self
            .publish(self.envelope(TaskType::ConfigSync, request, TaskPriority::Normal)?)
            .await?;
        info!(task_id = %task.id, resource = %request.resource, version = request.version, "配置同步任务已提交");
        Ok(task)
    }

    pub async fn submit_alert_ingest(
        &self,
        request: &AlertIngestRequest,
        priority: TaskPriority,
    ) -> Result<Task> {
        request.validate()?;
        let task = self
            .publish(self.envelope(TaskType::AlertIngest, request, priority)?)
            .await?;
        info!(task_id = %task.id, source = %request.source, "告警接入任务已提交");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryTaskQueue;
    use taskq_core::config::QueueConfig;
    use taskq_core::constants::queues;
    use taskq_core::models::TaskStatus;

    fn producer(max_retry: u32) -> (Arc<InMemoryTaskQueue>, TaskProducer) {
        let store = Arc::new(InMemoryTaskQueue::new(QueueConfig {
            default_max_retry: max_retry,
            ..QueueConfig::default()
        }));
        let producer = TaskProducer::new(store.clone());
        (store, producer)
    }

    #[tokio::test]
    async fn test_submit_ai_analysis_targets_default_queue() {
        let (store, producer) = producer(5);
        let request = AiAnalysisRequest {
            alert_id: "alert-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            prompt: None,
            context: HashMap::new(),
        };

        let task = producer
            .submit_ai_analysis(&request, TaskPriority::High)
            .await
            .unwrap();
        assert!(!task.id.is_empty());
        assert_eq!(task.queue, queues::AI_ANALYSIS);
        assert_eq!(task.max_retry, Some(5));
        assert_eq!(task.status, TaskStatus::Pending);

        let consumed = store.consume(queues::AI_ANALYSIS).await.unwrap().unwrap();
        let decoded: AiAnalysisRequest = consumed.payload_as().unwrap();
        assert_eq!(decoded.alert_id, "alert-1");
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let (_, producer) = producer(3);
        let request = NotificationRequest {
            channel: "email".to_string(),
            recipients: vec![],
            subject: None,
            content: "disk full".to_string(),
            alert_id: None,
        };
        let err = producer
            .submit_notification(&request, TaskPriority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskQueueError::InvalidPayload(_)));

        let ingest = AlertIngestRequest {
            source: "".to_string(),
            fingerprint: "fp".to_string(),
            payload: serde_json::Value::Null,
        };
        assert!(producer
            .submit_alert_ingest(&ingest, TaskPriority::Low)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delayed_notification_lands_in_delayed_partition() {
        let (store, producer) = producer(3);
        let request = NotificationRequest {
            channel: "webhook".to_string(),
            recipients: vec!["ops".to_string()],
            subject: Some("cpu".to_string()),
            content: "cpu > 90%".to_string(),
            alert_id: Some("alert-2".to_string()),
        };
        producer
            .submit_notification_delayed(&request, TaskPriority::Normal, Duration::from_secs(60))
            .await
            .unwrap();

        let stats = store.get_queue_stats(queues::NOTIFICATION).await.unwrap();
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.pending, 0);
    }
}
