use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{queues, DEFAULT_MAX_RETRY};
use crate::{Result, TaskQueueError};

/// 任务载荷：字符串键的不透明数据
pub type TaskPayload = HashMap<String, serde_json::Value>;

/// 任务类型
///
/// 封闭枚举，每种类型在Worker实例中只绑定一个处理器。
/// 未知的类型字符串在解析（或反序列化）时即报错，而不是在消费循环中才发现。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// 告警接入处理
    AlertIngest,
    /// AI分析
    AiAnalysis,
    /// 通知发送
    Notification,
    /// 配置同步
    ConfigSync,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::AlertIngest,
        TaskType::AiAnalysis,
        TaskType::Notification,
        TaskType::ConfigSync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::AlertIngest => "alert_ingest",
            TaskType::AiAnalysis => "ai_analysis",
            TaskType::Notification => "notification",
            TaskType::ConfigSync => "config_sync",
        }
    }

    /// 该类型任务默认投递的队列
    pub fn default_queue(&self) -> &'static str {
        match self {
            TaskType::AlertIngest => queues::DEFAULT,
            TaskType::AiAnalysis => queues::AI_ANALYSIS,
            TaskType::Notification => queues::NOTIFICATION,
            TaskType::ConfigSync => queues::CONFIG_SYNC,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TaskQueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "alert_ingest" => Ok(TaskType::AlertIngest),
            "ai_analysis" => Ok(TaskType::AiAnalysis),
            "notification" => Ok(TaskType::Notification),
            "config_sync" => Ok(TaskType::ConfigSync),
            _ => Err(TaskQueueError::UnknownTaskType(s.to_string())),
        }
    }
}

/// 任务优先级（序数 0–3，数值越大越先被消费）
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub fn ordinal(self) -> u8 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Normal => 1,
            TaskPriority::High => 2,
            TaskPriority::Critical => 3,
        }
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = TaskQueueError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TaskPriority::Low),
            1 => Ok(TaskPriority::Normal),
            2 => Ok(TaskPriority::High),
            3 => Ok(TaskPriority::Critical),
            other => Err(TaskQueueError::InvalidPriority(other)),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// 任务状态
///
/// ```text
/// Pending → Processing → Completed
///               ↓
///           Retrying → Processing ...
///               ↓
///             Failed (死信)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed与Failed（死信）为终态，之后不再有状态迁移
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 任务信封
///
/// # 字段说明
///
/// - `id`: 任务唯一标识，为空时由发布方生成UUID
/// - `queue`: 任务所属队列，发布时写入
/// - `payload`: 字符串键的载荷，由处理器自行解释
/// - `retry_count`/`max_retry`: 重试计数，始终满足 `retry_count <= max_retry`；
///   `max_retry` 未设置时由发布方填入队列配置的默认值
/// - `scheduled_at`: 延迟任务的可消费时间
/// - `worker_id`: 最后一次处理该任务的Worker循环
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub payload: TaskPayload,
    #[serde(default)]
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retry: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Task {
    /// 创建新任务，id留空由发布时生成
    pub fn new(task_type: TaskType, payload: TaskPayload) -> Self {
        Self {
            id: String::new(),
            task_type,
            queue: String::new(),
            payload,
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retry: None,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            worker_id: None,
            error: None,
        }
    }

    /// 从可序列化的领域对象构建任务，对象必须序列化为JSON对象
    pub fn from_serializable<T: Serialize>(task_type: TaskType, value: &T) -> Result<Self> {
        let payload = match serde_json::to_value(value)? {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            other => {
                return Err(TaskQueueError::InvalidPayload(format!(
                    "载荷必须是JSON对象，实际为: {other}"
                )))
            }
        };
        Ok(Self::new(task_type, payload))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    pub fn with_payload_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// 将载荷解析为处理器需要的具体类型
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .payload
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| TaskQueueError::InvalidPayload(format!("任务 {} 载荷解析失败: {e}", self.id)))
    }

    /// 填充发布时的默认值：空id生成UUID，未设置的最大重试次数取 `default_max_retry`，状态重置为Pending
    pub fn prepare_for_publish(&mut self, queue: &str, default_max_retry: u32) {
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        let max_retry = *self.max_retry.get_or_insert(default_max_retry);
        self.queue = queue.to_string();
        self.status = TaskStatus::Pending;
        self.retry_count = self.retry_count.min(max_retry);
    }

    /// 最大重试次数，未设置时为 `DEFAULT_MAX_RETRY`
    pub fn retry_limit(&self) -> u32 {
        self.max_retry.unwrap_or(DEFAULT_MAX_RETRY)
    }

    /// 是否还有剩余重试次数
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.retry_limit()
    }

    /// 第 `retry_count` 次重试的线性退避时间
    pub fn backoff(&self, retry_delay: Duration) -> Duration {
        retry_delay * self.retry_count
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 任务执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: TaskPayload,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub worker_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(
        task_id: impl Into<String>,
        result: TaskPayload,
        duration: Duration,
        worker_id: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            result,
            error: None,
            duration_ms: duration.as_millis() as u64,
            worker_id,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
        worker_id: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            result: TaskPayload::new(),
            error: Some(error.into()),
            duration_ms: duration.as_millis() as u64,
            worker_id,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering_and_ordinals() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(TaskPriority::try_from(3).unwrap(), TaskPriority::Critical);
        assert_eq!(TaskPriority::Low.ordinal(), 0);
        assert!(matches!(
            TaskPriority::try_from(4),
            Err(TaskQueueError::InvalidPriority(4))
        ));
    }

    #[test]
    fn test_task_type_parsing() {
        assert_eq!("ai-analysis".parse::<TaskType>().unwrap(), TaskType::AiAnalysis);
        assert_eq!("notification".parse::<TaskType>().unwrap(), TaskType::Notification);
        assert!(matches!(
            "sms_blast".parse::<TaskType>(),
            Err(TaskQueueError::UnknownTaskType(_))
        ));

        // 未知类型在反序列化阶段即失败
        let raw = json!({
            "id": "t-1",
            "task_type": "sms_blast",
            "status": "pending",
            "max_retry": 3,
            "created_at": Utc::now(),
        });
        assert!(serde_json::from_value::<Task>(raw).is_err());
    }

    #[test]
    fn test_from_serializable_requires_object() {
        #[derive(Serialize)]
        struct Alert {
            alert_id: String,
            severity: u8,
        }

        let task = Task::from_serializable(
            TaskType::AiAnalysis,
            &Alert {
                alert_id: "a-1".to_string(),
                severity: 2,
            },
        )
        .unwrap();
        assert_eq!(task.payload.get("alert_id"), Some(&json!("a-1")));
        assert_eq!(task.max_retry, None);
        assert_eq!(task.retry_limit(), DEFAULT_MAX_RETRY);

        let err = Task::from_serializable(TaskType::AiAnalysis, &vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, TaskQueueError::InvalidPayload(_)));
    }

    #[test]
    fn test_prepare_for_publish_assigns_id_and_keeps_existing() {
        let mut task = Task::new(TaskType::Notification, TaskPayload::new());
        task.prepare_for_publish("notification", 3);
        assert!(!task.id.is_empty());
        assert_eq!(task.queue, "notification");
        assert_eq!(task.status, TaskStatus::Pending);

        let mut named = Task::new(TaskType::Notification, TaskPayload::new()).with_id("fixed");
        named.prepare_for_publish("notification", 3);
        assert_eq!(named.id, "fixed");
    }

    #[test]
    fn test_prepare_for_publish_fills_max_retry_only_when_unset() {
        let mut unset = Task::new(TaskType::Notification, TaskPayload::new());
        unset.prepare_for_publish("notification", 7);
        assert_eq!(unset.max_retry, Some(7));

        let mut explicit = Task::new(TaskType::Notification, TaskPayload::new()).with_max_retry(0);
        explicit.prepare_for_publish("notification", 7);
        assert_eq!(explicit.max_retry, Some(0));
        assert!(!explicit.can_retry());
    }

    #[test]
    fn test_linear_backoff_and_retry_budget() {
        let mut task = Task::new(TaskType::ConfigSync, TaskPayload::new()).with_max_retry(2);
        assert!(task.can_retry());
        task.retry_count = 2;
        assert!(!task.can_retry());
        assert_eq!(task.backoff(Duration::from_secs(5)), Duration::from_secs(10));
    }

    #[test]
    fn test_payload_as_round_trips_typed_struct() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Notify {
            channel: String,
        }

        let task = Task::new(TaskType::Notification, TaskPayload::new())
            .with_payload_value("channel", json!("email"));
        let decoded: Notify = task.payload_as().unwrap();
        assert_eq!(decoded.channel, "email");
    }
}
