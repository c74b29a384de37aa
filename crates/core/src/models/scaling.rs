use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::WorkerType;

/// 单个Worker类型的扩缩容策略
///
/// 由自动扩缩容器独占持有，`last_scale_*` 时间戳在执行动作后原地更新。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub worker_type: WorkerType,
    pub min_instances: usize,
    pub max_instances: usize,
    /// 目标队列深度，超过即扩容
    pub target_queue_length: u64,
    /// CPU使用率扩容阈值（百分比）
    pub scale_up_threshold: f64,
    /// CPU使用率缩容阈值（百分比）
    pub scale_down_threshold: f64,
    pub scale_up_cooldown_seconds: u64,
    pub scale_down_cooldown_seconds: u64,
    #[serde(skip)]
    pub last_scale_up: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_scale_down: Option<DateTime<Utc>>,
}

impl ScalingPolicy {
    pub fn for_worker_type(worker_type: WorkerType) -> Self {
        Self {
            worker_type,
            min_instances: 1,
            max_instances: 5,
            target_queue_length: 100,
            scale_up_threshold: 80.0,
            scale_down_threshold: 20.0,
            scale_up_cooldown_seconds: 60,
            scale_down_cooldown_seconds: 300,
            last_scale_up: None,
            last_scale_down: None,
        }
    }

    pub fn scale_up_cooled_down(&self, now: DateTime<Utc>) -> bool {
        Self::elapsed(self.last_scale_up, self.scale_up_cooldown_seconds, now)
    }

    pub fn scale_down_cooled_down(&self, now: DateTime<Utc>) -> bool {
        Self::elapsed(self.last_scale_down, self.scale_down_cooldown_seconds, now)
    }

    fn elapsed(last: Option<DateTime<Utc>>, cooldown_seconds: u64, now: DateTime<Utc>) -> bool {
        match last {
            None => true,
            Some(at) => now - at >= Duration::seconds(cooldown_seconds as i64),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_instances == 0 {
            return Err(anyhow::anyhow!(
                "{} 的最大实例数必须大于0",
                self.worker_type
            ));
        }
        if self.min_instances > self.max_instances {
            return Err(anyhow::anyhow!(
                "{} 的最小实例数({})不能大于最大实例数({})",
                self.worker_type,
                self.min_instances,
                self.max_instances
            ));
        }
        if !(0.0..=100.0).contains(&self.scale_up_threshold)
            || !(0.0..=100.0).contains(&self.scale_down_threshold)
        {
            return Err(anyhow::anyhow!("CPU阈值必须在0到100之间"));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(anyhow::anyhow!(
                "{} 的缩容阈值必须小于扩容阈值",
                self.worker_type
            ));
        }
        Ok(())
    }
}

/// 扩缩容动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    None,
}

/// 一次策略评估的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub reason: String,
}

impl ScalingDecision {
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            action: ScalingAction::None,
            reason: reason.into(),
        }
    }
}

/// 扩缩容历史事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub worker_type: WorkerType,
    pub action: ScalingAction,
    pub instance_name: Option<String>,
    pub reason: String,
    pub from_count: usize,
    pub to_count: usize,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
