use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{ScalingPolicy, WorkerType};

/// 自动扩缩容配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    pub enabled: bool,
    pub collect_interval_seconds: u64,
    pub evaluate_interval_seconds: u64,
    /// 扩容创建的实例的并发数
    pub default_concurrency: usize,
    /// 扩容实例健康端口的起始值，0 表示扩容实例不启动健康端点
    pub base_health_port: u16,
    pub history_limit: usize,
    pub policies: Vec<ScalingPolicy>,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_interval_seconds: 10,
            evaluate_interval_seconds: 30,
            default_concurrency: 2,
            base_health_port: 9100,
            history_limit: 100,
            policies: vec![
                ScalingPolicy::for_worker_type(WorkerType::AiAnalysis),
                ScalingPolicy::for_worker_type(WorkerType::Notification),
                ScalingPolicy::for_worker_type(WorkerType::ConfigSync),
                ScalingPolicy::for_worker_type(WorkerType::General),
            ],
        }
    }
}

impl AutoscalerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.collect_interval_seconds == 0 {
            return Err(anyhow::anyhow!("指标采集间隔必须大于0"));
        }

        if self.evaluate_interval_seconds == 0 {
            return Err(anyhow::anyhow!("策略评估间隔必须大于0"));
        }

        if self.default_concurrency == 0 {
            return Err(anyhow::anyhow!("扩容实例并发数必须大于0"));
        }

        let mut seen = HashSet::new();
        for policy in &self.policies {
            if !seen.insert(policy.worker_type) {
                return Err(anyhow::anyhow!(
                    "Worker类型 {} 配置了多个扩缩容策略",
                    policy.worker_type
                ));
            }
            policy.validate()?;
        }

        Ok(())
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_seconds)
    }

    pub fn evaluate_interval(&self) -> Duration {
        Duration::from_secs(self.evaluate_interval_seconds)
    }
}
