//! 扩缩容策略评估
//!
//! 纯函数，不涉及实例管理，便于单独测试。

use chrono::{DateTime, Utc};
use taskq_core::constants::{ERROR_RATE_CEILING, IDLE_THROUGHPUT_EPSILON};
use taskq_core::models::{ScalingAction, ScalingDecision, ScalingPolicy, WorkerMetrics};

/// 同一Worker类型所有实例的汇总指标
///
/// CPU、内存、延迟与错误率取平均，吞吐量取总和，队列深度取最大值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeMetrics {
    /// 参与汇总的样本数
    pub instances: usize,
    /// 同类型实例消费相同的队列，取各实例观测到的最大深度
    pub queue_depth: u64,
    pub avg_cpu: f64,
    pub avg_memory_bytes: u64,
    /// 各实例吞吐量之和
    pub tasks_per_second: f64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
}

impl TypeMetrics {
    pub fn aggregate<'a>(samples: impl IntoIterator<Item = &'a WorkerMetrics>) -> Self {
        let mut total = TypeMetrics::default();
        let mut memory = 0u64;
        for sample in samples {
            total.instances += 1;
            total.queue_depth = total.queue_depth.max(sample.queue_depth);
            total.avg_cpu += sample.cpu_usage;
            memory += sample.memory_bytes;
            total.tasks_per_second += sample.tasks_per_second;
            total.avg_latency_ms += sample.avg_latency_ms;
            total.error_rate += sample.error_rate;
        }

        if total.instances > 0 {
            let n = total.instances as f64;
            total.avg_cpu /= n;
            total.avg_latency_ms /= n;
            total.error_rate /= n;
            total.avg_memory_bytes = memory / total.instances as u64;
        }
        total
    }
}

/// 评估一个Worker类型的策略，每次最多给出一个动作（扩容优先）
pub fn evaluate(
    policy: &ScalingPolicy,
    metrics: &TypeMetrics,
    current: usize,
    now: DateTime<Utc>,
) -> ScalingDecision {
    if let Some(reason) = scale_up_reason(policy, metrics, current) {
        if current >= policy.max_instances {
            return ScalingDecision::none(format!(
                "{reason}，但已达到最大实例数 {}",
                policy.max_instances
            ));
        }
        if policy.scale_up_cooled_down(now) {
            return ScalingDecision {
                action: ScalingAction::ScaleUp,
                reason,
            };
        }
        return ScalingDecision::none(format!("{reason}，扩容冷却中"));
    }

    if should_scale_down(policy, metrics) {
        // 没有覆盖全部运行实例的样本时，空队列可能只是还没采集
        if metrics.instances == 0 || metrics.instances < current {
            return ScalingDecision::none(format!(
                "指标样本 {} 个少于运行实例 {} 个，暂不缩容",
                metrics.instances, current
            ));
        }
        if current <= policy.min_instances {
            return ScalingDecision::none("空闲，但已是最小实例数");
        }
        if policy.scale_down_cooled_down(now) {
            return ScalingDecision {
                action: ScalingAction::ScaleDown,
                reason: format!(
                    "队列为空且CPU {:.1}% 低于阈值 {:.1}%",
                    metrics.avg_cpu, policy.scale_down_threshold
                ),
            };
        }
        return ScalingDecision::none("空闲，缩容冷却中");
    }

    ScalingDecision::none("指标在阈值范围内")
}

fn scale_up_reason(policy: &ScalingPolicy, metrics: &TypeMetrics, current: usize) -> Option<String> {
    if current < policy.min_instances {
        return Some(format!(
            "运行实例数 {} 低于最小实例数 {}",
            current, policy.min_instances
        ));
    }
    if metrics.queue_depth > policy.target_queue_length {
        return Some(format!(
            "队列深度 {} 超过目标 {}",
            metrics.queue_depth, policy.target_queue_length
        ));
    }
    if metrics.avg_cpu > policy.scale_up_threshold {
        return Some(format!(
            "CPU {:.1}% 超过扩容阈值 {:.1}%",
            metrics.avg_cpu, policy.scale_up_threshold
        ));
    }
    if metrics.error_rate > ERROR_RATE_CEILING {
        return Some(format!(
            "错误率 {:.2} 超过上限 {:.2}",
            metrics.error_rate, ERROR_RATE_CEILING
        ));
    }
    None
}

fn should_scale_down(policy: &ScalingPolicy, metrics: &TypeMetrics) -> bool {
    metrics.queue_depth == 0
        && metrics.avg_cpu < policy.scale_down_threshold
        && metrics.tasks_per_second < IDLE_THROUGHPUT_EPSILON
}
