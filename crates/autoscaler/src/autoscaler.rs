use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use taskq_core::config::AutoscalerConfig;
use taskq_core::models::{
    InstanceConfig, ScalingAction, ScalingEvent, ScalingPolicy, WorkerMetrics, WorkerType,
};
use taskq_core::Result;
use taskq_worker::WorkerManager;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::collector::MetricsCollector;
use crate::policy::{evaluate, TypeMetrics};

/// 自动扩缩容器
///
/// 采集循环按实例保存最新指标；评估循环按Worker类型汇总指标并评估策略，
/// 每个类型每轮最多执行一个动作。
pub struct Autoscaler {
    manager: Arc<WorkerManager>,
    config: AutoscalerConfig,
    policies: RwLock<HashMap<WorkerType, ScalingPolicy>>,
    collector: MetricsCollector,
    history: RwLock<VecDeque<ScalingEvent>>,
}

impl Autoscaler {
    pub fn new(manager: Arc<WorkerManager>, config: AutoscalerConfig) -> Self {
        let policies = config
            .policies
            .iter()
            .map(|policy| (policy.worker_type, policy.clone()))
            .collect();
        Self {
            manager,
            config,
            policies: RwLock::new(policies),
            collector: MetricsCollector::new(),
            history: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn policies(&self) -> Vec<ScalingPolicy> {
        let mut policies: Vec<_> = self.policies.read().await.values().cloned().collect();
        policies.sort_by_key(|p| p.worker_type.as_str());
        policies
    }

    /// 替换某Worker类型的策略（冷却时间戳保留）
    pub async fn set_policy(&self, mut policy: ScalingPolicy) -> Result<()> {
        policy
            .validate()
            .map_err(|e| taskq_core::TaskQueueError::Configuration(e.to_string()))?;
        let mut policies = self.policies.write().await;
        if let Some(existing) = policies.get(&policy.worker_type) {
            policy.last_scale_up = existing.last_scale_up;
            policy.last_scale_down = existing.last_scale_down;
        }
        policies.insert(policy.worker_type, policy);
        Ok(())
    }

    /// 按时间顺序返回扩缩容历史
    pub async fn history(&self) -> Vec<ScalingEvent> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn latest_metrics(&self) -> Vec<WorkerMetrics> {
        self.collector.latest().await
    }

    pub async fn collect_once(&self) -> Vec<WorkerMetrics> {
        self.collector.collect(&self.manager).await
    }

    /// 评估所有策略，返回本轮执行的动作
    pub async fn evaluate_once(&self) -> Vec<ScalingEvent> {
        let samples = self.collector.latest().await;
        let mut worker_types: Vec<WorkerType> = self.policies.read().await.keys().copied().collect();
        worker_types.sort_by_key(|t| t.as_str());

        let mut events = Vec::new();
        for worker_type in worker_types {
            let metrics = TypeMetrics::aggregate(
                samples.iter().filter(|s| s.worker_type == worker_type),
            );
            if let Some(event) = self.evaluate_type(worker_type, &metrics).await {
                events.push(event);
            }
        }
        events
    }

    async fn evaluate_type(&self, worker_type: WorkerType, metrics: &TypeMetrics) -> Option<ScalingEvent> {
        let now = Utc::now();
        let current = self.manager.running_count(worker_type).await;
        let policy = self.policies.read().await.get(&worker_type).cloned()?;

        let decision = evaluate(&policy, metrics, current, now);
        debug!(
            worker_type = %worker_type,
            current,
            action = ?decision.action,
            reason = %decision.reason,
            "评估扩缩容策略"
        );

        let event = match decision.action {
            ScalingAction::None => return None,
            ScalingAction::ScaleUp => self.scale_up(worker_type, current, decision.reason).await,
            ScalingAction::ScaleDown => {
                self.scale_down(worker_type, current, decision.reason).await?
            }
        };

        // 只在动作成功后进入冷却
        if event.success {
            if let Some(policy) = self.policies.write().await.get_mut(&worker_type) {
                match event.action {
                    ScalingAction::ScaleUp => policy.last_scale_up = Some(event.timestamp),
                    ScalingAction::ScaleDown => policy.last_scale_down = Some(event.timestamp),
                    ScalingAction::None => {}
                }
            }
        }
        self.record(event.clone()).await;
        Some(event)
    }

    async fn scale_up(&self, worker_type: WorkerType, current: usize, reason: String) -> ScalingEvent {
        let name = self.next_instance_name(worker_type).await;
        let health_port = self.next_health_port().await;
        let config = InstanceConfig::new(name.clone(), worker_type)
            .with_concurrency(self.config.default_concurrency)
            .with_health_port(health_port);

        info!(worker_type = %worker_type, instance = %name, reason = %reason, "扩容");
        let result = self.manager.create_and_start(config).await;
        let success = result.is_ok();
        if let Err(e) = &result {
            error!(worker_type = %worker_type, instance = %name, "扩容失败: {}", e);
        }

        ScalingEvent {
            worker_type,
            action: ScalingAction::ScaleUp,
            instance_name: Some(name),
            reason,
            from_count: current,
            to_count: if success { current + 1 } else { current },
            success,
            error: result.err().map(|e| e.to_string()),
            timestamp: Utc::now(),
        }
    }

    /// 选择一个没有在途任务的实例停止并移除；全部忙碌时本轮不缩容
    async fn scale_down(&self, worker_type: WorkerType, current: usize, reason: String) -> Option<ScalingEvent> {
        let mut candidate = None;
        for instance in self.manager.instances_of_type(worker_type).await.into_iter().rev() {
            if instance.is_running().await && instance.stats().await.is_idle() {
                candidate = Some(instance);
                break;
            }
        }

        let Some(instance) = candidate else {
            warn!(worker_type = %worker_type, "没有空闲实例可供缩容");
            return None;
        };
        let name = instance.name().to_string();

        info!(worker_type = %worker_type, instance = %name, reason = %reason, "缩容");
        let result = self.manager.remove(&name).await;
        let success = result.is_ok();
        if let Err(e) = &result {
            error!(worker_type = %worker_type, instance = %name, "缩容失败: {}", e);
        }

        Some(ScalingEvent {
            worker_type,
            action: ScalingAction::ScaleDown,
            instance_name: Some(name),
            reason,
            from_count: current,
            to_count: if success { current.saturating_sub(1) } else { current },
            success,
            error: result.err().map(|e| e.to_string()),
            timestamp: Utc::now(),
        })
    }

    async fn record(&self, event: ScalingEvent) {
        let action = match event.action {
            ScalingAction::ScaleUp => "scale_up",
            ScalingAction::ScaleDown => "scale_down",
            ScalingAction::None => "none",
        };
        counter!(
            "taskq_scaling_events_total",
            "worker_type" => event.worker_type.as_str(),
            "action" => action,
            "success" => event.success.to_string()
        )
        .increment(1);

        let mut history = self.history.write().await;
        history.push_back(event);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    async fn next_instance_name(&self, worker_type: WorkerType) -> String {
        let base = format!("{}-auto-{}", worker_type.as_str(), Utc::now().timestamp_millis());
        let mut name = base.clone();
        let mut suffix = 1;
        while self.manager.get(&name).await.is_some() {
            name = format!("{base}-{suffix}");
            suffix += 1;
        }
        name
    }

    /// 从起始端口开始找第一个未被任何实例占用的端口
    async fn next_health_port(&self) -> u16 {
        let base = self.config.base_health_port;
        if base == 0 {
            return 0;
        }
        let used: HashSet<u16> = self
            .manager
            .list()
            .await
            .iter()
            .map(|instance| instance.config().health_port)
            .collect();
        (base..=u16::MAX).find(|port| !used.contains(port)).unwrap_or(0)
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut collect_ticker = interval(self.config.collect_interval());
        let mut evaluate_ticker = interval(self.config.evaluate_interval());
        info!(
            collect_seconds = self.config.collect_interval_seconds,
            evaluate_seconds = self.config.evaluate_interval_seconds,
            "自动扩缩容器启动"
        );

        // 第一次评估前先有一份样本
        self.collect_once().await;
        collect_ticker.tick().await;

        loop {
            tokio::select! {
                _ = collect_ticker.tick() => {
                    self.collect_once().await;
                }
                _ = evaluate_ticker.tick() => {
                    let events = self.evaluate_once().await;
                    if !events.is_empty() {
                        info!(actions = events.len(), "本轮扩缩容完成");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("自动扩缩容器退出");
                    break;
                }
            }
        }
    }
}
