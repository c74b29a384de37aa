//! Worker实例
//!
//! 一个实例拥有自己的处理器注册表、监控器和统计信息，启动后运行
//! N 个消费循环、一个统计刷新循环、可选的回收器以及健康检查端点。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use metrics_exporter_prometheus::PrometheusHandle;
use taskq_core::config::{MonitorConfig, WorkerConfig};
use taskq_core::models::{InstanceConfig, InstanceState, WorkerStats, WorkerType};
use taskq_core::traits::QueueStore;
use taskq_core::{Result, TaskQueueError};
use taskq_infrastructure::observability::{init_metrics, TaskMetrics};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::components::health::{create_health_routes, HealthState};
use crate::components::monitor::{HealthReport, QueueMonitor};
use crate::components::reaper::Reaper;
use crate::components::worker_loop::{LoopSettings, LoopShared, WorkerLoop};
use crate::registry::HandlerRegistry;

/// 运行期间持有的后台任务
struct RunningTasks {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerInstance {
    config: InstanceConfig,
    queues: Vec<String>,
    store: Arc<dyn QueueStore>,
    registry: Arc<HandlerRegistry>,
    monitor: Arc<QueueMonitor>,
    stats: Arc<RwLock<WorkerStats>>,
    state: Arc<RwLock<InstanceState>>,
    worker_config: WorkerConfig,
    monitor_config: MonitorConfig,
    metrics: TaskMetrics,
    prometheus: Option<PrometheusHandle>,
    running: Mutex<Option<RunningTasks>>,
}

impl WorkerInstance {
    pub fn new(
        config: InstanceConfig,
        store: Arc<dyn QueueStore>,
        registry: HandlerRegistry,
        worker_config: WorkerConfig,
        monitor_config: MonitorConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| TaskQueueError::Configuration(e.to_string()))?;

        let queues = config.effective_queues();
        let stats = Arc::new(RwLock::new(WorkerStats {
            concurrency: config.concurrency,
            ..WorkerStats::default()
        }));
        let monitor = Arc::new(QueueMonitor::new(
            store.clone(),
            queues.clone(),
            monitor_config.clone(),
            stats.clone(),
        ));
        let prometheus = match init_metrics() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(instance = %config.name, "指标导出不可用: {}", e);
                None
            }
        };

        Ok(Self {
            metrics: TaskMetrics::new(config.name.clone()),
            config,
            queues,
            store,
            registry: Arc::new(registry),
            monitor,
            stats,
            state: Arc::new(RwLock::new(InstanceState::Created)),
            worker_config,
            monitor_config,
            prometheus,
            running: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn worker_type(&self) -> WorkerType {
        self.config.worker_type
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub async fn state(&self) -> InstanceState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.state().await.is_running()
    }

    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    pub async fn health(&self) -> HealthReport {
        self.monitor.check_all().await
    }

    /// 启动实例；已在运行（或正在停止）时返回错误且不做任何修改
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if matches!(*state, InstanceState::Running | InstanceState::Stopping) {
            return Err(TaskQueueError::AlreadyRunning {
                name: self.config.name.clone(),
            });
        }

        // 端口绑定失败时实例保持原状态
        let listener = if self.config.health_port != 0 {
            let listener = TcpListener::bind(("0.0.0.0", self.config.health_port))
                .await
                .map_err(|e| {
                    TaskQueueError::Network(format!(
                        "绑定健康检查端口 {} 失败: {}",
                        self.config.health_port, e
                    ))
                })?;
            Some(listener)
        } else {
            None
        };

        let handler_types = self.registry.task_types().await;
        info!(
            instance = %self.config.name,
            worker_type = %self.config.worker_type,
            concurrency = self.config.concurrency,
            queues = ?self.queues,
            handlers = ?handler_types,
            "启动Worker实例"
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = Vec::new();

        let shared = Arc::new(LoopShared {
            instance_name: self.config.name.clone(),
            queues: self.queues.clone(),
            store: self.store.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            metrics: self.metrics.clone(),
            settings: LoopSettings {
                poll_interval: self.worker_config.poll_interval(),
                task_timeout: self.worker_config.task_timeout(),
                blocking_timeout: self.worker_config.blocking_consume_timeout(),
            },
        });
        for index in 0..self.config.concurrency {
            let worker = WorkerLoop::new(shared.clone(), index);
            handles.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));
        }

        handles.push(tokio::spawn(refresh_loop(
            self.store.clone(),
            self.queues.clone(),
            self.stats.clone(),
            self.metrics.clone(),
            self.worker_config.stats_refresh_interval(),
            shutdown_tx.subscribe(),
        )));

        if self.monitor_config.reaper_enabled {
            let reaper = Reaper::new(
                self.store.clone(),
                self.queues.clone(),
                self.monitor_config.clone(),
                self.metrics.clone(),
            );
            handles.push(tokio::spawn(reaper.run(shutdown_tx.subscribe())));
        }

        if let Some(listener) = listener {
            let app = create_health_routes(HealthState {
                instance_name: self.config.name.clone(),
                state: self.state.clone(),
                monitor: self.monitor.clone(),
                stats: self.stats.clone(),
                store: self.store.clone(),
                prometheus: self.prometheus.clone(),
                error_rate_threshold: self.monitor_config.error_rate_threshold,
            });
            let mut shutdown_rx = shutdown_tx.subscribe();
            let name = self.config.name.clone();
            let port = self.config.health_port;
            handles.push(tokio::spawn(async move {
                info!(instance = %name, port, "健康检查端点已启动");
                let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                });
                if let Err(e) = server.await {
                    error!(instance = %name, "健康检查服务异常退出: {}", e);
                }
            }));
        }

        *self.running.lock().await = Some(RunningTasks {
            shutdown_tx,
            handles,
        });
        *state = InstanceState::Running;
        info!(instance = %self.config.name, "Worker实例已启动");
        Ok(())
    }

    /// 停止实例：广播停止信号，在宽限期内等待循环完成当前任务后退出。
    /// 实例未运行时为空操作。
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.is_running() {
                return Ok(());
            }
            *state = InstanceState::Stopping;
        }

        info!(instance = %self.config.name, "停止Worker实例");
        if let Some(running) = self.running.lock().await.take() {
            let _ = running.shutdown_tx.send(());

            let abort_handles: Vec<_> = running.handles.iter().map(|h| h.abort_handle()).collect();
            let grace = self.worker_config.stop_grace();
            if tokio::time::timeout(grace, join_all(running.handles))
                .await
                .is_err()
            {
                warn!(
                    instance = %self.config.name,
                    grace_seconds = grace.as_secs(),
                    "宽限期内未能全部退出，强制中止剩余任务"
                );
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }

        *self.state.write().await = InstanceState::Stopped;
        info!(instance = %self.config.name, "Worker实例已停止");
        Ok(())
    }

    /// 立即刷新一次队列深度与指标
    pub async fn refresh_stats(&self) {
        refresh_stats(&self.store, &self.queues, &self.stats, &self.metrics).await;
    }
}

async fn refresh_stats(
    store: &Arc<dyn QueueStore>,
    queues: &[String],
    stats: &Arc<RwLock<WorkerStats>>,
    metrics: &TaskMetrics,
) {
    let mut depths = Vec::with_capacity(queues.len());
    for queue in queues {
        match store.get_queue_stats(queue).await {
            Ok(queue_stats) => {
                metrics.set_queue_depth(queue, queue_stats.pending);
                depths.push((queue.clone(), queue_stats.pending));
            }
            Err(e) => warn!(queue = %queue, "刷新队列深度失败: {}", e),
        }
    }

    let mut stats = stats.write().await;
    for (queue, depth) in depths {
        stats.queue_depths.insert(queue, depth);
    }
    stats.last_updated = Some(Utc::now());
    metrics.set_avg_latency(stats.avg_latency_ms());
    metrics.set_busy_loops(stats.busy_loops);
}

async fn refresh_loop(
    store: Arc<dyn QueueStore>,
    queues: Vec<String>,
    stats: Arc<RwLock<WorkerStats>>,
    metrics: TaskMetrics,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => refresh_stats(&store, &queues, &stats, &metrics).await,
            _ = shutdown_rx.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::LoggingHandler;
    use taskq_infrastructure::InMemoryTaskQueue;

    async fn instance(name: &str) -> WorkerInstance {
        let registry = LoggingHandler::catalog()
            .registry_for(WorkerType::Notification)
            .await
            .unwrap();
        WorkerInstance::new(
            InstanceConfig::new(name, WorkerType::Notification),
            Arc::new(InMemoryTaskQueue::default()),
            registry,
            WorkerConfig {
                poll_interval_ms: 10,
                ..WorkerConfig::default()
            },
            MonitorConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_and_restart() {
        let instance = instance("lifecycle").await;
        assert_eq!(instance.state().await, InstanceState::Created);
        assert_eq!(instance.queues(), ["notification".to_string()]);

        // 未运行时停止为空操作
        instance.stop().await.unwrap();
        assert_eq!(instance.state().await, InstanceState::Created);

        instance.start().await.unwrap();
        assert!(instance.is_running().await);
        let err = instance.start().await.unwrap_err();
        assert!(matches!(err, TaskQueueError::AlreadyRunning { .. }));

        instance.stop().await.unwrap();
        assert_eq!(instance.state().await, InstanceState::Stopped);

        instance.start().await.unwrap();
        assert!(instance.is_running().await);
        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = WorkerInstance::new(
            InstanceConfig::new("zero", WorkerType::General).with_concurrency(0),
            Arc::new(InMemoryTaskQueue::default()),
            HandlerRegistry::new(),
            WorkerConfig::default(),
            MonitorConfig::default(),
        );
        assert!(matches!(result, Err(TaskQueueError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_refresh_stats_records_queue_depths() {
        let instance = instance("depths").await;
        instance
            .store
            .publish(
                "notification",
                taskq_core::models::Task::new(
                    taskq_core::models::TaskType::Notification,
                    Default::default(),
                ),
            )
            .await
            .unwrap();

        instance.refresh_stats().await;
        let stats = instance.stats().await;
        assert_eq!(stats.queue_depths.get("notification"), Some(&1));
        assert_eq!(stats.concurrency, 2);
        assert!(stats.last_updated.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_and_stop_run_on_spawned_tasks() {
        let instance = Arc::new(instance("spawned").await);

        let started = {
            let instance = instance.clone();
            tokio::spawn(async move { instance.start().await })
        };
        started.await.unwrap().unwrap();
        assert!(instance.is_running().await);

        let stopped = {
            let instance = instance.clone();
            tokio::spawn(async move { instance.stop().await })
        };
        stopped.await.unwrap().unwrap();
        assert_eq!(instance.state().await, InstanceState::Stopped);
    }
}
