use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use taskq_core::config::{MonitorConfig, WorkerConfig};
use taskq_core::models::{InstanceConfig, WorkerStats, WorkerType};
use taskq_core::traits::QueueStore;
use taskq_core::{Result, TaskQueueError};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::instance::WorkerInstance;
use crate::registry::HandlerCatalog;

/// 所有实例的汇总统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerStats {
    pub instances: usize,
    pub running: usize,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub busy_loops: usize,
    pub total_concurrency: usize,
    pub by_type: HashMap<WorkerType, usize>,
}

/// Worker实例管理器：按名称管理实例
pub struct WorkerManager {
    instances: RwLock<HashMap<String, Arc<WorkerInstance>>>,
    store: Arc<dyn QueueStore>,
    catalog: HandlerCatalog,
    worker_config: WorkerConfig,
    monitor_config: MonitorConfig,
}

impl WorkerManager {
    pub fn new(
        store: Arc<dyn QueueStore>,
        catalog: HandlerCatalog,
        worker_config: WorkerConfig,
        monitor_config: MonitorConfig,
    ) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            store,
            catalog,
            worker_config,
            monitor_config,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn worker_config(&self) -> &WorkerConfig {
        &self.worker_config
    }

    /// 创建实例（不启动），名称重复时返回错误
    pub async fn create(&self, config: InstanceConfig) -> Result<Arc<WorkerInstance>> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&config.name) {
            return Err(TaskQueueError::InstanceExists { name: config.name });
        }

        let registry = self.catalog.registry_for(config.worker_type).await?;
        let instance = Arc::new(WorkerInstance::new(
            config,
            self.store.clone(),
            registry,
            self.worker_config.clone(),
            self.monitor_config.clone(),
        )?);
        instances.insert(instance.name().to_string(), instance.clone());
        info!(instance = %instance.name(), worker_type = %instance.worker_type(), "创建Worker实例");
        Ok(instance)
    }

    /// 创建并启动实例；启动失败时移除刚创建的实例
    pub async fn create_and_start(&self, config: InstanceConfig) -> Result<Arc<WorkerInstance>> {
        let instance = self.create(config).await?;
        if let Err(e) = instance.start().await {
            self.instances.write().await.remove(instance.name());
            return Err(e);
        }
        Ok(instance)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<WorkerInstance>> {
        self.instances.read().await.get(name).cloned()
    }

    fn not_found(name: &str) -> TaskQueueError {
        TaskQueueError::InstanceNotFound {
            name: name.to_string(),
        }
    }

    /// 按名称排序的实例列表
    pub async fn list(&self) -> Vec<Arc<WorkerInstance>> {
        let mut instances: Vec<_> = self.instances.read().await.values().cloned().collect();
        instances.sort_by(|a, b| a.name().cmp(b.name()));
        instances
    }

    pub async fn instances_of_type(&self, worker_type: WorkerType) -> Vec<Arc<WorkerInstance>> {
        self.list()
            .await
            .into_iter()
            .filter(|instance| instance.worker_type() == worker_type)
            .collect()
    }

    /// 指定类型中正在运行的实例数
    pub async fn running_count(&self, worker_type: WorkerType) -> usize {
        let mut count = 0;
        for instance in self.instances_of_type(worker_type).await {
            if instance.is_running().await {
                count += 1;
            }
        }
        count
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        let instance = self.get(name).await.ok_or_else(|| Self::not_found(name))?;
        instance.start().await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        let instance = self.get(name).await.ok_or_else(|| Self::not_found(name))?;
        instance.stop().await
    }

    /// 停止并移除实例
    pub async fn remove(&self, name: &str) -> Result<()> {
        let instance = self.get(name).await.ok_or_else(|| Self::not_found(name))?;
        instance.stop().await?;
        self.instances.write().await.remove(name);
        info!(instance = name, "移除Worker实例");
        Ok(())
    }

    /// 停止全部实例，单个实例失败不影响其余实例
    pub async fn stop_all(&self) {
        let instances = self.list().await;
        let results = futures::future::join_all(instances.iter().map(|i| i.stop())).await;
        for (instance, result) in instances.iter().zip(results) {
            if let Err(e) = result {
                error!(instance = %instance.name(), "停止Worker实例失败: {}", e);
            }
        }
        info!(count = instances.len(), "所有Worker实例已停止");
    }

    pub async fn aggregate_stats(&self) -> ManagerStats {
        let mut total = ManagerStats::default();
        for instance in self.list().await {
            let stats = instance.stats().await;
            total.instances += 1;
            if instance.is_running().await {
                total.running += 1;
            }
            total.processed += stats.processed;
            total.succeeded += stats.succeeded;
            total.failed += stats.failed;
            total.busy_loops += stats.busy_loops;
            total.total_concurrency += stats.concurrency;
            *total.by_type.entry(instance.worker_type()).or_insert(0) += 1;
        }
        total
    }

    /// 单个实例的统计
    pub async fn instance_stats(&self, name: &str) -> Result<WorkerStats> {
        let instance = self.get(name).await.ok_or_else(|| Self::not_found(name))?;
        Ok(instance.stats().await)
    }
}
