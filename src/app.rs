use std::sync::Arc;

use anyhow::{Context, Result};
use taskq_autoscaler::Autoscaler;
use taskq_core::config::AppConfig;
use taskq_core::models::InstanceConfig;
use taskq_core::traits::QueueStore;
use taskq_infrastructure::{QueueStoreFactory, TaskProducer};
use taskq_worker::{HandlerCatalog, LoggingHandler, WorkerManager};
use tokio::sync::broadcast;
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 按配置创建初始实例并运行自动扩缩容器
    Fleet,
    /// 只运行一个独立的Worker实例
    Worker(InstanceConfig),
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    store: Arc<dyn QueueStore>,
    manager: Arc<WorkerManager>,
    producer: TaskProducer,
}

impl Application {
    /// 使用内置日志处理器创建应用
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        Self::with_catalog(config, mode, LoggingHandler::catalog()).await
    }

    pub async fn with_catalog(
        config: AppConfig,
        mode: AppMode,
        catalog: HandlerCatalog,
    ) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let store = QueueStoreFactory::create(&config.redis, &config.queue)
            .await
            .context("创建队列存储失败")?;

        let manager = Arc::new(WorkerManager::new(
            store.clone(),
            catalog,
            config.worker.clone(),
            config.monitor.clone(),
        ));
        let producer = TaskProducer::new(store.clone());

        Ok(Self {
            config,
            mode,
            store,
            manager,
            producer,
        })
    }

    pub fn manager(&self) -> &Arc<WorkerManager> {
        &self.manager
    }

    pub fn producer(&self) -> &TaskProducer {
        &self.producer
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// 运行到收到关闭信号，然后停止所有实例
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match &self.mode {
            AppMode::Fleet => self.run_fleet(shutdown_rx).await,
            AppMode::Worker(instance) => self.run_worker(instance.clone(), shutdown_rx).await,
        }
    }

    async fn run_fleet(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        for instance in &self.config.instances {
            self.manager
                .create_and_start(instance.clone())
                .await
                .with_context(|| format!("启动初始实例失败: {}", instance.name))?;
        }
        info!(instances = self.config.instances.len(), "初始实例已启动");

        let autoscaler_handle = if self.config.autoscaler.enabled {
            let autoscaler = Arc::new(Autoscaler::new(
                Arc::clone(&self.manager),
                self.config.autoscaler.clone(),
            ));
            let shutdown_rx = shutdown_rx.resubscribe();
            Some(tokio::spawn(autoscaler.run(shutdown_rx)))
        } else {
            info!("自动扩缩容已禁用");
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("Fleet收到关闭信号");

        if let Some(handle) = autoscaler_handle {
            if let Err(e) = handle.await {
                error!("自动扩缩容器退出异常: {}", e);
            }
        }
        self.manager.stop_all().await;

        info!("Fleet已停止");
        Ok(())
    }

    async fn run_worker(
        &self,
        instance: InstanceConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let name = instance.name.clone();
        self.manager
            .create_and_start(instance)
            .await
            .with_context(|| format!("启动Worker实例失败: {name}"))?;

        let _ = shutdown_rx.recv().await;
        info!(instance = %name, "Worker收到关闭信号");

        self.manager.stop(&name).await?;
        info!(instance = %name, "Worker服务已停止");
        Ok(())
    }
}
