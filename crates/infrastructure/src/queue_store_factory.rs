use std::sync::Arc;

use taskq_core::config::{QueueBackend, QueueConfig, RedisConfig};
use taskq_core::traits::QueueStore;
use taskq_core::Result;
use tracing::{debug, info};

use crate::{InMemoryTaskQueue, RedisTaskQueue};

/// 按配置创建队列存储
pub struct QueueStoreFactory;

impl QueueStoreFactory {
    pub async fn create(
        redis: &RedisConfig,
        queue: &QueueConfig,
    ) -> Result<Arc<dyn QueueStore>> {
        debug!("Creating queue store with backend: {:?}", queue.backend);

        match queue.backend {
            QueueBackend::Redis => {
                info!("Initializing Redis task queue");
                let store = RedisTaskQueue::connect(redis, queue.clone()).await?;
                Ok(Arc::new(store))
            }
            QueueBackend::Memory => {
                info!("Initializing in-memory task queue");
                Ok(Arc::new(InMemoryTaskQueue::new(queue.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_backend() {
        let queue = QueueConfig {
            backend: QueueBackend::Memory,
            ..QueueConfig::default()
        };
        let store = QueueStoreFactory::create(&RedisConfig::default(), &queue)
            .await
            .unwrap();
        assert_eq!(store.backend_name(), "memory");
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails() {
        let redis = RedisConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connection_timeout_seconds: 1,
            ..RedisConfig::default()
        };
        let result = QueueStoreFactory::create(&redis, &QueueConfig::default()).await;
        assert!(result.is_err());
    }
}
