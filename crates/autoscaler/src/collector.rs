use std::collections::HashMap;

use chrono::{DateTime, Utc};
use taskq_core::models::WorkerMetrics;
use taskq_worker::WorkerManager;
use tokio::sync::RwLock;
use tracing::debug;

/// 上一次采样时的已处理任务数
#[derive(Debug, Clone, Copy)]
struct ProcessedSample {
    processed: u64,
    at: DateTime<Utc>,
}

/// 实例指标采集器
///
/// 每次采集刷新所有运行中实例的队列深度，按实例名保存最新样本；
/// 已移除或停止的实例的样本随之丢弃。
#[derive(Default)]
pub struct MetricsCollector {
    latest: RwLock<HashMap<String, WorkerMetrics>>,
    previous: RwLock<HashMap<String, ProcessedSample>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn collect(&self, manager: &WorkerManager) -> Vec<WorkerMetrics> {
        let now = Utc::now();
        let memory_bytes = process_memory_bytes();
        let mut collected = HashMap::new();

        let mut previous = self.previous.write().await;
        for instance in manager.list().await {
            if !instance.is_running().await {
                continue;
            }
            instance.refresh_stats().await;
            let stats = instance.stats().await;

            let tasks_per_second = match previous.get(instance.name()) {
                Some(prev) => {
                    let seconds = (now - prev.at).num_milliseconds() as f64 / 1000.0;
                    if seconds > 0.0 {
                        stats.processed.saturating_sub(prev.processed) as f64 / seconds
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };
            previous.insert(
                instance.name().to_string(),
                ProcessedSample {
                    processed: stats.processed,
                    at: now,
                },
            );

            collected.insert(
                instance.name().to_string(),
                WorkerMetrics {
                    instance_name: instance.name().to_string(),
                    worker_type: instance.worker_type(),
                    cpu_usage: stats.cpu_usage(),
                    memory_bytes,
                    tasks_per_second,
                    avg_latency_ms: stats.avg_latency_ms(),
                    queue_depth: stats.total_queue_depth(),
                    error_rate: stats.error_rate(),
                    processed: stats.processed,
                    collected_at: now,
                },
            );
        }
        previous.retain(|name, _| collected.contains_key(name));
        drop(previous);

        debug!(instances = collected.len(), "采集实例指标");
        let mut samples: Vec<WorkerMetrics> = collected.values().cloned().collect();
        samples.sort_by(|a, b| a.instance_name.cmp(&b.instance_name));
        *self.latest.write().await = collected;
        samples
    }

    /// 最近一次采集的样本
    pub async fn latest(&self) -> Vec<WorkerMetrics> {
        let mut samples: Vec<WorkerMetrics> = self.latest.read().await.values().cloned().collect();
        samples.sort_by(|a, b| a.instance_name.cmp(&b.instance_name));
        samples
    }
}

/// 进程常驻内存（字节），非Linux平台返回0
pub fn process_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| parse_vm_rss(&status))
            .unwrap_or(0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\ttaskq\nVmPeak:\t  20000 kB\nVmRSS:\t   1536 kB\nThreads:\t8\n";
        assert_eq!(parse_vm_rss(status), Some(1536 * 1024));
        assert_eq!(parse_vm_rss("Name:\ttaskq\n"), None);
    }
}
