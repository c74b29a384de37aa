use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskq_core::config::AppConfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::Application;
use crate::shutdown::ShutdownManager;

/// 收到关闭信号后等待应用退出的最长时间
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 初始化日志系统，`RUST_LOG` 优先于 `log_level`
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载应用配置；显式指定的配置文件必须存在
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    if let Some(path) = config_path {
        if !Path::new(path).exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", path));
        }
    }

    AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })
}

/// 运行应用直到收到关闭信号，随后在限定时间内优雅关闭
pub async fn run_until_shutdown(app: Application, service_name: &str) -> Result<()> {
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        _ = app_finished(&app_handle) => {}
    }

    info!("开始优雅关闭 {}...", service_name);
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(Ok(()))) => info!("{} 服务已优雅关闭", service_name),
        Ok(Ok(Err(e))) => {
            error!("{} 服务运行失败: {:#}", service_name, e);
            return Err(e);
        }
        Ok(Err(e)) => error!("{} 服务任务异常退出: {}", service_name, e),
        Err(_) => warn!("{} 服务关闭超时，强制退出", service_name),
    }

    Ok(())
}

/// 应用任务提前结束（例如启动失败）时返回
async fn app_finished<T>(handle: &tokio::task::JoinHandle<T>) {
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// 等待关闭信号（Ctrl+C 或 SIGTERM）
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.unwrap_or_else(|e| {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::process::exit(1);
        })
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::process::exit(1);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_explicit_config_is_error() {
        let err = load_config(Some("/nonexistent/taskq.toml")).unwrap_err();
        assert!(err.to_string().contains("配置文件不存在"));
    }

    #[test]
    fn test_load_explicit_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[queue]\nbackend = \"memory\"\n\n[worker]\nconcurrency = 4").unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.worker.concurrency, 4);
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        assert!(init_logging("info", "xml").is_err());
    }
}
