use anyhow::Result;
use clap::{Arg, Command};
use taskq::app::{AppMode, Application};
use taskq::common::{init_logging, load_config, run_until_shutdown};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskq")
        .version(env!("CARGO_PKG_VERSION"))
        .about("告警任务队列 - Worker集群与自动扩缩容")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（默认依次查找 config/taskq.toml、taskq.toml、/etc/taskq/config.toml）"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("pretty");

    init_logging(log_level, log_format)?;

    info!("启动告警任务队列");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let config = load_config(config_path)?;
    info!(
        backend = ?config.queue.backend,
        instances = config.instances.len(),
        autoscaler = config.autoscaler.enabled,
        "配置加载完成"
    );

    let app = Application::new(config, AppMode::Fleet).await?;
    run_until_shutdown(app, "taskq").await
}
