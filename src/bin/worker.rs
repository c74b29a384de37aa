use anyhow::Result;
use clap::{Arg, Command};
use taskq::app::{AppMode, Application};
use taskq::common::{init_logging, load_config, run_until_shutdown};
use taskq_core::models::{InstanceConfig, WorkerType};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // 缺少 --name 时clap打印用法并以非零状态退出
    let matches = Command::new("taskq-worker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("告警任务队列 - 独立Worker进程")
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .value_name("NAME")
                .help("Worker实例名称")
                .required(true),
        )
        .arg(
            Arg::new("type")
                .short('t')
                .long("type")
                .value_name("TYPE")
                .help("Worker类型: ai-analysis / notification / config-sync / general")
                .default_value("general"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_name("COUNT")
                .help("并发消费循环数")
                .value_parser(clap::value_parser!(usize))
                .default_value("2"),
        )
        .arg(
            Arg::new("queues")
                .short('q')
                .long("queues")
                .value_name("QUEUES")
                .help("逗号分隔的队列列表，默认使用Worker类型的默认队列")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("health-port")
                .long("health-port")
                .value_name("PORT")
                .help("健康检查端口，0 表示不启动")
                .value_parser(clap::value_parser!(u16))
                .default_value("8081"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
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

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("pretty");
    init_logging(log_level, log_format)?;

    let name = matches
        .get_one::<String>("name")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("缺少实例名称"))?;
    let worker_type = matches
        .get_one::<String>("type")
        .map(|t| WorkerType::from(t.as_str()))
        .unwrap_or_default();
    let concurrency = matches.get_one::<usize>("concurrency").copied().unwrap_or(2);
    let health_port = matches.get_one::<u16>("health-port").copied().unwrap_or(8081);
    let queues: Vec<String> = matches
        .get_many::<String>("queues")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let config = load_config(matches.get_one::<String>("config").map(String::as_str))?;

    let instance = InstanceConfig::new(name, worker_type)
        .with_concurrency(concurrency)
        .with_queues(queues)
        .with_health_port(health_port);
    instance.validate()?;

    info!(
        instance = %instance.name,
        worker_type = %instance.worker_type,
        concurrency = instance.concurrency,
        queues = ?instance.effective_queues(),
        health_port = instance.health_port,
        hostname = %hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_default(),
        "启动Worker进程"
    );

    let app = Application::new(config, AppMode::Worker(instance)).await?;
    run_until_shutdown(app, "taskq-worker").await
}
