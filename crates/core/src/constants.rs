/// 默认最大重试次数
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// 任务与结果记录的默认保留时间（24小时）
pub const DEFAULT_RECORD_TTL_SECONDS: u64 = 24 * 60 * 60;

/// 错误率的固定扩容上限
pub const ERROR_RATE_CEILING: f64 = 0.10;

/// 吞吐量低于该值（任务/秒）视为空闲
pub const IDLE_THROUGHPUT_EPSILON: f64 = 0.01;

/// 内置队列名称
pub mod queues {
    pub const DEFAULT: &str = "default";
    pub const AI_ANALYSIS: &str = "ai_analysis";
    pub const NOTIFICATION: &str = "notification";
    pub const CONFIG_SYNC: &str = "config_sync";

    pub const ALL: [&str; 4] = [DEFAULT, AI_ANALYSIS, NOTIFICATION, CONFIG_SYNC];
}
