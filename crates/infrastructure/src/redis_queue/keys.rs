/// 单个队列的分区键
#[derive(Debug, Clone)]
pub struct QueueKeys {
    pub ready: String,
    pub delayed: String,
    pub processing: String,
    pub dead: String,
    pub completed: String,
    pub failed: String,
    pub wake: String,
}

/// Redis键空间
///
/// - `{prefix}:{queue}:ready|delayed|processing|dead` 有序集合
/// - `{prefix}:{queue}:completed|failed` 计数器
/// - `{prefix}:{queue}:wake` 阻塞消费的唤醒信号列表
/// - `{prefix}:task:{id}` / `{prefix}:result:{id}` JSON记录
/// - `{prefix}:seq` 全局发布序号
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn queue(&self, queue: &str) -> QueueKeys {
        let base = format!("{}:{}", self.prefix, queue);
        QueueKeys {
            ready: format!("{base}:ready"),
            delayed: format!("{base}:delayed"),
            processing: format!("{base}:processing"),
            dead: format!("{base}:dead"),
            completed: format!("{base}:completed"),
            failed: format!("{base}:failed"),
            wake: format!("{base}:wake"),
        }
    }

    pub fn task(&self, id: &str) -> String {
        format!("{}:task:{}", self.prefix, id)
    }

    pub fn result(&self, id: &str) -> String {
        format!("{}:result:{}", self.prefix, id)
    }

    pub fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::new("taskq");
        let queue = keys.queue("ai_analysis");
        assert_eq!(queue.ready, "taskq:ai_analysis:ready");
        assert_eq!(queue.dead, "taskq:ai_analysis:dead");
        assert_eq!(keys.task("t-1"), "taskq:task:t-1");
        assert_eq!(keys.result("t-1"), "taskq:result:t-1");
        assert_eq!(keys.seq(), "taskq:seq");
    }
}
