//! Redis Lua 脚本
//!
//! 每次分区迁移都在一个脚本内完成，保证同一任务同时只出现在一个分区中。
//! 就绪分区分值为 `priority * 1e12 + (1e12 - seq)`：优先级高者先出，
//! 同优先级按发布/提升序号先进先出。
//! 更新任务记录时保留原有TTL，已过期的记录不会被重新写入。
//! 就绪分区新增任务时向唤醒列表推入信号（最多保留 `WAKE_CAP` 个），
//! 阻塞消费只等待信号，出队本身始终由 `PROMOTE_AND_CLAIM` 完成。

/// 唤醒列表保留的最大信号数
pub const WAKE_CAP: usize = 64;

/// 发布到就绪分区
/// `KEYS[1]` -> 任务记录键
/// `KEYS[2]` -> 就绪分区
/// `KEYS[3]` -> 全局序号
/// `KEYS[4]` -> 唤醒列表
/// `ARGV[1]` -> 任务JSON
/// `ARGV[2]` -> 记录TTL（秒）
/// `ARGV[3]` -> 任务ID
/// `ARGV[4]` -> 优先级序数
/// `ARGV[5]` -> 唤醒列表上限
/// 返回 1 成功，0 任务ID已存在
pub const ENQUEUE_READY: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return 0
end
redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[2])
local seq = redis.call("INCR", KEYS[3])
local score = tonumber(ARGV[4]) * 1000000000000 + (1000000000000 - seq)
redis.call("ZADD", KEYS[2], string.format("%d", score), ARGV[3])
redis.call("LPUSH", KEYS[4], "1")
redis.call("LTRIM", KEYS[4], 0, tonumber(ARGV[5]) - 1)
return 1
"#;

/// 发布到延迟分区
/// `KEYS[1]` -> 任务记录键
/// `KEYS[2]` -> 延迟分区
/// `ARGV[1]` -> 任务JSON
/// `ARGV[2]` -> 记录TTL（秒）
/// `ARGV[3]` -> 延迟分区成员 `{priority}:{id}`
/// `ARGV[4]` -> 可消费时间（毫秒）
/// 返回 1 成功，0 任务ID已存在
pub const ENQUEUE_DELAYED: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return 0
end
redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[2])
redis.call("ZADD", KEYS[2], ARGV[4], ARGV[3])
return 1
"#;

/// 提升到期延迟任务，弹出最高优先级就绪任务并记入处理中分区
/// `KEYS[1]` -> 延迟分区
/// `KEYS[2]` -> 就绪分区
/// `KEYS[3]` -> 处理中分区
/// `KEYS[4]` -> 全局序号
/// `KEYS[5]` -> 唤醒列表
/// `ARGV[1]` -> 当前时间（毫秒）
/// `ARGV[2]` -> 单次最多提升数量
/// `ARGV[3]` -> 唤醒列表上限
/// 返回任务ID，就绪分区为空时返回nil；弹出后就绪分区仍有任务时唤醒下一个阻塞的消费者
pub const PROMOTE_AND_CLAIM: &str = r#"
local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, tonumber(ARGV[2]))
for _, member in ipairs(due) do
    local sep = string.find(member, ":", 1, true)
    if sep then
        local priority = tonumber(string.sub(member, 1, sep - 1))
        local id = string.sub(member, sep + 1)
        local seq = redis.call("INCR", KEYS[4])
        local score = priority * 1000000000000 + (1000000000000 - seq)
        redis.call("ZADD", KEYS[2], string.format("%d", score), id)
    end
    redis.call("ZREM", KEYS[1], member)
end
local popped = redis.call("ZPOPMAX", KEYS[2])
if #popped == 0 then
    return false
end
redis.call("ZADD", KEYS[3], ARGV[1], popped[1])
if redis.call("ZCARD", KEYS[2]) > 0 then
    redis.call("LPUSH", KEYS[5], "1")
    redis.call("LTRIM", KEYS[5], 0, tonumber(ARGV[3]) - 1)
end
return popped[1]
"#;

/// 确认完成
/// `KEYS[1]` -> 处理中分区
/// `KEYS[2]` -> 任务记录键
/// `KEYS[3]` -> 结果记录键
/// `KEYS[4]` -> 完成计数器
/// `ARGV[1]` -> 任务ID
/// `ARGV[2]` -> 任务JSON
/// `ARGV[3]` -> 结果JSON
/// `ARGV[4]` -> 记录TTL（秒）
/// 返回 1 成功，0 任务不在处理中分区
pub const ACK: &str = r#"
if redis.call("ZREM", KEYS[1], ARGV[1]) == 0 then
    return 0
end
if redis.call("EXISTS", KEYS[2]) == 1 then
    redis.call("SET", KEYS[2], ARGV[2], "KEEPTTL")
end
redis.call("SET", KEYS[3], ARGV[3], "EX", ARGV[4])
redis.call("INCR", KEYS[4])
return 1
"#;

/// 重试：移回延迟分区
/// `KEYS[1]` -> 处理中分区
/// `KEYS[2]` -> 任务记录键
/// `KEYS[3]` -> 延迟分区
/// `ARGV[1]` -> 任务ID
/// `ARGV[2]` -> 任务JSON
/// `ARGV[3]` -> 延迟分区成员
/// `ARGV[4]` -> 可消费时间（毫秒）
/// 返回 1 成功，0 任务不在处理中分区
pub const RETRY: &str = r#"
if redis.call("ZREM", KEYS[1], ARGV[1]) == 0 then
    return 0
end
if redis.call("EXISTS", KEYS[2]) == 1 then
    redis.call("SET", KEYS[2], ARGV[2], "KEEPTTL")
end
redis.call("ZADD", KEYS[3], ARGV[4], ARGV[3])
return 1
"#;

/// 进入死信
/// `KEYS[1]` -> 处理中分区
/// `KEYS[2]` -> 任务记录键
/// `KEYS[3]` -> 死信分区
/// `KEYS[4]` -> 结果记录键
/// `KEYS[5]` -> 失败计数器
/// `ARGV[1]` -> 任务ID
/// `ARGV[2]` -> 任务JSON
/// `ARGV[3]` -> 当前时间（毫秒）
/// `ARGV[4]` -> 结果JSON
/// `ARGV[5]` -> 记录TTL（秒）
/// 返回 1 成功，0 任务不在处理中分区
pub const DEAD_LETTER: &str = r#"
if redis.call("ZREM", KEYS[1], ARGV[1]) == 0 then
    return 0
end
if redis.call("EXISTS", KEYS[2]) == 1 then
    redis.call("SET", KEYS[2], ARGV[2], "KEEPTTL")
end
redis.call("ZADD", KEYS[3], ARGV[3], ARGV[1])
redis.call("SET", KEYS[4], ARGV[4], "EX", ARGV[5])
redis.call("INCR", KEYS[5])
return 1
"#;
