//! Lua scripts run atomically by the hold store.
//!
//! Key layout per pool (`KEYS[1..3]`):
//!
//! | key                 | type | content                          |
//! |---------------------|------|----------------------------------|
//! | `…:pool`            | hash | `capacity`, `reserved`           |
//! | `…:expiry`          | zset | token scored by expiry (ms)      |
//! | `…:qty`             | hash | token → units held               |
//!
//! `KEYS[4]`, where present, is the hold document of one token.

use redis::Script;

/// Drops holds whose expiry is at or before `now_ms`, returning their units.
const PURGE: &str = r"
local function purge(pool, expiry, qty, now_ms)
    local lapsed = redis.call('ZRANGEBYSCORE', expiry, '-inf', now_ms)
    if #lapsed == 0 then
        return
    end
    local freed = 0
    for _, token in ipairs(lapsed) do
        freed = freed + tonumber(redis.call('HGET', qty, token) or '0')
        redis.call('HDEL', qty, token)
    end
    redis.call('ZREMRANGEBYSCORE', expiry, '-inf', now_ms)
    local reserved = tonumber(redis.call('HGET', pool, 'reserved') or '0') - freed
    if reserved < 0 then
        reserved = 0
    end
    redis.call('HSET', pool, 'reserved', reserved)
end
";

/// ARGV: capacity. Keeps `reserved` as is.
const PROVISION: &str = r"
redis.call('HSET', KEYS[1], 'capacity', ARGV[1])
redis.call('HSETNX', KEYS[1], 'reserved', 0)
return 1
";

/// ARGV: quantity, `now_ms`, `expires_ms`, token, hold JSON, `ttl_ms`.
///
/// Returns `{1, remaining}` when granted, `{0, available}` when declined.
const TRY_RESERVE: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {0, 0}
end
purge(KEYS[1], KEYS[2], KEYS[3], ARGV[2])
local capacity = tonumber(redis.call('HGET', KEYS[1], 'capacity') or '0')
local reserved = tonumber(redis.call('HGET', KEYS[1], 'reserved') or '0')
local quantity = tonumber(ARGV[1])
if reserved + quantity > capacity then
    local available = capacity - reserved
    if available < 0 then
        available = 0
    end
    return {0, available}
end
redis.call('HSET', KEYS[1], 'reserved', reserved + quantity)
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
redis.call('HSET', KEYS[3], ARGV[4], quantity)
redis.call('SET', KEYS[4], ARGV[5], 'PX', ARGV[6])
return {1, capacity - reserved - quantity}
";

/// ARGV: token, `now_ms`. Returns 1 if a live hold was released.
const RELEASE: &str = r"
purge(KEYS[1], KEYS[2], KEYS[3], ARGV[2])
redis.call('DEL', KEYS[4])
local held = redis.call('HGET', KEYS[3], ARGV[1])
if not held then
    return 0
end
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
local reserved = tonumber(redis.call('HGET', KEYS[1], 'reserved') or '0') - tonumber(held)
if reserved < 0 then
    reserved = 0
end
redis.call('HSET', KEYS[1], 'reserved', reserved)
return 1
";

/// ARGV: token, quantity. Lowers capacity for good and drops the hold.
const SETTLE: &str = r"
local capacity = tonumber(redis.call('HGET', KEYS[1], 'capacity') or '0') - tonumber(ARGV[2])
if capacity < 0 then
    capacity = 0
end
redis.call('HSET', KEYS[1], 'capacity', capacity)
local held = redis.call('HGET', KEYS[3], ARGV[1])
if held then
    redis.call('HDEL', KEYS[3], ARGV[1])
    redis.call('ZREM', KEYS[2], ARGV[1])
    local reserved = tonumber(redis.call('HGET', KEYS[1], 'reserved') or '0') - tonumber(held)
    if reserved < 0 then
        reserved = 0
    end
    redis.call('HSET', KEYS[1], 'reserved', reserved)
end
redis.call('DEL', KEYS[4])
return 1
";

/// ARGV: `now_ms`. Returns units held by live holds.
const RESERVED: &str = r"
purge(KEYS[1], KEYS[2], KEYS[3], ARGV[1])
return tonumber(redis.call('HGET', KEYS[1], 'reserved') or '0')
";

/// Compiled scripts; each is loaded once and invoked by SHA afterwards.
#[derive(Debug, Clone)]
pub(crate) struct Scripts {
    pub provision: Script,
    pub try_reserve: Script,
    pub release: Script,
    pub settle: Script,
    pub reserved: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            provision: Script::new(PROVISION),
            try_reserve: Script::new(&format!("{PURGE}{TRY_RESERVE}")),
            release: Script::new(&format!("{PURGE}{RELEASE}")),
            settle: Script::new(SETTLE),
            reserved: Script::new(&format!("{PURGE}{RESERVED}")),
        }
    }
}
