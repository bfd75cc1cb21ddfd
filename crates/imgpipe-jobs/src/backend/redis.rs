use super::JobBackend;
use crate::error::{JobError, Result};
use crate::job::{JobRecord, Lease};
use crate::retry::Retention;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::{aio::Connection, AsyncCommands, Client, Script};
use std::time::Duration;

// KEYS: jobs, waiting, active, leases, failed
// ARGV: now_ms, now_iso, expired_error
const RECLAIM_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local failed = {}
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now)
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[3], id)
    redis.call('HDEL', KEYS[4], id)
    local raw = redis.call('HGET', KEYS[1], id)
    if raw then
        local job = cjson.decode(raw)
        job.last_error = ARGV[3]
        if job.attempts >= job.max_attempts then
            job.status = 'failed'
            job.finished_at = ARGV[2]
            redis.call('ZADD', KEYS[5], now, id)
        else
            job.status = 'waiting'
            job.run_at = ARGV[2]
            redis.call('ZADD', KEYS[2], now, id)
        end
        local encoded = cjson.encode(job)
        redis.call('HSET', KEYS[1], id, encoded)
        if job.status == 'failed' then
            table.insert(failed, encoded)
        end
    end
end
return failed
"#;

// KEYS: jobs, waiting, active, leases
// ARGV: now_ms, lease_ms, token
const LEASE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local ids = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now, 'LIMIT', 0, 1)
if #ids == 0 then
    return nil
end
local id = ids[1]
redis.call('ZREM', KEYS[2], id)
local raw = redis.call('HGET', KEYS[1], id)
if not raw then
    return nil
end
local job = cjson.decode(raw)
job.attempts = job.attempts + 1
job.status = 'active'
local encoded = cjson.encode(job)
redis.call('HSET', KEYS[1], id, encoded)
redis.call('ZADD', KEYS[3], now + tonumber(ARGV[2]), id)
redis.call('HSET', KEYS[4], id, ARGV[3])
return encoded
"#;

// KEYS: jobs, active, leases
// ARGV: id, token, discard, now_iso, now_ms
const COMPLETE_SCRIPT: &str = r#"
local expires = redis.call('ZSCORE', KEYS[2], ARGV[1])
if redis.call('HGET', KEYS[3], ARGV[1]) ~= ARGV[2]
    or not expires or tonumber(expires) <= tonumber(ARGV[5]) then
    return 0
end
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
if ARGV[3] == '1' then
    redis.call('HDEL', KEYS[1], ARGV[1])
else
    local raw = redis.call('HGET', KEYS[1], ARGV[1])
    if raw then
        local job = cjson.decode(raw)
        job.status = 'completed'
        job.finished_at = ARGV[4]
        redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(job))
    end
end
return 1
"#;

// KEYS: jobs, waiting, active, leases
// ARGV: id, token, error, run_at_ms, run_at_iso, now_ms
const RETRY_SCRIPT: &str = r#"
local expires = redis.call('ZSCORE', KEYS[3], ARGV[1])
if redis.call('HGET', KEYS[4], ARGV[1]) ~= ARGV[2]
    or not expires or tonumber(expires) <= tonumber(ARGV[6]) then
    return 0
end
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if raw then
    local job = cjson.decode(raw)
    job.status = 'waiting'
    job.last_error = ARGV[3]
    job.run_at = ARGV[5]
    redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(job))
    redis.call('ZADD', KEYS[2], tonumber(ARGV[4]), ARGV[1])
end
return 1
"#;

// KEYS: jobs, active, leases, failed
// ARGV: id, token, error, now_ms, now_iso
const FAIL_SCRIPT: &str = r#"
local expires = redis.call('ZSCORE', KEYS[2], ARGV[1])
if redis.call('HGET', KEYS[3], ARGV[1]) ~= ARGV[2]
    or not expires or tonumber(expires) <= tonumber(ARGV[4]) then
    return 0
end
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if raw then
    local job = cjson.decode(raw)
    job.status = 'failed'
    job.last_error = ARGV[3]
    job.finished_at = ARGV[5]
    redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(job))
    redis.call('ZADD', KEYS[4], tonumber(ARGV[4]), ARGV[1])
end
return 1
"#;

const LEASE_EXPIRED: &str = "Lease expired before the job finished";

/// Redis-backed job queue.
///
/// Layout under `prefix`:
/// - `<prefix>:jobs` hash of id to JSON record
/// - `<prefix>:waiting` zset scored by eligibility time (ms)
/// - `<prefix>:active` zset scored by lease expiry (ms)
/// - `<prefix>:leases` hash of id to lease token
/// - `<prefix>:failed` zset scored by failure time (ms)
///
/// Every transition runs as a single Lua script, so it is atomic across
/// processes sharing the same Redis.
#[derive(Debug, Clone)]
pub struct RedisBackend {
    client: Client,
    jobs_key: String,
    waiting_key: String,
    active_key: String,
    leases_key: String,
    failed_key: String,
    reclaim_script: Script,
    lease_script: Script,
    complete_script: Script,
    retry_script: Script,
    fail_script: Script,
}

impl RedisBackend {
    pub fn new(url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| JobError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            jobs_key: format!("{prefix}:jobs"),
            waiting_key: format!("{prefix}:waiting"),
            active_key: format!("{prefix}:active"),
            leases_key: format!("{prefix}:leases"),
            failed_key: format!("{prefix}:failed"),
            reclaim_script: Script::new(RECLAIM_SCRIPT),
            lease_script: Script::new(LEASE_SCRIPT),
            complete_script: Script::new(COMPLETE_SCRIPT),
            retry_script: Script::new(RETRY_SCRIPT),
            fail_script: Script::new(FAIL_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))
    }
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl JobBackend for RedisBackend {
    async fn push(&self, job: JobRecord) -> Result<()> {
        let mut conn = self.connection().await?;
        let score = job.run_at.timestamp_millis();
        let payload = serde_json::to_string(&job)?;

        redis::pipe()
            .atomic()
            .hset(&self.jobs_key, &job.id, payload)
            .ignore()
            .zadd(&self.waiting_key, &job.id, score)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        Ok(())
    }

    async fn reclaim(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        let mut conn = self.connection().await?;

        let failed: Vec<String> = self
            .reclaim_script
            .key(&self.jobs_key)
            .key(&self.waiting_key)
            .key(&self.active_key)
            .key(&self.leases_key)
            .key(&self.failed_key)
            .arg(now.timestamp_millis())
            .arg(iso(now))
            .arg(LEASE_EXPIRED)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        failed
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(JobError::from))
            .collect()
    }

    async fn lease(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_for: Duration,
    ) -> Result<Option<Lease>> {
        let mut conn = self.connection().await?;
        let token = uuid::Uuid::new_v4().to_string();
        let lease_ms = lease_for.as_millis().min(i64::MAX as u128) as i64;

        let result: Option<String> = self
            .lease_script
            .key(&self.jobs_key)
            .key(&self.waiting_key)
            .key(&self.active_key)
            .key(&self.leases_key)
            .arg(now.timestamp_millis())
            .arg(lease_ms)
            .arg(&token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        let Some(json_str) = result else {
            return Ok(None);
        };
        let job: JobRecord = serde_json::from_str(&json_str)?;

        Ok(Some(Lease {
            job,
            token,
            worker_id: worker_id.to_string(),
            expires_at: now + chrono::Duration::milliseconds(lease_ms),
        }))
    }

    async fn complete(&self, lease: &Lease, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.connection().await?;
        let discard = lease.job.retention == Retention::DiscardOnSuccess;

        let applied: i32 = self
            .complete_script
            .key(&self.jobs_key)
            .key(&self.active_key)
            .key(&self.leases_key)
            .arg(lease.job_id())
            .arg(&lease.token)
            .arg(if discard { "1" } else { "0" })
            .arg(iso(now))
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        Ok(applied == 1)
    }

    async fn retry(
        &self,
        lease: &Lease,
        error: &str,
        now: DateTime<Utc>,
        run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.connection().await?;

        let applied: i32 = self
            .retry_script
            .key(&self.jobs_key)
            .key(&self.waiting_key)
            .key(&self.active_key)
            .key(&self.leases_key)
            .arg(lease.job_id())
            .arg(&lease.token)
            .arg(error)
            .arg(run_at.timestamp_millis())
            .arg(iso(run_at))
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        Ok(applied == 1)
    }

    async fn fail(&self, lease: &Lease, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.connection().await?;

        let applied: i32 = self
            .fail_script
            .key(&self.jobs_key)
            .key(&self.active_key)
            .key(&self.leases_key)
            .key(&self.failed_key)
            .arg(lease.job_id())
            .arg(&lease.token)
            .arg(error)
            .arg(now.timestamp_millis())
            .arg(iso(now))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        Ok(applied == 1)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .hget(&self.jobs_key, job_id)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        match raw {
            Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            None => Ok(None),
        }
    }

    async fn failed(&self) -> Result<Vec<JobRecord>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .zrange(&self.failed_key, 0, -1)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = conn
                .hget(&self.jobs_key, &id)
                .await
                .map_err(|e| JobError::BackendError(e.to_string()))?;
            if let Some(json_str) = raw {
                jobs.push(serde_json::from_str(&json_str)?);
            }
        }
        Ok(jobs)
    }
}
