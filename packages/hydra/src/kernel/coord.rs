//! Coordination store access.
//!
//! All transient routing state lives in Redis: pending priority queues,
//! per-worker dispatch lists, worker metadata and heartbeats, running-job
//! markers, and log streams. This wrapper owns the key layout so no other
//! module builds keys by hand; every key is domain-qualified, which is what
//! keeps tenants isolated at the store level.

use std::collections::HashMap;

use anyhow::{Context, Result};
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;

use super::logs::{LOG_HISTORY_CAP, LOG_HISTORY_TTL_SECS};

/// Key layout. Pure string builders, kept together so the whole namespace is
/// visible at a glance.
pub mod keys {
    pub const DOMAINS: &str = "hydra:domains";

    pub fn pending(domain: &str) -> String {
        format!("job_queue:{domain}:pending")
    }

    pub fn worker_queue(domain: &str, worker_id: &str) -> String {
        format!("job_queue:{domain}:{worker_id}")
    }

    pub fn worker(domain: &str, worker_id: &str) -> String {
        format!("workers:{domain}:{worker_id}")
    }

    pub fn worker_pattern(domain: &str) -> String {
        format!("workers:{domain}:*")
    }

    pub fn heartbeats(domain: &str) -> String {
        format!("worker_heartbeats:{domain}")
    }

    pub fn running_set(domain: &str, worker_id: &str) -> String {
        format!("worker_running_set:{domain}:{worker_id}")
    }

    pub fn job_running(domain: &str, job_id: &str) -> String {
        format!("job_running:{domain}:{job_id}")
    }

    pub fn log_channel(domain: &str, run_id: &str) -> String {
        format!("log_stream:{domain}:{run_id}")
    }

    pub fn log_history(domain: &str, run_id: &str) -> String {
        format!("log_stream:{domain}:{run_id}:history")
    }

    pub fn token_cache(token_hash: &str) -> String {
        format!("token_hash:{token_hash}:domain")
    }

    pub fn domain_token(domain: &str) -> String {
        format!("domain_token_hash:{domain}")
    }

    /// Domain embedded in a pending-queue key, if the key is one.
    pub fn domain_of_pending(key: &str) -> Option<&str> {
        key.strip_prefix("job_queue:")?.strip_suffix(":pending")
    }

    /// Worker id embedded in a `workers:{domain}:{id}` key.
    pub fn worker_id_of<'a>(key: &'a str, domain: &str) -> Option<&'a str> {
        key.strip_prefix("workers:")?
            .strip_prefix(domain)?
            .strip_prefix(':')
    }
}

/// Seconds a token-hash → domain cache entry stays valid.
const TOKEN_CACHE_TTL_SECS: u64 = 300;

/// Async Redis handle shared by the control plane and workers. Cloning is
/// cheap; the underlying connection reconnects on its own.
#[derive(Clone)]
pub struct CoordStore {
    manager: ConnectionManager,
    client: redis::Client,
}

impl CoordStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager, client })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    // ------------------------------------------------------------------
    // Domains
    // ------------------------------------------------------------------

    pub async fn add_domain(&self, domain: &str) -> Result<()> {
        let _: i64 = self.conn().sadd(keys::DOMAINS, domain).await?;
        Ok(())
    }

    pub async fn remove_domain(&self, domain: &str) -> Result<()> {
        let _: i64 = self.conn().srem(keys::DOMAINS, domain).await?;
        Ok(())
    }

    /// Known domains, falling back to `prod` when none registered yet.
    pub async fn domains(&self) -> Result<Vec<String>> {
        let domains: Vec<String> = self.conn().smembers(keys::DOMAINS).await?;
        if domains.is_empty() {
            return Ok(vec!["prod".to_string()]);
        }
        Ok(domains)
    }

    // ------------------------------------------------------------------
    // Pending queues
    // ------------------------------------------------------------------

    pub async fn push_pending(&self, domain: &str, job_id: &str, priority: f64) -> Result<()> {
        let _: i64 = self
            .conn()
            .zadd(keys::pending(domain), job_id, priority)
            .await?;
        Ok(())
    }

    /// Blocking pop of the highest-priority pending job across domains.
    /// Returns `(domain, job_id, priority)`.
    pub async fn pop_pending_max(
        &self,
        domains: &[String],
        timeout_secs: f64,
    ) -> Result<Option<(String, String, f64)>> {
        let queue_keys: Vec<String> = domains.iter().map(|d| keys::pending(d)).collect();
        let popped: Option<(String, String, f64)> =
            self.conn().bzpopmax(queue_keys, timeout_secs).await?;
        Ok(popped.map(|(key, job_id, score)| {
            let domain = keys::domain_of_pending(&key).unwrap_or("prod").to_string();
            (domain, job_id, score)
        }))
    }

    pub async fn pending_count(&self, domain: &str) -> Result<i64> {
        let count: i64 = self.conn().zcard(keys::pending(domain)).await?;
        Ok(count)
    }

    /// Highest-priority pending entries with their scores.
    pub async fn pending_top(&self, domain: &str, limit: isize) -> Result<Vec<(String, f64)>> {
        let entries: Vec<(String, f64)> = self
            .conn()
            .zrevrange_withscores(keys::pending(domain), 0, limit - 1)
            .await?;
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Per-worker queues
    // ------------------------------------------------------------------

    pub async fn push_worker_queue(
        &self,
        domain: &str,
        worker_id: &str,
        job_id: &str,
    ) -> Result<()> {
        let _: i64 = self
            .conn()
            .rpush(keys::worker_queue(domain, worker_id), job_id)
            .await?;
        Ok(())
    }

    pub async fn pop_worker_queue(
        &self,
        domain: &str,
        worker_id: &str,
        timeout_secs: f64,
    ) -> Result<Option<String>> {
        let popped: Option<(String, String)> = self
            .conn()
            .blpop(keys::worker_queue(domain, worker_id), timeout_secs)
            .await?;
        Ok(popped.map(|(_, job_id)| job_id))
    }

    // ------------------------------------------------------------------
    // Worker registry and heartbeats
    // ------------------------------------------------------------------

    pub async fn register_worker(
        &self,
        domain: &str,
        worker_id: &str,
        fields: &[(String, String)],
    ) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .hset_multiple(keys::worker(domain, worker_id), fields)
            .await?;
        let _: i64 = conn.sadd(keys::DOMAINS, domain).await?;
        Ok(())
    }

    pub async fn worker_fields(
        &self,
        domain: &str,
        worker_id: &str,
    ) -> Result<Option<HashMap<String, String>>> {
        let fields: HashMap<String, String> =
            self.conn().hgetall(keys::worker(domain, worker_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(fields))
    }

    pub async fn list_worker_ids(&self, domain: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let mut ids = Vec::new();
        let mut iter = conn
            .scan_match::<_, String>(keys::worker_pattern(domain))
            .await?;
        while let Some(key) = iter.next_item().await {
            if let Some(id) = keys::worker_id_of(&key, domain) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    pub async fn set_worker_state(&self, domain: &str, worker_id: &str, state: &str) -> Result<()> {
        let _: () = self
            .conn()
            .hset(keys::worker(domain, worker_id), "state", state)
            .await?;
        Ok(())
    }

    pub async fn worker_exists(&self, domain: &str, worker_id: &str) -> Result<bool> {
        let exists: bool = self.conn().exists(keys::worker(domain, worker_id)).await?;
        Ok(exists)
    }

    /// One heartbeat: refresh the zset score, reconcile the live slot count
    /// onto the worker hash, and restore liveness after a false failover.
    pub async fn heartbeat(
        &self,
        domain: &str,
        worker_id: &str,
        now_secs: f64,
        current_running: i64,
    ) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn
            .zadd(keys::heartbeats(domain), worker_id, now_secs)
            .await?;
        let _: () = conn
            .hset_multiple(
                keys::worker(domain, worker_id),
                &[
                    ("current_running", current_running.to_string()),
                    ("status", "online".to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn last_heartbeat(&self, domain: &str, worker_id: &str) -> Result<Option<f64>> {
        let score: Option<f64> = self.conn().zscore(keys::heartbeats(domain), worker_id).await?;
        Ok(score)
    }

    /// Worker ids whose last beat is at or before `cutoff_secs`.
    pub async fn stale_workers(&self, domain: &str, cutoff_secs: f64) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .conn()
            .zrangebyscore(keys::heartbeats(domain), "-inf", cutoff_secs)
            .await?;
        Ok(stale)
    }

    pub async fn drop_heartbeat(&self, domain: &str, worker_id: &str) -> Result<()> {
        let _: i64 = self.conn().zrem(keys::heartbeats(domain), worker_id).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Slot accounting and running markers
    // ------------------------------------------------------------------

    /// Atomic slot counter adjustment; returns the new value.
    pub async fn incr_running(&self, domain: &str, worker_id: &str, delta: i64) -> Result<i64> {
        let value: i64 = self
            .conn()
            .hincr(keys::worker(domain, worker_id), "current_running", delta)
            .await?;
        Ok(value)
    }

    /// Failover reset: worker is presumed dead, its slots are free.
    pub async fn reset_worker_offline(&self, domain: &str, worker_id: &str) -> Result<()> {
        let _: () = self
            .conn()
            .hset_multiple(
                keys::worker(domain, worker_id),
                &[("current_running", "0"), ("status", "offline")],
            )
            .await?;
        Ok(())
    }

    pub async fn add_running(&self, domain: &str, worker_id: &str, job_id: &str) -> Result<()> {
        let _: i64 = self
            .conn()
            .sadd(keys::running_set(domain, worker_id), job_id)
            .await?;
        Ok(())
    }

    pub async fn remove_running(&self, domain: &str, worker_id: &str, job_id: &str) -> Result<()> {
        let _: i64 = self
            .conn()
            .srem(keys::running_set(domain, worker_id), job_id)
            .await?;
        Ok(())
    }

    pub async fn running_jobs(&self, domain: &str, worker_id: &str) -> Result<Vec<String>> {
        let jobs: Vec<String> = self
            .conn()
            .smembers(keys::running_set(domain, worker_id))
            .await?;
        Ok(jobs)
    }

    pub async fn set_job_running(
        &self,
        domain: &str,
        job_id: &str,
        worker_id: &str,
        user: &str,
        now_secs: f64,
    ) -> Result<()> {
        let _: () = self
            .conn()
            .hset_multiple(
                keys::job_running(domain, job_id),
                &[
                    ("worker_id", worker_id.to_string()),
                    ("heartbeat", now_secs.to_string()),
                    ("user", user.to_string()),
                    ("domain", domain.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn refresh_job_running(
        &self,
        domain: &str,
        job_id: &str,
        worker_id: &str,
        now_secs: f64,
    ) -> Result<()> {
        let _: () = self
            .conn()
            .hset_multiple(
                keys::job_running(domain, job_id),
                &[
                    ("worker_id", worker_id.to_string()),
                    ("heartbeat", now_secs.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn clear_job_running(&self, domain: &str, job_id: &str) -> Result<()> {
        let _: i64 = self.conn().del(keys::job_running(domain, job_id)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Log streams
    // ------------------------------------------------------------------

    /// Append one serialized chunk to the capped history and publish it to
    /// live subscribers.
    pub async fn append_log_chunk(&self, domain: &str, run_id: &str, payload: &str) -> Result<()> {
        let history_key = keys::log_history(domain, run_id);
        let mut conn = self.conn();
        let _: i64 = conn.rpush(&history_key, payload).await?;
        let _: () = conn.ltrim(&history_key, -LOG_HISTORY_CAP, -1).await?;
        let _: bool = conn.expire(&history_key, LOG_HISTORY_TTL_SECS).await?;
        let _: i64 = conn
            .publish(keys::log_channel(domain, run_id), payload)
            .await?;
        Ok(())
    }

    pub async fn log_history(&self, domain: &str, run_id: &str) -> Result<Vec<String>> {
        let chunks: Vec<String> = self
            .conn()
            .lrange(keys::log_history(domain, run_id), -LOG_HISTORY_CAP, -1)
            .await?;
        Ok(chunks)
    }

    /// Dedicated pub/sub connection subscribed to a run's log channel.
    pub async fn subscribe_logs(&self, domain: &str, run_id: &str) -> Result<PubSub> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("failed to open pubsub connection")?;
        pubsub.subscribe(keys::log_channel(domain, run_id)).await?;
        Ok(pubsub)
    }

    // ------------------------------------------------------------------
    // Token cache
    // ------------------------------------------------------------------

    pub async fn cache_token_domain(&self, token_hash: &str, domain: &str) -> Result<()> {
        let _: () = self
            .conn()
            .set_ex(keys::token_cache(token_hash), domain, TOKEN_CACHE_TTL_SECS)
            .await?;
        Ok(())
    }

    pub async fn cached_token_domain(&self, token_hash: &str) -> Result<Option<String>> {
        let domain: Option<String> = self.conn().get(keys::token_cache(token_hash)).await?;
        Ok(domain)
    }

    pub async fn invalidate_token_cache(&self, token_hash: &str) -> Result<()> {
        let _: i64 = self.conn().del(keys::token_cache(token_hash)).await?;
        Ok(())
    }

    /// Current token hash for a domain, read by dispatch when filtering
    /// workers registered with a stale token.
    pub async fn set_domain_token_hash(&self, domain: &str, token_hash: &str) -> Result<()> {
        let _: () = self.conn().set(keys::domain_token(domain), token_hash).await?;
        Ok(())
    }

    pub async fn domain_token_hash(&self, domain: &str) -> Result<Option<String>> {
        let hash: Option<String> = self.conn().get(keys::domain_token(domain)).await?;
        Ok(hash)
    }

    pub async fn clear_domain_token_hash(&self, domain: &str) -> Result<()> {
        let _: i64 = self.conn().del(keys::domain_token(domain)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn keys_are_domain_qualified() {
        assert_eq!(keys::pending("prod"), "job_queue:prod:pending");
        assert_eq!(keys::worker_queue("prod", "w1"), "job_queue:prod:w1");
        assert_eq!(keys::worker("team-a", "w1"), "workers:team-a:w1");
        assert_eq!(keys::heartbeats("prod"), "worker_heartbeats:prod");
        assert_eq!(
            keys::running_set("prod", "w1"),
            "worker_running_set:prod:w1"
        );
        assert_eq!(keys::job_running("prod", "j1"), "job_running:prod:j1");
        assert_eq!(keys::log_channel("prod", "r1"), "log_stream:prod:r1");
        assert_eq!(
            keys::log_history("prod", "r1"),
            "log_stream:prod:r1:history"
        );
    }

    #[test]
    fn pending_key_parses_back_to_domain() {
        assert_eq!(
            keys::domain_of_pending(&keys::pending("team-a")),
            Some("team-a")
        );
        assert_eq!(keys::domain_of_pending("job_queue:prod:w1"), None);
        assert_eq!(keys::domain_of_pending("other:prod:pending"), None);
    }

    #[test]
    fn worker_key_parses_back_to_id() {
        assert_eq!(
            keys::worker_id_of(&keys::worker("prod", "worker-1"), "prod"),
            Some("worker-1")
        );
        assert_eq!(keys::worker_id_of("workers:other:w1", "prod"), None);
    }
}
