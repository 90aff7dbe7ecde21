//! Redis usage store for `windowquota` (companion crate).
//! Bring your own `redis::aio::ConnectionManager`; buckets are stored as plain
//! integer keys under a namespace and expire through `EXPIRE`.
//!
//! Each request is evaluated by one Lua script, so reading every window,
//! deciding the grant and crediting the buckets happen atomically on the
//! server even with many processes sharing the same counters. Lua holds
//! numbers as doubles; `windowquota::MAX_UNITS` keeps every count exact.
//!
//! Redis Cluster: a script may only touch keys in one slot. Use a hash-tagged
//! namespace such as `{quota}` so every bucket key lands in the same slot.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use std::sync::Arc;
use windowquota::{CounterKey, UsageCheck, UsageProbe, UsageStore};

const CHECK_AND_USE: &str = include_str!("check_and_use.lua");

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "windowquota";

#[derive(Clone)]
pub struct RedisUsageStore {
    namespace: String,
    conn: ConnectionManager,
    script: Arc<Script>,
}

impl std::fmt::Debug for RedisUsageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisUsageStore")
            .field("namespace", &self.namespace)
            .field("conn", &"<redis::aio::ConnectionManager>")
            .finish()
    }
}

impl RedisUsageStore {
    /// Create a store on an existing connection; keys will be
    /// `windowquota:<prefix>:<window>:<granularity>:<bucket>`.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { namespace: DEFAULT_NAMESPACE.to_string(), conn, script: Arc::new(Script::new(CHECK_AND_USE)) }
    }

    /// Replace the key namespace.
    ///
    /// # Errors
    /// Returns `Err` if the namespace is empty or contains whitespace or control characters.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self, String> {
        let ns: String = namespace.into();
        let ns = ns.trim_end_matches(':').to_string();

        if ns.is_empty() {
            return Err("namespace cannot be empty".to_string());
        }
        if ns.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err("namespace cannot contain whitespace or control characters".to_string());
        }

        self.namespace = ns;
        Ok(self)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn probe_keys(&self, probe: &UsageProbe) -> Vec<String> {
        probe.bucket_starts().map(|start| bucket_key(&self.namespace, &probe.key, start)).collect()
    }
}

/// Redis key of one bucket.
pub fn bucket_key(namespace: &str, key: &CounterKey, bucket_start: u64) -> String {
    format!("{}:{}:{}", namespace, key, bucket_start)
}

fn to_units(values: impl IntoIterator<Item = i64>) -> Vec<u64> {
    values.into_iter().map(|v| u64::try_from(v).unwrap_or(0)).collect()
}

/// Sum of the buckets an `MGET` found; missing buckets count as zero.
fn window_total(values: Vec<Option<i64>>) -> u64 {
    to_units(values.into_iter().flatten()).into_iter().fold(0, u64::saturating_add)
}

#[async_trait]
impl UsageStore for RedisUsageStore {
    type Error = RedisError;

    async fn check_and_use(&self, check: &UsageCheck) -> Result<Vec<u64>, Self::Error> {
        let mut invocation = self.script.prepare_invoke();
        invocation.arg(check.requested);
        for probe in &check.probes {
            let keys = self.probe_keys(probe);
            invocation.arg(keys.len()).arg(probe.limit).arg(probe.ttl_seconds);
            for key in keys {
                invocation.key(key);
            }
        }

        let mut conn = self.conn.clone();
        let used: Vec<i64> = invocation.invoke_async(&mut conn).await.map_err(|e| {
            tracing::warn!(
                target: "windowquota::redis",
                namespace = %self.namespace,
                error = %e,
                "check_and_use script failed"
            );
            e
        })?;
        Ok(to_units(used))
    }

    async fn peek_usage(&self, probes: &[UsageProbe], _timestamp: u64) -> Result<Vec<u64>, Self::Error> {
        let mut conn = self.conn.clone();
        let mut sums = Vec::with_capacity(probes.len());
        for probe in probes {
            let keys = self.probe_keys(probe);
            let values: Vec<Option<i64>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
            sums.push(window_total(values));
        }
        Ok(sums)
    }
}
