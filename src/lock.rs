//! Per-collection run exclusion.
//!
//! A reorder is a read-then-write sequence; two overlapping runs against one
//! collection would race each other's position assignments. The second run is
//! refused instead of queued.

use crate::config::LockConfig;
use redis::Script;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "reorder-lock:";

// Deletes the key only while it still holds this lease's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("a reorder for {0} is already running")]
    Busy(String),
}

#[derive(Clone)]
pub struct RunLocks {
    local: Arc<Mutex<HashSet<String>>>,
    redis: Option<redis::Client>,
    ttl_secs: u64,
}

impl RunLocks {
    pub fn from_config(config: &LockConfig) -> Self {
        let redis = config
            .redis_url
            .as_deref()
            .and_then(|url| match redis::Client::open(url) {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!(target: "reorder.lock", error = %err, "invalid REDIS_URL; using in-process locks");
                    None
                }
            });
        Self {
            local: Arc::new(Mutex::new(HashSet::new())),
            redis,
            ttl_secs: config.ttl_secs,
        }
    }

    pub fn in_process() -> Self {
        Self::from_config(&LockConfig::default())
    }

    pub fn backend(&self) -> &'static str {
        if self.redis.is_some() { "redis" } else { "local" }
    }

    pub async fn acquire(&self, collection_id: &str) -> Result<RunLease, LockError> {
        if let Some(client) = &self.redis {
            let key = format!("{KEY_PREFIX}{collection_id}");
            let token = Uuid::new_v4().to_string();
            match redis_try_lock(client, &key, &token, self.ttl_secs).await {
                Ok(true) => {
                    debug!(target: "reorder.lock", collection_id, "redis_lock_acquired");
                    return Ok(RunLease {
                        collection_id: collection_id.to_string(),
                        held: Held::Redis {
                            client: client.clone(),
                            key,
                            token,
                        },
                    });
                }
                Ok(false) => return Err(LockError::Busy(collection_id.to_string())),
                Err(err) => warn!(
                    target: "reorder.lock",
                    error = %err,
                    "redis_lock_unavailable_falling_back"
                ),
            }
        }
        self.acquire_local(collection_id)
    }

    fn acquire_local(&self, collection_id: &str) -> Result<RunLease, LockError> {
        let mut held = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(collection_id.to_string()) {
            return Err(LockError::Busy(collection_id.to_string()));
        }
        Ok(RunLease {
            collection_id: collection_id.to_string(),
            held: Held::Local(self.local.clone()),
        })
    }
}

/// Proof that the current run owns its collection. Call [`RunLease::release`] when
/// done; an in-process lease also frees itself on drop.
pub struct RunLease {
    collection_id: String,
    held: Held,
}

enum Held {
    Local(Arc<Mutex<HashSet<String>>>),
    Redis {
        client: redis::Client,
        key: String,
        token: String,
    },
    Released,
}

impl RunLease {
    pub async fn release(mut self) {
        match std::mem::replace(&mut self.held, Held::Released) {
            Held::Local(set) => release_local(&set, &self.collection_id),
            Held::Redis { client, key, token } => {
                if let Err(err) = redis_unlock(&client, &key, &token).await {
                    // The key still expires after the TTL.
                    warn!(target: "reorder.lock", error = %err, key, "redis_unlock_failed");
                }
            }
            Held::Released => {}
        }
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if let Held::Local(set) = &self.held {
            release_local(set, &self.collection_id);
        }
    }
}

fn release_local(set: &Mutex<HashSet<String>>, collection_id: &str) {
    set.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(collection_id);
}

async fn redis_try_lock(
    client: &redis::Client,
    key: &str,
    token: &str,
    ttl_secs: u64,
) -> redis::RedisResult<bool> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let reply: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg(token)
        .arg("NX")
        .arg("EX")
        .arg(ttl_secs)
        .query_async(&mut conn)
        .await?;
    Ok(reply.is_some())
}

async fn redis_unlock(client: &redis::Client, key: &str, token: &str) -> redis::RedisResult<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: i64 = Script::new(RELEASE_SCRIPT)
        .key(key)
        .arg(token)
        .invoke_async(&mut conn)
        .await?;
    Ok(())
}
