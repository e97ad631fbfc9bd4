//! Best-effort byte cache for decompressed artifacts.
//!
//! The cache is advisory: a miss, a connection failure, or an oversized
//! entry all degrade to fetching from the object store. Nothing here may
//! block job progress.

use crate::args::RedisArgs;
use deadpool_redis::{Config as RedisPoolConfig, Pool};
use redis::AsyncCommands;

/// Entries live this long before Redis evicts them.
pub const CACHE_TTL_SECONDS: u64 = 90 * 60;

/// Decompressed files larger than this are never cached.
pub const CACHE_MAX_ENTRY_BYTES: usize = 300 * 1024 * 1024;

fn cache_key(sha1: &str) -> String {
    format!("dorch:wad:{sha1}")
}

#[derive(Clone)]
pub struct WadCache {
    pool: Pool,
}

impl WadCache {
    /// Connect and ping; returns None (cache disabled) on any failure.
    pub async fn connect(args: &RedisArgs) -> Option<Self> {
        tracing::info!(url = %args.url_redacted(), "connecting to wad cache");
        let pool = match RedisPoolConfig::from_url(args.url())
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!(error = %e, "wad cache disabled: failed to create pool");
                return None;
            }
        };
        match pool.get().await {
            Ok(mut conn) => {
                if let Err(e) = conn.ping::<String>().await {
                    tracing::warn!(error = %e, "wad cache disabled: ping failed");
                    return None;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "wad cache disabled: no connection");
                return None;
            }
        }
        Some(Self { pool })
    }

    /// Fetch cached decompressed bytes for a file hash.
    pub async fn get(&self, sha1: &str) -> Option<Vec<u8>> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "wad cache get: no connection");
                return None;
            }
        };
        match conn.get::<_, Option<Vec<u8>>>(cache_key(sha1)).await {
            Ok(Some(bytes)) => {
                metrics::counter!("dorch_wad_cache_hits_total").increment(1);
                Some(bytes)
            }
            Ok(None) => {
                metrics::counter!("dorch_wad_cache_misses_total").increment(1);
                None
            }
            Err(e) => {
                tracing::warn!(sha1 = %sha1, error = %e, "wad cache get failed");
                None
            }
        }
    }

    /// Store decompressed bytes, skipping oversized entries.
    pub async fn put(&self, sha1: &str, bytes: &[u8]) {
        if bytes.len() >= CACHE_MAX_ENTRY_BYTES {
            tracing::debug!(sha1 = %sha1, size = bytes.len(), "wad cache put skipped: too large");
            return;
        }
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "wad cache put: no connection");
                return;
            }
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(cache_key(sha1), bytes, CACHE_TTL_SECONDS)
            .await
        {
            tracing::warn!(sha1 = %sha1, error = %e, "wad cache put failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(
            cache_key("0000e0b4993f0b7130fc3b58abf996bbb4acb287"),
            "dorch:wad:0000e0b4993f0b7130fc3b58abf996bbb4acb287"
        );
    }
}
