use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

/// Narrow interface over the shared key-value store.
///
/// Everything the caching layer needs from Redis fits in these six
/// operations. Keeping the seam this small lets tests substitute an
/// in-memory store and lets the coordinator stay oblivious to the wire
/// protocol. All coordination between concurrent requests goes through
/// the store's own atomic primitives, so no in-process locking exists
/// anywhere above this trait.
#[async_trait]
pub trait KvStore: Clone + Send + Sync + 'static {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Atomic set-if-absent. Returns true iff the key was freshly written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;

    async fn del(&self, key: &str) -> anyhow::Result<()>;

    /// List all keys matching a glob-style pattern. Not atomic with
    /// respect to concurrent writes; callers must tolerate a brief
    /// window where entries written mid-scan survive.
    async fn scan(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    async fn del_batch(&self, keys: &[String]) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> anyhow::Result<RedisKv> {
        let client = redis::Client::open(url).context("parsing redis url")?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .context("connecting to redis")?;
        Ok(RedisKv { manager })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is an error on the redis side
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("getting key {:?}", key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("setting key {:?}", key))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.manager.clone();
        let res: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("setting key {:?} if absent", key))?;
        Ok(res.is_some())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("deleting key {:?}", key))
    }

    async fn scan(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, mut batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("scanning keys matching {:?}", pattern))?;
            keys.append(&mut batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn del_batch(&self, keys: &[String]) -> anyhow::Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("deleting {} keys", keys.len()))
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use super::KvStore;

    struct Entry {
        value: String,
        expires_at: Instant,
    }

    struct Inner {
        map: HashMap<String, Entry>,
        // lets tests simulate the passage of time without sleeping
        skew: Duration,
    }

    /// In-memory stand-in for redis, shared across clones.
    #[derive(Clone)]
    pub struct MemoryKv(Arc<Mutex<Inner>>);

    impl MemoryKv {
        pub fn new() -> MemoryKv {
            MemoryKv(Arc::new(Mutex::new(Inner {
                map: HashMap::new(),
                skew: Duration::ZERO,
            })))
        }

        pub fn advance(&self, by: Duration) {
            self.0.lock().unwrap().skew += by;
        }

        pub fn contains(&self, key: &str) -> bool {
            let inner = self.0.lock().unwrap();
            let now = Instant::now() + inner.skew;
            inner
                .map
                .get(key)
                .map(|e| e.expires_at > now)
                .unwrap_or(false)
        }

        pub fn len(&self) -> usize {
            let inner = self.0.lock().unwrap();
            let now = Instant::now() + inner.skew;
            inner.map.values().filter(|e| e.expires_at > now).count()
        }
    }

    fn glob_match(pattern: &str, key: &str) -> bool {
        // only the prefix-star form the coordinator actually emits
        match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        }
    }

    #[async_trait]
    impl KvStore for MemoryKv {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            let inner = self.0.lock().unwrap();
            let now = Instant::now() + inner.skew;
            Ok(inner
                .map
                .get(key)
                .filter(|e| e.expires_at > now)
                .map(|e| e.value.clone()))
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
            let mut inner = self.0.lock().unwrap();
            let expires_at = Instant::now() + inner.skew + ttl;
            inner.map.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            Ok(())
        }

        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> anyhow::Result<bool> {
            let mut inner = self.0.lock().unwrap();
            let now = Instant::now() + inner.skew;
            let live = inner
                .map
                .get(key)
                .map(|e| e.expires_at > now)
                .unwrap_or(false);
            if live {
                return Ok(false);
            }
            inner.map.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
            Ok(true)
        }

        async fn del(&self, key: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().map.remove(key);
            Ok(())
        }

        async fn scan(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
            let inner = self.0.lock().unwrap();
            let now = Instant::now() + inner.skew;
            Ok(inner
                .map
                .iter()
                .filter(|(k, e)| e.expires_at > now && glob_match(pattern, k))
                .map(|(k, _)| k.clone())
                .collect())
        }

        async fn del_batch(&self, keys: &[String]) -> anyhow::Result<()> {
            let mut inner = self.0.lock().unwrap();
            for key in keys {
                inner.map.remove(key);
            }
            Ok(())
        }
    }

    /// A store whose every call fails, for exercising degraded reads.
    #[derive(Clone)]
    pub struct FailingKv;

    #[async_trait]
    impl KvStore for FailingKv {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("kv store unreachable")
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> anyhow::Result<()> {
            anyhow::bail!("kv store unreachable")
        }

        async fn set_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> anyhow::Result<bool> {
            anyhow::bail!("kv store unreachable")
        }

        async fn del(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("kv store unreachable")
        }

        async fn scan(&self, _pattern: &str) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("kv store unreachable")
        }

        async fn del_batch(&self, _keys: &[String]) -> anyhow::Result<()> {
            anyhow::bail!("kv store unreachable")
        }
    }

    #[tokio::test]
    async fn set_if_absent_respects_ttl() {
        let kv = MemoryKv::new();
        assert!(kv.set_if_absent("k", "v", Duration::from_secs(60)).await.unwrap());
        assert!(!kv.set_if_absent("k", "v", Duration::from_secs(60)).await.unwrap());
        kv.advance(Duration::from_secs(61));
        assert!(kv.set_if_absent("k", "v", Duration::from_secs(60)).await.unwrap());
    }
}
