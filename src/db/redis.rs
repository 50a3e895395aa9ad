//  src/db/redis.rs

use std::{sync::Arc, time::Instant};

use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};

/// Cheap-to-clone handle shared through `web::Data`.
#[derive(Clone)]
pub struct RedisPool {
    manager: Arc<ConnectionManager>,
    namespace: String,
}

impl RedisPool {
    pub async fn new(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager: Arc::new(manager),
            namespace: "apexpips".into(),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.as_ref().clone()
    }

    /// Namespaced key: `"apexpips:prices:board"`
    pub fn key(&self, parts: &[&str]) -> String {
        namespaced(&self.namespace, parts)
    }

    /// Stores `value` as JSON; `ttl_secs == 0` keeps it without expiry.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), RedisError> {
        let payload = serde_json::to_string(value)
            .map_err(|e| RedisError::from((redis::ErrorKind::TypeError, "serde", e.to_string())))?;

        let mut con = self.conn();
        let started = Instant::now();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload);
        if ttl_secs > 0 {
            cmd.arg("EX").arg(ttl_secs);
        }
        cmd.query_async::<_, ()>(&mut con).await?;
        log::debug!("redis SET {key} took {:?}", started.elapsed());
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RedisError> {
        let mut con = self.conn();
        let started = Instant::now();
        let raw: Option<String> = con.get(key).await?;
        log::debug!("redis GET {key} took {:?}", started.elapsed());

        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| {
                RedisError::from((redis::ErrorKind::TypeError, "serde", e.to_string()))
            })
        })
        .transpose()
    }
}

fn namespaced(namespace: &str, parts: &[&str]) -> String {
    std::iter::once(namespace)
        .chain(parts.iter().copied())
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::namespaced;

    #[test]
    fn keys_are_colon_joined_under_namespace() {
        assert_eq!(namespaced("apexpips", &["prices", "board"]), "apexpips:prices:board");
        assert_eq!(namespaced("apexpips", &[]), "apexpips");
    }
}
