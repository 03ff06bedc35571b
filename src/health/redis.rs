use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{debug, error};

use super::{DependencyCheck, ProbeResults};
use crate::registry::ConnectionRegistry;

const KEY: &str = "healthcheck";
const VALUE: &str = "healthy";
const TTL_SECS: u64 = 10;

/// Cache probe: ping, a keyed write with a short TTL, and a read of the same
/// key.
pub struct RedisCheck {
    registry: Arc<ConnectionRegistry>,
}

impl RedisCheck {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    async fn check_connection(&self, conn: &ConnectionManager) -> bool {
        let mut conn = conn.clone();
        match conn.ping::<String>().await {
            Ok(_) => true,
            Err(e) => {
                error!("Error pinging Redis: {}", e);
                false
            }
        }
    }

    async fn check_write(&self, conn: &ConnectionManager) -> bool {
        let mut conn = conn.clone();
        match conn.set_ex::<_, _, ()>(KEY, VALUE, TTL_SECS).await {
            Ok(()) => {
                debug!("RedisWrite : Successfully wrote to Redis: {} = {}", KEY, VALUE);
                true
            }
            Err(e) => {
                error!("Error writing to Redis: {}", e);
                false
            }
        }
    }

    async fn check_read(&self, conn: &ConnectionManager) -> bool {
        let mut conn = conn.clone();
        match conn.get::<_, String>(KEY).await {
            Ok(value) => {
                debug!("RedisRead : Read value from Redis: {} = {}", KEY, value);
                true
            }
            Err(e) => {
                error!("Error reading from Redis: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl DependencyCheck for RedisCheck {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> ProbeResults {
        match self.registry.cache().await {
            Ok(conn) => ProbeResults::from([
                ("connection", self.check_connection(&conn).await),
                ("write", self.check_write(&conn).await),
                ("read", self.check_read(&conn).await),
            ]),
            Err(e) => {
                error!("{}", e);
                ProbeResults::from([("connection", false), ("write", false), ("read", false)])
            }
        }
    }
}
