use redis::{aio::MultiplexedConnection, Client, RedisResult};

/// Shared multiplexed connection; clones are cheap handles onto one socket.
#[derive(Clone)]
pub struct RedisClient {
    conn: MultiplexedConnection,
}

impl RedisClient {
    /// Connects and round-trips a PING so a bad URL fails at start-up rather
    /// than on the first cached read.
    pub async fn connect(redis_url: &str) -> RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(RedisClient { conn })
    }

    pub fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}
