use anyhow::Result;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};

const DELETE_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client })
    }

    pub async fn connection(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    /// Deletes every key starting with `prefix`. Returns how many were removed.
    /// Keys are found with `SCAN` and removed in batches.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", prefix);

        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        keys.sort();
        keys.dedup();

        let mut removed = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            let deleted: usize = redis::cmd("DEL").arg(batch).query_async(&mut conn).await?;
            removed += deleted;
        }
        Ok(removed)
    }
}
