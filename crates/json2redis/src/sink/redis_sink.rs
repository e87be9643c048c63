// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::IntoConnectionInfo;
use tracing::debug;

use super::Sink;
use crate::errors::SinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// `host:port`
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
}

/// Writes each batch with one `MSET`. The connection manager reconnects on its own after a
/// failed command, so a broken connection costs the batch in flight and nothing else.
#[derive(Clone)]
pub struct RedisSink {
    connection: ConnectionManager,
}

impl RedisSink {
    pub async fn connect(config: &RedisConfig) -> Result<Self, SinkError> {
        let mut info = format!("redis://{}", config.addr).into_connection_info()?;
        info.redis.db = config.db;
        info.redis.password.clone_from(&config.password);

        let client = redis::Client::open(info)?;
        let connection = ConnectionManager::new(client).await?;
        debug!("Connected to redis at {} (db {})", config.addr, config.db);

        Ok(Self { connection })
    }
}

#[async_trait]
impl Sink for RedisSink {
    async fn multi_set(&self, pairs: &[(&str, &[u8])]) -> Result<(), SinkError> {
        if pairs.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("MSET");
        for (key, value) in pairs {
            cmd.arg(*key).arg(*value);
        }

        let mut connection = self.connection.clone();
        let _: () = cmd.query_async(&mut connection).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), SinkError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }
}
