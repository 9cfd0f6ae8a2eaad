//! # Redis
//!
//! Shared session store for deployments running more than one server.
//!
//! ## Layout
//!
//! - One string key per voter session: `wizard:session:<id>`
//! - Value is the JSON encoded session state
//! - Written with `SET EX`, so abandoned sessions expire on their own
//! - Logout and reset delete the key
use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncCommands,
    Client,
    RedisError,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::debug;
use wizard::{
    SessionState,
    SessionStore,
    StoreError,
    store::{check_session_id, decode, encode},
};

pub const SESSION_PREFIX: &str = "wizard:session:";

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    client.get_connection_manager_with_config(config).await
}

pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

fn backend(e: RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct RedisStore {
    connection: ConnectionManager,
    ttl: Duration,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager, ttl: Duration) -> Self {
        Self { connection, ttl }
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        check_session_id(session_id)?;

        let mut connection = self.connection.clone();
        let raw: Option<String> = connection
            .get(session_key(session_id))
            .await
            .map_err(backend)?;

        raw.map(|raw| decode(session_id, &raw)).transpose()
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        check_session_id(session_id)?;

        let raw = encode(state)?;
        let mut connection = self.connection.clone();
        let _: () = connection
            .set_ex(session_key(session_id), raw, self.ttl.as_secs().max(1))
            .await
            .map_err(backend)?;

        debug!("Saved session {session_id} to Redis");

        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        check_session_id(session_id)?;

        let mut connection = self.connection.clone();
        let _: () = connection
            .del(session_key(session_id))
            .await
            .map_err(backend)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        assert_eq!(session_key("voter-1"), "wizard:session:voter-1");
    }
}
