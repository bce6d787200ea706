//! Redis backend. Each state lives in a hash (`version`, `state` JSON); a
//! sorted set indexes non-terminal states by `next_eligible_at` for the sweep,
//! and a set per campaign tracks enrolled keys. The CAS and both indexes are
//! updated in one Lua script so they never disagree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};
use uuid::Uuid;

use outreach_core::config::RedisConfig;
use outreach_core::types::{ProspectSequenceState, SequenceKey};

use crate::backend::{PersistenceBackend, StoreError};

const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
local expected = tonumber(ARGV[1])
if current then
  if tonumber(current) ~= expected then return 0 end
elseif expected ~= 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'version', expected + 1, 'state', ARGV[2])
if ARGV[5] == '1' then
  redis.call('ZREM', KEYS[2], ARGV[3])
else
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[3])
end
redis.call('SADD', KEYS[3], ARGV[3])
return 1
"#;

pub struct RedisBackend {
    conn: ConnectionManager,
    prefix: String,
    cas: redis::Script,
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Persistence(e.to_string())
    }
}

impl RedisBackend {
    pub async fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        info!(url = %config.url, "Connecting to Redis");

        let client = redis::Client::open(config.url.as_str())?;
        let mut conn = ConnectionManager::new(client).await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            cas: redis::Script::new(CAS_SCRIPT),
        })
    }

    fn state_key(&self, key: &SequenceKey) -> String {
        format!("{}:state:{key}", self.prefix)
    }

    fn due_key(&self) -> String {
        format!("{}:due", self.prefix)
    }

    fn campaign_key(&self, campaign_id: Uuid) -> String {
        format!("{}:campaign:{campaign_id}", self.prefix)
    }
}

fn parse_members(members: Vec<String>) -> Vec<SequenceKey> {
    members
        .iter()
        .filter_map(|m| {
            let key = SequenceKey::parse(m);
            if key.is_none() {
                debug!(member = %m, "Skipping malformed sequence key in index");
            }
            key
        })
        .collect()
}

#[async_trait]
impl PersistenceBackend for RedisBackend {
    async fn load(&self, key: &SequenceKey) -> Result<Option<ProspectSequenceState>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: (Option<u64>, Option<String>) = redis::cmd("HMGET")
            .arg(self.state_key(key))
            .arg("version")
            .arg("state")
            .query_async(&mut conn)
            .await?;

        match fields {
            (Some(version), Some(json)) => {
                let mut state: ProspectSequenceState = serde_json::from_str(&json)?;
                state.version = version;
                metrics::counter!("store.redis.load_hit").increment(1);
                Ok(Some(state))
            }
            _ => Ok(None),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &SequenceKey,
        expected_version: u64,
        new_state: &ProspectSequenceState,
    ) -> Result<bool, StoreError> {
        let mut stored = new_state.clone();
        stored.version = expected_version + 1;
        let json = serde_json::to_string(&stored)?;
        let member = key.to_string();
        let terminal = if stored.is_terminal() { "1" } else { "0" };

        let mut conn = self.conn.clone();
        let swapped: i32 = self
            .cas
            .key(self.state_key(key))
            .key(self.due_key())
            .key(self.campaign_key(key.campaign_id))
            .arg(expected_version)
            .arg(json)
            .arg(&member)
            .arg(stored.next_eligible_at.timestamp_millis())
            .arg(terminal)
            .invoke_async(&mut conn)
            .await?;

        if swapped == 0 {
            metrics::counter!("store.redis.cas_conflict").increment(1);
        }
        Ok(swapped == 1)
    }

    async fn list_due_before(
        &self,
        ts: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SequenceKey>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrangebyscore_limit(self.due_key(), "-inf", ts.timestamp_millis(), 0, limit as isize)
            .await?;
        Ok(parse_members(members))
    }

    async fn list_campaign(&self, campaign_id: Uuid) -> Result<Vec<SequenceKey>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.campaign_key(campaign_id)).await?;
        Ok(parse_members(members))
    }
}
