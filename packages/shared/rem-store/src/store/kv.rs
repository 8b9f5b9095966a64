use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

use crate::error::{Result, StoreError};

// Compare-and-set keyed on the record's `rev` field. Expected rev "0" means
// "key must not exist". A shared ConnectionManager cannot run WATCH/MULTI,
// so the check-and-write happens server-side.
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if cur == false then
  if ARGV[1] ~= '0' then return 0 end
else
  local ok, decoded = pcall(cjson.decode, cur)
  if not ok then return 0 end
  if tostring(decoded['rev']) ~= ARGV[1] then return 0 end
end
if tonumber(ARGV[3]) > 0 then
  redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
else
  redis.call('SET', KEYS[1], ARGV[2])
end
return 1
"#;

#[derive(Clone)]
pub struct KvStore {
    conn: ConnectionManager,
}

impl KvStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(StoreError::Redis)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn put_json(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value)?;
        match ttl {
            Some(d) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(&payload)
                    .arg("EX")
                    .arg(d.as_secs().max(1))
                    .query_async::<_, ()>(&mut conn)
                    .await?;
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(&payload)
                    .query_async::<_, ()>(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// All (key, value) pairs under a prefix. Keys are sorted so the result
    /// order is stable across runs regardless of SCAN bucket order.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys: Vec<String> = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get_json(&key).await? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Linear filter over a prefix: keep values whose `field` equals
    /// `expected`. Meant for small namespaces (device codes, per-tenant
    /// name maps), not table scans.
    pub async fn find_by_field(
        &self,
        prefix: &str,
        field: &str,
        expected: &serde_json::Value,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        let all = self.scan_prefix(prefix).await?;
        Ok(all
            .into_iter()
            .filter(|(_, v)| v.get(field) == Some(expected))
            .collect())
    }

    /// Returns true when the write happened; false means the revision moved
    /// underneath the caller, who should re-read and retry.
    pub async fn compare_and_set(
        &self,
        key: &str,
        expected_rev: u64,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value)?;
        let ttl_secs = ttl.map(|d| d.as_secs().max(1)).unwrap_or(0);
        let applied: i32 = Script::new(CAS_SCRIPT)
            .key(key)
            .arg(expected_rev.to_string())
            .arg(payload)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }
}
