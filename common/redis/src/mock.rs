use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Client, CustomRedisError};

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    ttl_seconds: Option<u64>,
}

/// In-memory stand-in for Redis.
///
/// Unlike a canned-response mock this one keeps state, so a value written with
/// `set_bytes` is visible to a later `get_raw_bytes` and tag sets behave like
/// real sets. Expiry is recorded but never enforced. Clones share state.
#[derive(Clone)]
pub struct MockRedisClient {
    data: Arc<Mutex<HashMap<String, StoredEntry>>>,
    // (op, key) -> error returned instead of touching the data
    errors: Arc<Mutex<HashMap<(String, String), CustomRedisError>>>,
    set_operations: bool,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

impl Default for MockRedisClient {
    fn default() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            errors: Arc::new(Mutex::new(HashMap::new())),
            set_operations: true,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that only speaks plain key-value commands.
    pub fn without_set_operations(&mut self) -> Self {
        self.set_operations = false;
        self.clone()
    }

    fn inject(&mut self, op: &str, key: &str, err: CustomRedisError) {
        lock(&self.errors).insert((op.to_owned(), key.to_owned()), err);
    }

    /// `Ok` seeds the stored bytes, `Err` makes every read of `key` fail.
    pub fn get_raw_bytes_ret(
        &mut self,
        key: &str,
        ret: Result<Vec<u8>, CustomRedisError>,
    ) -> Self {
        match ret {
            Ok(bytes) => {
                lock(&self.data).insert(
                    key.to_owned(),
                    StoredEntry {
                        value: StoredValue::Bytes(bytes),
                        ttl_seconds: None,
                    },
                );
            }
            Err(err) => self.inject("get_raw_bytes", key, err),
        }
        self.clone()
    }

    pub fn set_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        if let Err(err) = ret {
            self.inject("set_bytes", key, err);
        }
        self.clone()
    }

    pub fn del_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        if let Err(err) = ret {
            self.inject("del", key, err);
        }
        self.clone()
    }

    /// `Ok` seeds the set members, `Err` makes every read of the set fail.
    pub fn smembers_ret(&mut self, key: &str, ret: Result<Vec<String>, CustomRedisError>) -> Self {
        match ret {
            Ok(members) => {
                lock(&self.data).insert(
                    key.to_owned(),
                    StoredEntry {
                        value: StoredValue::Set(members.into_iter().collect()),
                        ttl_seconds: None,
                    },
                );
            }
            Err(err) => self.inject("smembers", key, err),
        }
        self.clone()
    }

    pub fn sadd_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        if let Err(err) = ret {
            self.inject("sadd_extend_ttl", key, err);
        }
        self.clone()
    }

    pub fn srem_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        if let Err(err) = ret {
            self.inject("srem", key, err);
        }
        self.clone()
    }

    pub fn drain_set_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        if let Err(err) = ret {
            self.inject("drain_set", key, err);
        }
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<MockRedisCall> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.data).contains_key(key)
    }

    pub fn stored_bytes(&self, key: &str) -> Option<Vec<u8>> {
        match lock(&self.data).get(key) {
            Some(StoredEntry {
                value: StoredValue::Bytes(bytes),
                ..
            }) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn set_members(&self, key: &str) -> Vec<String> {
        match lock(&self.data).get(key) {
            Some(StoredEntry {
                value: StoredValue::Set(members),
                ..
            }) => members.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        lock(&self.data).get(key).and_then(|entry| entry.ttl_seconds)
    }

    fn record(&self, op: &str, key: String, value: MockRedisValue) {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key,
            value,
        });
    }

    fn injected(&self, op: &str, key: &str) -> Option<CustomRedisError> {
        lock(&self.errors)
            .get(&(op.to_owned(), key.to_owned()))
            .cloned()
    }

    fn wrong_type() -> CustomRedisError {
        CustomRedisError::from_redis_kind(
            redis::ErrorKind::TypeError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockRedisValue {
    None,
    Bytes(Vec<u8>),
    BytesWithTTL(Vec<u8>, Option<u64>),
    Member(String),
    MemberWithTTL(String, u64),
}

#[derive(Debug, Clone)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get_raw_bytes(&self, key: String) -> Result<Vec<u8>, CustomRedisError> {
        self.record("get_raw_bytes", key.clone(), MockRedisValue::None);

        if let Some(err) = self.injected("get_raw_bytes", &key) {
            return Err(err);
        }

        match lock(&self.data).get(&key) {
            Some(StoredEntry {
                value: StoredValue::Bytes(bytes),
                ..
            }) => Ok(bytes.clone()),
            Some(_) => Err(Self::wrong_type()),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn set_bytes(
        &self,
        key: String,
        value: Vec<u8>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CustomRedisError> {
        self.record(
            "set_bytes",
            key.clone(),
            MockRedisValue::BytesWithTTL(value.clone(), ttl_seconds),
        );

        if let Some(err) = self.injected("set_bytes", &key) {
            return Err(err);
        }

        lock(&self.data).insert(
            key,
            StoredEntry {
                value: StoredValue::Bytes(value),
                ttl_seconds,
            },
        );
        Ok(())
    }

    async fn del(&self, key: String) -> Result<(), CustomRedisError> {
        self.record("del", key.clone(), MockRedisValue::None);

        if let Some(err) = self.injected("del", &key) {
            return Err(err);
        }

        lock(&self.data).remove(&key);
        Ok(())
    }

    fn supports_set_operations(&self) -> bool {
        self.set_operations
    }

    async fn sadd_extend_ttl(
        &self,
        key: String,
        member: String,
        ttl_seconds: u64,
    ) -> Result<(), CustomRedisError> {
        if !self.set_operations {
            return Err(CustomRedisError::Unsupported("sadd"));
        }

        self.record(
            "sadd_extend_ttl",
            key.clone(),
            MockRedisValue::MemberWithTTL(member.clone(), ttl_seconds),
        );

        if let Some(err) = self.injected("sadd_extend_ttl", &key) {
            return Err(err);
        }

        let mut data = lock(&self.data);
        let entry = data.entry(key).or_insert_with(|| StoredEntry {
            value: StoredValue::Set(BTreeSet::new()),
            ttl_seconds: None,
        });
        match &mut entry.value {
            StoredValue::Set(members) => {
                members.insert(member);
            }
            StoredValue::Bytes(_) => return Err(Self::wrong_type()),
        }
        match entry.ttl_seconds {
            Some(current) if current >= ttl_seconds => {}
            _ => entry.ttl_seconds = Some(ttl_seconds),
        }
        Ok(())
    }

    async fn srem(&self, key: String, member: String) -> Result<(), CustomRedisError> {
        if !self.set_operations {
            return Err(CustomRedisError::Unsupported("srem"));
        }

        self.record("srem", key.clone(), MockRedisValue::Member(member.clone()));

        if let Some(err) = self.injected("srem", &key) {
            return Err(err);
        }

        let mut data = lock(&self.data);
        let now_empty = match data.get_mut(&key) {
            Some(StoredEntry {
                value: StoredValue::Set(members),
                ..
            }) => {
                members.remove(&member);
                members.is_empty()
            }
            Some(_) => return Err(Self::wrong_type()),
            None => false,
        };
        // Redis drops a set together with its last member
        if now_empty {
            data.remove(&key);
        }
        Ok(())
    }

    async fn smembers(&self, key: String) -> Result<Vec<String>, CustomRedisError> {
        if !self.set_operations {
            return Err(CustomRedisError::Unsupported("smembers"));
        }

        self.record("smembers", key.clone(), MockRedisValue::None);

        if let Some(err) = self.injected("smembers", &key) {
            return Err(err);
        }

        match lock(&self.data).get(&key) {
            Some(StoredEntry {
                value: StoredValue::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(Self::wrong_type()),
            None => Ok(Vec::new()),
        }
    }

    async fn drain_set(&self, key: String) -> Result<u64, CustomRedisError> {
        if !self.set_operations {
            return Err(CustomRedisError::Unsupported("drain_set"));
        }

        self.record("drain_set", key.clone(), MockRedisValue::None);

        if let Some(err) = self.injected("drain_set", &key) {
            return Err(err);
        }

        // One lock for the whole step, like the server-side script
        let mut data = lock(&self.data);
        let members = match data.get(&key) {
            Some(StoredEntry {
                value: StoredValue::Set(members),
                ..
            }) => members.clone(),
            Some(_) => return Err(Self::wrong_type()),
            None => return Ok(0),
        };
        let removed = members
            .iter()
            .filter(|member| data.remove(*member).is_some())
            .count();
        data.remove(&key);
        Ok(removed as u64)
    }
}
