use std::{any::Any, collections::HashMap, sync::Arc};

use moka::sync::Cache;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Small enough that a `UserInfo` never holds more distinct typed keys than
/// this in practice; bounding it keeps the cache itself cheap to allocate
/// per record rather than needing it shared across records.
const DECODE_CACHE_CAPACITY: u64 = 32;

fn new_decode_cache() -> Cache<String, Arc<dyn Any + Send + Sync>> {
    Cache::builder().max_capacity(DECODE_CACHE_CAPACITY).build()
}

/// A typed key into a `UserInfo` map.
///
/// Host applications declare one zero-sized type per key they want to attach
/// to a `Task` or `Outcome`, implement this trait for it, and use `UserInfo::
/// get`/`set` generically. The string identifier is what actually gets
/// persisted; the Rust type only exists to make reads type-safe.
pub trait UserInfoKey: 'static {
    type Value: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Stable string identifier persisted alongside the value.
    fn key() -> &'static str;
}

/// Heterogeneous key -> value map attached to `Task` and `Outcome` records.
///
/// Values are stored encoded (`serde_json::Value`) so the map itself stays
/// plain old data (cloneable, (de)serializable, storable as a JSON column).
/// A decode is memoized the first time a given key is read so repeated
/// `get::<K>()` calls on the same record do not re-run `serde_json::from_value`.
#[derive(Debug)]
pub struct UserInfo {
    raw: HashMap<String, Value>,
    decode_cache: Cache<String, Arc<dyn Any + Send + Sync>>,
}

impl Default for UserInfo {
    fn default() -> Self {
        Self { raw: HashMap::new(), decode_cache: new_decode_cache() }
    }
}

impl UserInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn set<K: UserInfoKey>(&mut self, value: K::Value) {
        let encoded = serde_json::to_value(&value).unwrap_or(Value::Null);
        self.raw.insert(K::key().to_string(), encoded);
        self.decode_cache.insert(K::key().to_string(), Arc::new(value));
    }

    pub fn remove<K: UserInfoKey>(&mut self) {
        self.raw.remove(K::key());
        self.decode_cache.remove(K::key());
    }

    pub fn get<K: UserInfoKey>(&self) -> Option<K::Value> {
        if let Some(hit) = self.decode_cache.get(K::key()) {
            return hit.downcast_ref::<K::Value>().cloned();
        }

        let raw = self.raw.get(K::key())?;
        let decoded: K::Value = serde_json::from_value(raw.clone()).ok()?;
        self.decode_cache.insert(K::key().to_string(), Arc::new(decoded.clone()));
        Some(decoded)
    }

    /// Encode this map to a JSON value for persistence.
    pub fn to_json(&self) -> Value {
        Value::Object(self.raw.clone().into_iter().collect())
    }

    /// Decode a persisted JSON value back into a `UserInfo`.
    pub fn from_json(value: Value) -> Self {
        let raw = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self { raw, decode_cache: new_decode_cache() }
    }
}

impl Clone for UserInfo {
    fn clone(&self) -> Self {
        // The decode cache holds type-erased `Arc`s keyed by string; cloning
        // is cheap to just drop since a fresh clone re-decodes lazily.
        Self { raw: self.raw.clone(), decode_cache: new_decode_cache() }
    }
}

impl Serialize for UserInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UserInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_json(value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct ReminderOffsetMinutes;
    impl UserInfoKey for ReminderOffsetMinutes {
        type Value = i64;
        fn key() -> &'static str {
            "reminderOffsetMinutes"
        }
    }

    struct Tags;
    impl UserInfoKey for Tags {
        type Value = Vec<String>;
        fn key() -> &'static str {
            "tags"
        }
    }

    #[test]
    fn round_trips_typed_values() {
        let mut info = UserInfo::new();
        info.set::<ReminderOffsetMinutes>(15);
        info.set::<Tags>(vec!["weight".into(), "morning".into()]);

        assert_eq!(info.get::<ReminderOffsetMinutes>(), Some(15));
        assert_eq!(
            info.get::<Tags>(),
            Some(vec!["weight".to_string(), "morning".to_string()])
        );
    }

    #[test]
    fn missing_key_is_none() {
        let info = UserInfo::new();
        assert_eq!(info.get::<ReminderOffsetMinutes>(), None);
    }

    #[test]
    fn survives_json_round_trip() {
        let mut info = UserInfo::new();
        info.set::<ReminderOffsetMinutes>(42);
        let json = info.to_json();
        let restored = UserInfo::from_json(json);
        assert_eq!(restored.get::<ReminderOffsetMinutes>(), Some(42));
    }

    #[test]
    fn remove_clears_value_and_cache() {
        let mut info = UserInfo::new();
        info.set::<ReminderOffsetMinutes>(5);
        info.remove::<ReminderOffsetMinutes>();
        assert_eq!(info.get::<ReminderOffsetMinutes>(), None);
    }
}
