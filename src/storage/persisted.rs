use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::kv::{Storage, StorageError};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    state: T,
}

/// Outcome of reading a persisted value: absent, present, or present but
/// not decodable into `T`.
#[derive(Debug)]
pub enum Loaded<T> {
    Missing,
    Found(T),
    Corrupt(String),
}

pub fn load_state<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Loaded<T>, StorageError> {
    let Some(raw) = storage.get(key)? else {
        return Ok(Loaded::Missing);
    };
    match serde_json::from_str::<Envelope<T>>(&raw) {
        Ok(envelope) if envelope.version == STATE_VERSION => Ok(Loaded::Found(envelope.state)),
        Ok(envelope) => Ok(Loaded::Corrupt(format!(
            "unsupported state version {}",
            envelope.version
        ))),
        Err(e) => Ok(Loaded::Corrupt(e.to_string())),
    }
}

pub fn save_state<T: Serialize>(storage: &dyn Storage, key: &str, state: &T) -> Result<(), StorageError> {
    let envelope = Envelope {
        version: STATE_VERSION,
        state,
    };
    storage.set(key, &serde_json::to_string(&envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStorage;

    #[test]
    fn saved_state_loads_back() {
        let storage = MemoryStorage::new();
        save_state(&storage, "k", &vec![1, 2, 3]).unwrap();

        match load_state::<Vec<i32>>(&storage, "k").unwrap() {
            Loaded::Found(v) => assert_eq!(v, vec![1, 2, 3]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_key_is_missing() {
        let storage = MemoryStorage::new();
        assert!(matches!(load_state::<i32>(&storage, "k").unwrap(), Loaded::Missing));
    }

    #[test]
    fn garbage_is_corrupt() {
        let storage = MemoryStorage::new();
        storage.set("k", "not json").unwrap();
        assert!(matches!(load_state::<i32>(&storage, "k").unwrap(), Loaded::Corrupt(_)));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let storage = MemoryStorage::new();
        storage.set("k", r#"{"version":99,"state":5}"#).unwrap();
        assert!(matches!(load_state::<i32>(&storage, "k").unwrap(), Loaded::Corrupt(_)));
    }
}
