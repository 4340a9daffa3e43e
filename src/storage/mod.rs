pub mod config;
pub mod family_store;
pub mod kv;
pub mod persisted;
pub mod preferences;

pub use config::{Config, ConfigError};
pub use family_store::FamilyStore;
pub use kv::{MemoryStorage, SqliteStorage, Storage, StorageError};
pub use preferences::{CalendarPreferences, CalendarSession, CalendarView, FilterState, PreferencesStore};
