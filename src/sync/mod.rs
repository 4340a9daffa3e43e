//! Query cache and mutation layer between the services and the screens.

pub mod events;
pub mod family;
pub mod query_cache;
pub mod query_key;
pub mod retry;

pub use events::EventQueries;
pub use family::FamilyQueries;
pub use query_cache::{
    CacheChange, CacheEvent, CacheSubscription, QueryCache, QueryState, QueryStatus, QueryView,
    SnapshotToken,
};
pub use query_key::QueryKey;
pub use retry::RetryPolicy;
