//! In-process fake backend used for development and tests.

pub mod backend;
pub mod sample_events;

pub use backend::{MockBackend, MockSettings};
pub use sample_events::generate_sample_events;
