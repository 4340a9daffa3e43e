pub mod app;
pub mod calendar;
pub mod family;
pub mod mock;
pub mod services;
pub mod storage;
pub mod sync;
pub mod transport;

pub use app::FamilyOrganizer;
pub use calendar::{CalendarEvent, EventFilter, EventRequest};
pub use family::{FamilyData, FamilyMember, MemberColor};
pub use transport::{ApiErrorKind, ApiException};
