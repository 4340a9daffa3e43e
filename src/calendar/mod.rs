pub mod event;
pub mod time_format;

pub use event::{CalendarEvent, EventFilter, EventRecord, EventRequest};
pub use time_format::{
    TimeFormatError, format_12h_to_24h, format_24h_to_12h, format_local_date, parse_local_date,
};
