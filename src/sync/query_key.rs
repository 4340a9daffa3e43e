use std::fmt;

use crate::calendar::{EventFilter, format_local_date};

/// Ordered key segments. A key "falls under" any of its prefixes, which is
/// how whole namespaces are snapshotted and invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn events() -> Self {
        Self::new(["events"])
    }

    pub fn event_lists() -> Self {
        Self::new(["events", "list"])
    }

    /// Every filter field contributes a named segment, so two filters that
    /// differ in any bound or member never share an entry. An unset field is
    /// the bare name, distinct from a set but empty one.
    pub fn events_list(filter: &EventFilter) -> Self {
        let segment = |name: &str, value: Option<String>| match value {
            Some(value) => format!("{}={}", name, value),
            None => name.to_string(),
        };
        Self::new([
            "events".to_string(),
            "list".to_string(),
            segment("start", filter.start_date.map(format_local_date)),
            segment("end", filter.end_date.map(format_local_date)),
            segment("member", filter.member_id.clone()),
        ])
    }

    pub fn event_detail(id: &str) -> Self {
        Self::new(["events", "detail", id])
    }

    pub fn family() -> Self {
        Self::new(["family"])
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
