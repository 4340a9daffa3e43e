use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::time_format::{
    format_24h_to_12h, format_local_date, is_valid_time_range, minute_of_day, parse_local_date,
};
use crate::transport::ApiException;

const MAX_TITLE_LEN: usize = 100;

/// An event as the application sees it: a calendar day plus display times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub date: NaiveDate,
    pub member_id: String,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// An event as it travels over the wire and sits in mock storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub date: String,
    pub member_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_all_day: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub date: String,
    pub member_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_all_day: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EventFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub member_id: Option<String>,
}

fn wire_time(value: &str, field: &str) -> Result<String, ApiException> {
    let minutes = minute_of_day(value)
        .map_err(|_| ApiException::validation(field, format!("Invalid time '{}'", value)))?;
    Ok(format!("{:02}:{:02}", minutes / 60, minutes % 60))
}

fn display_time(value: &str) -> Result<String, ApiException> {
    let wire = wire_time(value, "time").map_err(|e| ApiException::decode(e.message))?;
    format_24h_to_12h(&wire).map_err(|e| ApiException::decode(e.to_string()))
}

impl EventRequest {
    pub fn validate(&self) -> Result<(), ApiException> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ApiException::validation("title", "Title is required"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ApiException::validation(
                "title",
                format!("Title must be at most {} characters", MAX_TITLE_LEN),
            ));
        }
        if self.member_id.trim().is_empty() {
            return Err(ApiException::validation("memberId", "Member is required"));
        }
        parse_local_date(&self.date).map_err(|e| ApiException::validation("date", e.to_string()))?;
        wire_time(&self.start_time, "startTime")?;
        wire_time(&self.end_time, "endTime")?;

        if !self.is_all_day.unwrap_or(false) && !is_valid_time_range(&self.start_time, &self.end_time) {
            return Err(ApiException::validation("endTime", "End time must be after start time"));
        }
        Ok(())
    }

    /// The stored form of this request under `id`. Fields absent from the
    /// request are absent from the result.
    pub fn to_record(&self, id: &str) -> Result<EventRecord, ApiException> {
        self.validate()?;
        Ok(EventRecord {
            id: id.to_string(),
            title: self.title.trim().to_string(),
            start_time: wire_time(&self.start_time, "startTime")?,
            end_time: wire_time(&self.end_time, "endTime")?,
            date: self.date.clone(),
            member_id: self.member_id.clone(),
            is_all_day: self.is_all_day,
            location: self.location.clone().filter(|l| !l.trim().is_empty()),
        })
    }

    pub fn normalized(&self) -> Result<EventRequest, ApiException> {
        let record = self.to_record("")?;
        Ok(EventRequest {
            title: record.title,
            start_time: record.start_time,
            end_time: record.end_time,
            date: record.date,
            member_id: record.member_id,
            is_all_day: record.is_all_day,
            location: record.location,
        })
    }
}

impl CalendarEvent {
    pub fn from_record(record: EventRecord) -> Result<Self, ApiException> {
        let date = parse_local_date(&record.date).map_err(|e| ApiException::decode(e.to_string()))?;
        Ok(Self {
            start_time: display_time(&record.start_time)?,
            end_time: display_time(&record.end_time)?,
            id: record.id,
            title: record.title,
            date,
            member_id: record.member_id,
            is_all_day: record.is_all_day.unwrap_or(false),
            location: record.location,
        })
    }

    /// What the event under `id` is expected to look like once `request` is
    /// accepted; used for optimistic cache writes.
    pub fn from_request(id: &str, request: &EventRequest) -> Result<Self, ApiException> {
        Self::from_record(request.to_record(id)?)
    }

    pub fn to_request(&self) -> EventRequest {
        EventRequest {
            title: self.title.clone(),
            start_time: wire_time(&self.start_time, "startTime").unwrap_or_else(|_| self.start_time.clone()),
            end_time: wire_time(&self.end_time, "endTime").unwrap_or_else(|_| self.end_time.clone()),
            date: format_local_date(self.date),
            member_id: self.member_id.clone(),
            is_all_day: self.is_all_day.then_some(true),
            location: self.location.clone(),
        }
    }

    pub fn duration_minutes(&self) -> Option<i64> {
        let start = minute_of_day(&self.start_time).ok()?;
        let end = minute_of_day(&self.end_time).ok()?;
        Some(end as i64 - start as i64)
    }

    pub fn overlaps(&self, other: &CalendarEvent) -> bool {
        if self.date != other.date {
            return false;
        }
        if self.is_all_day || other.is_all_day {
            return true;
        }
        match (
            minute_of_day(&self.start_time),
            minute_of_day(&self.end_time),
            minute_of_day(&other.start_time),
            minute_of_day(&other.end_time),
        ) {
            (Ok(s1), Ok(e1), Ok(s2), Ok(e2)) => s1 < e2 && s2 < e1,
            _ => false,
        }
    }
}

impl EventFilter {
    pub fn range(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date: Some(start_date),
            end_date: Some(end_date),
            member_id: None,
        }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::range(date, date)
    }

    pub fn with_member(mut self, member_id: impl Into<String>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }

    /// Inclusive on both ends; each bound is optional.
    pub fn matches(&self, date: NaiveDate, member_id: &str) -> bool {
        self.start_date.is_none_or(|start| date >= start)
            && self.end_date.is_none_or(|end| date <= end)
            && self.member_id.as_deref().is_none_or(|m| m == member_id)
    }

    pub fn query_params(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("startDate", self.start_date.map(format_local_date)),
            ("endDate", self.end_date.map(format_local_date)),
            ("memberId", self.member_id.clone()),
        ]
    }
}
