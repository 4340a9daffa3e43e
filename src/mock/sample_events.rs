use chrono::{Days, NaiveDate};

use crate::calendar::{EventRecord, format_local_date};
use crate::family::FamilyMember;

/// (title, day offset from today, start, end, location)
const SAMPLES: [(&str, i64, &str, &str, Option<&str>); 8] = [
    ("School Drop-off", 0, "08:00", "08:30", None),
    ("Soccer Practice", 0, "16:00", "17:30", Some("Riverside Park")),
    ("Dentist Appointment", 1, "10:00", "11:00", Some("Smile Dental")),
    ("Piano Lesson", 1, "15:30", "16:15", None),
    ("Grocery Run", 2, "18:00", "19:00", Some("Market Street")),
    ("Family Movie Night", 3, "19:00", "21:00", None),
    ("Book Club", -1, "12:30", "13:30", Some("Downtown Cafe")),
    ("Swim Meet", -2, "09:00", "12:00", Some("Community Pool")),
];

fn shift(today: NaiveDate, offset: i64) -> Option<NaiveDate> {
    if offset >= 0 {
        today.checked_add_days(Days::new(offset as u64))
    } else {
        today.checked_sub_days(Days::new(offset.unsigned_abs()))
    }
}

/// A few days of events around `today`, handed out to members in turn.
pub fn generate_sample_events(members: &[FamilyMember], today: NaiveDate) -> Vec<EventRecord> {
    if members.is_empty() {
        return Vec::new();
    }

    let mut events: Vec<EventRecord> = SAMPLES
        .iter()
        .enumerate()
        .filter_map(|(i, (title, offset, start, end, location))| {
            let date = shift(today, *offset)?;
            let member = &members[i % members.len()];
            Some(EventRecord {
                id: format!("sample_{}", i),
                title: title.to_string(),
                start_time: start.to_string(),
                end_time: end.to_string(),
                date: format_local_date(date),
                member_id: member.id.clone(),
                is_all_day: None,
                location: location.map(String::from),
            })
        })
        .collect();

    if let Some(date) = shift(today, 5) {
        events.push(EventRecord {
            id: "sample_all_day".to_string(),
            title: "Family Day Trip".to_string(),
            start_time: "00:00".to_string(),
            end_time: "23:59".to_string(),
            date: format_local_date(date),
            member_id: members[0].id.clone(),
            is_all_day: Some(true),
            location: None,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::EventRequest;
    use crate::family::MemberColor;

    fn members() -> Vec<FamilyMember> {
        ["m1", "m2", "m3"]
            .iter()
            .zip(MemberColor::ALL)
            .map(|(id, color)| FamilyMember {
                id: id.to_string(),
                name: id.to_uppercase(),
                color,
                avatar_url: None,
                email: None,
            })
            .collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()
    }

    #[test]
    fn no_members_means_no_samples() {
        assert!(generate_sample_events(&[], today()).is_empty());
    }

    #[test]
    fn samples_are_spread_over_members() {
        let events = generate_sample_events(&members(), today());

        for id in ["m1", "m2", "m3"] {
            assert!(events.iter().any(|e| e.member_id == id));
        }
    }

    #[test]
    fn samples_cross_year_boundary_cleanly() {
        let events = generate_sample_events(&members(), today());
        assert!(events.iter().any(|e| e.date == "2026-01-01"));
        assert!(events.iter().any(|e| e.date == "2025-12-29"));
    }

    #[test]
    fn samples_are_valid_requests() {
        for event in generate_sample_events(&members(), today()) {
            let request = EventRequest {
                title: event.title,
                start_time: event.start_time,
                end_time: event.end_time,
                date: event.date,
                member_id: event.member_id,
                is_all_day: event.is_all_day,
                location: event.location,
            };
            assert!(request.validate().is_ok(), "{:?}", request);
        }
    }
}
