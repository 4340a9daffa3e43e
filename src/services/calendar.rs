use std::sync::Arc;

use tracing::{debug, info};

use super::{BackendSwitch, Backends, CalendarApi};
use crate::calendar::{CalendarEvent, EventFilter, EventRecord, EventRequest};
use crate::transport::ApiException;

/// Calendar operations in domain form. Requests are validated and normalized
/// before they leave; responses are converted from wire records.
#[derive(Clone)]
pub struct CalendarService {
    backends: Backends<dyn CalendarApi>,
}

fn to_events(records: Vec<EventRecord>) -> Result<Vec<CalendarEvent>, ApiException> {
    records.into_iter().map(CalendarEvent::from_record).collect()
}

impl CalendarService {
    pub fn new(remote: Arc<dyn CalendarApi>, mock: Arc<dyn CalendarApi>, switch: BackendSwitch) -> Self {
        Self {
            backends: Backends::new(remote, mock, switch),
        }
    }

    pub async fn get_events(&self, filter: &EventFilter) -> Result<Vec<CalendarEvent>, ApiException> {
        debug!("Loading events for {:?}", filter);
        let records = self.backends.current().list_events(filter).await?;
        to_events(records)
    }

    pub async fn get_event(&self, id: &str) -> Result<CalendarEvent, ApiException> {
        let record = self.backends.current().get_event(id).await?;
        CalendarEvent::from_record(record)
    }

    pub async fn create_event(&self, request: &EventRequest) -> Result<CalendarEvent, ApiException> {
        let request = request.normalized()?;
        let response = self.backends.current().create_event(&request).await?;
        info!("Created event {}", response.data.id);
        CalendarEvent::from_record(response.data)
    }

    pub async fn update_event(&self, id: &str, request: &EventRequest) -> Result<CalendarEvent, ApiException> {
        let request = request.normalized()?;
        let response = self.backends.current().update_event(id, &request).await?;
        info!("Updated event {}", id);
        CalendarEvent::from_record(response.data)
    }

    pub async fn delete_event(&self, id: &str) -> Result<(), ApiException> {
        self.backends.current().delete_event(id).await?;
        info!("Deleted event {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockCalendarApi, MutationResponse};
    use crate::transport::ApiErrorKind;
    use chrono::NaiveDate;

    fn record(id: &str) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            title: "Team Meeting".to_string(),
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            date: "2025-12-23".to_string(),
            member_id: "m1".to_string(),
            is_all_day: None,
            location: None,
        }
    }

    fn service_with(remote: MockCalendarApi, mock: MockCalendarApi, use_mock: bool) -> (CalendarService, BackendSwitch) {
        let switch = BackendSwitch::new(use_mock);
        (CalendarService::new(Arc::new(remote), Arc::new(mock), switch.clone()), switch)
    }

    #[tokio::test]
    async fn create_returns_domain_event() {
        let mut mock = MockCalendarApi::new();
        mock.expect_create_event()
            .withf(|request| request.start_time == "09:00" && request.date == "2025-12-23")
            .returning(|_| Ok(MutationResponse::new(record("e1"), "Event created")));
        let (service, _) = service_with(MockCalendarApi::new(), mock, true);

        let request = EventRequest {
            title: "Team Meeting".to_string(),
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            date: "2025-12-23".to_string(),
            member_id: "m1".to_string(),
            is_all_day: None,
            location: None,
        };
        let event = service.create_event(&request).await.unwrap();

        assert_eq!(event.date, NaiveDate::from_ymd_opt(2025, 12, 23).unwrap());
        assert_eq!(event.start_time, "9:00 AM");
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_backend() {
        let (service, _) = service_with(MockCalendarApi::new(), MockCalendarApi::new(), true);
        let request = EventRequest {
            title: String::new(),
            ..EventRequest::default()
        };

        let err = service.create_event(&request).await.unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn backend_choice_follows_switch() {
        let mut remote = MockCalendarApi::new();
        remote.expect_list_events().times(1).returning(|_| Ok(vec![record("remote")]));
        let mut mock = MockCalendarApi::new();
        mock.expect_list_events().times(1).returning(|_| Ok(vec![record("mock")]));
        let (service, switch) = service_with(remote, mock, true);

        let from_mock = service.get_events(&EventFilter::default()).await.unwrap();
        switch.set_use_mock(false);
        let from_remote = service.get_events(&EventFilter::default()).await.unwrap();

        assert_eq!(from_mock[0].id, "mock");
        assert_eq!(from_remote[0].id, "remote");
    }

    #[tokio::test]
    async fn malformed_record_is_a_typed_error() {
        let mut mock = MockCalendarApi::new();
        mock.expect_get_event().returning(|_| {
            let mut bad = record("e1");
            bad.date = "2025-13-45".to_string();
            Ok(bad)
        });
        let (service, _) = service_with(MockCalendarApi::new(), mock, true);

        let err = service.get_event("e1").await.unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::NetworkError);
    }
}
