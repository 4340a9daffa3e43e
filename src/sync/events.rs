use std::time::Duration;

use tracing::{debug, warn};

use super::query_cache::{CacheSubscription, QueryCache, QueryState};
use super::query_key::QueryKey;
use super::retry::RetryPolicy;
use crate::calendar::{CalendarEvent, EventFilter, EventRequest};
use crate::services::CalendarService;
use crate::transport::ApiException;

/// Lists and details live in separate caches under the shared `events`
/// namespace; every mutation snapshots both and either commits or restores
/// them together.
#[derive(Clone)]
pub struct EventQueries {
    service: CalendarService,
    lists: QueryCache<Vec<CalendarEvent>>,
    details: QueryCache<CalendarEvent>,
    retry: RetryPolicy,
}

fn replace_in_lists(lists: &QueryCache<Vec<CalendarEvent>>, event: &CalendarEvent) {
    lists.update_matching(&QueryKey::event_lists(), |_, events| {
        if let Some(slot) = events.iter_mut().find(|e| e.id == event.id) {
            *slot = event.clone();
        }
    });
}

impl EventQueries {
    pub fn new(service: CalendarService, stale_time: Duration, retry: RetryPolicy) -> Self {
        let lists = QueryCache::new(stale_time);
        let details = QueryCache::with_notifier(stale_time, lists.notifier());
        Self {
            service,
            lists,
            details,
            retry,
        }
    }

    pub async fn events(&self, filter: &EventFilter) -> Result<Vec<CalendarEvent>, ApiException> {
        let service = self.service.clone();
        let retry = self.retry.clone();
        let filter = filter.clone();
        let key = QueryKey::events_list(&filter);
        self.lists
            .fetch(&key, move || async move {
                retry.run(|| service.get_events(&filter)).await
            })
            .await
    }

    pub async fn event(&self, id: &str) -> Result<CalendarEvent, ApiException> {
        let service = self.service.clone();
        let retry = self.retry.clone();
        let id = id.to_string();
        let key = QueryKey::event_detail(&id);
        self.details
            .fetch(&key, move || async move { retry.run(|| service.get_event(&id)).await })
            .await
    }

    pub fn list_state(&self, filter: &EventFilter) -> QueryState<Vec<CalendarEvent>> {
        self.lists.state(&QueryKey::events_list(filter))
    }

    pub fn detail_state(&self, id: &str) -> QueryState<CalendarEvent> {
        self.details.state(&QueryKey::event_detail(id))
    }

    pub fn subscribe(&self) -> CacheSubscription {
        self.lists.subscribe(&QueryKey::events())
    }

    pub fn invalidate(&self) {
        self.lists.invalidate(&QueryKey::events());
        self.details.invalidate(&QueryKey::events());
    }

    /// No optimistic insert: the created event lands in lists on their next
    /// revalidation.
    pub async fn create_event(&self, request: &EventRequest) -> Result<CalendarEvent, ApiException> {
        let event = self.service.create_event(request).await?;
        self.details.set(&QueryKey::event_detail(&event.id), event.clone());
        self.lists.invalidate(&QueryKey::events());
        Ok(event)
    }

    pub async fn update_event(&self, id: &str, request: &EventRequest) -> Result<CalendarEvent, ApiException> {
        let request = request.normalized()?;
        let optimistic = CalendarEvent::from_request(id, &request)?;
        let namespace = QueryKey::events();
        let detail_key = QueryKey::event_detail(id);

        let list_token = self.lists.begin_optimistic(&namespace);
        let detail_token = self.details.begin_optimistic(&namespace);
        replace_in_lists(&self.lists, &optimistic);
        self.details.update_matching(&detail_key, |_, event| *event = optimistic.clone());
        debug!("Applied optimistic update to event {}", id);

        match self.service.update_event(id, &request).await {
            Ok(event) => {
                replace_in_lists(&self.lists, &event);
                self.details.set(&detail_key, event.clone());
                self.lists.commit(list_token);
                self.details.commit(detail_token);
                Ok(event)
            }
            Err(error) => {
                warn!("Update of event {} failed, rolling back: {}", id, error);
                self.lists.rollback(list_token);
                self.details.rollback(detail_token);
                Err(error)
            }
        }
    }

    pub async fn delete_event(&self, id: &str) -> Result<(), ApiException> {
        let namespace = QueryKey::events();
        let list_token = self.lists.begin_optimistic(&namespace);
        let detail_token = self.details.begin_optimistic(&namespace);
        self.lists.update_matching(&QueryKey::event_lists(), |_, events| {
            events.retain(|e| e.id != id);
        });
        self.details.remove(&QueryKey::event_detail(id));

        match self.service.delete_event(id).await {
            Ok(()) => {
                self.lists.commit(list_token);
                self.details.commit(detail_token);
                Ok(())
            }
            Err(error) => {
                warn!("Delete of event {} failed, rolling back: {}", id, error);
                self.lists.rollback(list_token);
                self.details.rollback(detail_token);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::EventRecord;
    use crate::mock::{MockBackend, MockSettings};
    use crate::services::{BackendSwitch, MockCalendarApi, MutationResponse};
    use crate::storage::kv::MemoryStorage;
    use crate::transport::ApiErrorKind;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STALE: Duration = Duration::from_secs(60);

    fn record(id: &str, title: &str) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            title: title.to_string(),
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            date: "2025-12-23".to_string(),
            member_id: "m1".to_string(),
            is_all_day: None,
            location: Some("Office".to_string()),
        }
    }

    fn request(title: &str) -> EventRequest {
        EventRequest {
            title: title.to_string(),
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            date: "2025-12-23".to_string(),
            member_id: "m1".to_string(),
            is_all_day: None,
            location: None,
        }
    }

    fn with_api(api: MockCalendarApi, retry: RetryPolicy) -> EventQueries {
        let api = Arc::new(api);
        let service = CalendarService::new(api.clone(), api, BackendSwitch::new(true));
        EventQueries::new(service, STALE, retry)
    }

    fn with_mock_backend() -> EventQueries {
        let backend = Arc::new(MockBackend::new(
            Arc::new(MemoryStorage::new()),
            MockSettings::deterministic(),
        ));
        let service = CalendarService::new(backend.clone(), backend, BackendSwitch::new(true));
        EventQueries::new(service, STALE, RetryPolicy::no_retry())
    }

    fn december() -> EventFilter {
        EventFilter::range(
            NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        )
    }

    #[tokio::test]
    async fn created_event_uses_domain_formats() {
        let queries = with_mock_backend();

        let event = queries.create_event(&request("Team Meeting")).await.unwrap();

        assert_eq!(event.date, NaiveDate::from_ymd_opt(2025, 12, 23).unwrap());
        assert_eq!(event.start_time, "9:00 AM");
        assert_eq!(queries.detail_state(&event.id).data, Some(event));
    }

    #[tokio::test]
    async fn created_event_appears_after_revalidation() {
        let queries = with_mock_backend();
        assert!(queries.events(&december()).await.unwrap().is_empty());

        queries.create_event(&request("Team Meeting")).await.unwrap();

        assert!(queries.list_state(&december()).is_stale);
        assert_eq!(queries.events(&december()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_unknown_event_is_not_found() {
        let queries = with_mock_backend();
        queries.create_event(&request("Keep me")).await.unwrap();
        let before = queries.events(&december()).await.unwrap();

        let err = queries.delete_event("ghost").await.unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::NotFound);
        assert_eq!(err.status, 404);
        assert_eq!(queries.list_state(&december()).data, Some(before));
    }

    #[tokio::test]
    async fn failed_update_rolls_back_every_list() {
        let mut api = MockCalendarApi::new();
        api.expect_list_events()
            .returning(|_| Ok(vec![record("e1", "First"), record("e2", "Second")]));
        api.expect_update_event()
            .times(1)
            .returning(|_, _| Err(ApiException::server("boom")));
        let queries = with_api(api, RetryPolicy::no_retry());
        let original = queries.events(&december()).await.unwrap();
        let everything = queries.events(&EventFilter::default()).await.unwrap();

        let err = queries.update_event("e1", &request("Edited")).await.unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::ServerError);
        assert_eq!(queries.list_state(&december()).data, Some(original));
        assert_eq!(queries.list_state(&EventFilter::default()).data, Some(everything));
    }

    #[tokio::test]
    async fn update_replaces_event_in_cached_lists() {
        let mut api = MockCalendarApi::new();
        api.expect_list_events()
            .times(1)
            .returning(|_| Ok(vec![record("e1", "First"), record("e2", "Second")]));
        api.expect_update_event().returning(|id, request| {
            Ok(MutationResponse::new(request.to_record(id).unwrap(), "Event updated"))
        });
        let queries = with_api(api, RetryPolicy::no_retry());
        queries.events(&december()).await.unwrap();

        let updated = queries.update_event("e1", &request("Edited")).await.unwrap();

        let state = queries.list_state(&december());
        let cached = state.data.unwrap();
        assert_eq!(cached[0], updated);
        assert_eq!(cached[0].location, None);
        assert_eq!(cached[1].title, "Second");
        assert!(state.is_stale);
    }

    #[tokio::test]
    async fn invalid_update_touches_nothing() {
        let mut api = MockCalendarApi::new();
        api.expect_list_events().returning(|_| Ok(vec![record("e1", "First")]));
        api.expect_update_event().never();
        let queries = with_api(api, RetryPolicy::no_retry());
        queries.events(&december()).await.unwrap();

        let err = queries.update_event("e1", &request("")).await.unwrap_err();

        assert_eq!(err.field.as_deref(), Some("title"));
        assert!(!queries.list_state(&december()).is_stale);
    }

    #[tokio::test]
    async fn successful_delete_removes_from_lists() {
        let mut api = MockCalendarApi::new();
        api.expect_list_events()
            .times(1)
            .returning(|_| Ok(vec![record("e1", "First"), record("e2", "Second")]));
        api.expect_delete_event().returning(|_| Ok(()));
        let queries = with_api(api, RetryPolicy::no_retry());
        queries.events(&december()).await.unwrap();

        queries.delete_event("e1").await.unwrap();

        let ids: Vec<String> = queries
            .list_state(&december())
            .data
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["e2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_retry_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut api = MockCalendarApi::new();
        api.expect_list_events().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiException::server("flaky"))
            } else {
                Ok(vec![record("e1", "First")])
            }
        });
        let queries = with_api(api, RetryPolicy::new(3, Duration::from_millis(10)));

        let events = queries.events(&december()).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn mutations_are_not_retried() {
        let mut api = MockCalendarApi::new();
        api.expect_delete_event()
            .times(1)
            .returning(|_| Err(ApiException::server("down")));
        let queries = with_api(api, RetryPolicy::new(5, Duration::ZERO));

        assert!(queries.delete_event("e1").await.is_err());
    }

    #[tokio::test]
    async fn subscribers_hear_about_mutations() {
        let queries = with_mock_backend();
        let mut changes = queries.subscribe();

        let event = queries.create_event(&request("Team Meeting")).await.unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.key, QueryKey::event_detail(&event.id));
    }
}
