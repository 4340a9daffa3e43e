use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::info;

use crate::calendar::time_format::minute_of_day;
use crate::calendar::{CalendarEvent, EventFilter};
use crate::mock::MockBackend;
use crate::services::{
    AuthService, BackendSwitch, CalendarService, FamilyService, RemoteApi, TokenStorage,
};
use crate::storage::{Config, FamilyStore, PreferencesStore, SqliteStorage, Storage, StorageError};
use crate::sync::{EventQueries, FamilyQueries};
use crate::transport::{ApiException, HttpClient};

pub struct FamilyOrganizer {
    config: Config,
    switch: BackendSwitch,
    mock: Arc<MockBackend>,
    events: EventQueries,
    family: FamilyQueries,
    auth: AuthService,
    family_store: FamilyStore,
    preferences: PreferencesStore,
}

impl FamilyOrganizer {
    pub fn from_config(config: Config) -> Result<Self, StorageError> {
        let storage = Arc::new(SqliteStorage::open(&config.storage.path)?);
        Ok(Self::with_storage(config, storage, Local::now().date_naive()))
    }

    pub fn with_storage(config: Config, storage: Arc<dyn Storage>, today: NaiveDate) -> Self {
        let http = Arc::new(
            HttpClient::new(config.api.base_url.clone(), storage.clone())
                .with_timeout(config.request_timeout()),
        );
        let remote = Arc::new(RemoteApi::new(http.clone()));
        let mock = Arc::new(MockBackend::new(storage.clone(), config.mock_settings()));
        let switch = BackendSwitch::new(config.mock_enabled());

        let calendar = CalendarService::new(remote.clone(), mock.clone(), switch.clone());
        let family_service = FamilyService::new(remote.clone(), mock.clone(), switch.clone());
        let auth = AuthService::new(
            remote,
            mock.clone(),
            switch.clone(),
            TokenStorage::new(storage.clone()),
            http,
        );

        let family_store = FamilyStore::new(storage.clone());
        let preferences = PreferencesStore::new(storage, today);
        let events = EventQueries::new(calendar, config.stale_time(), config.retry_policy());
        let family = FamilyQueries::new(
            family_service,
            family_store.clone(),
            config.stale_time(),
            config.retry_policy(),
        );

        Self {
            config,
            switch,
            mock,
            events,
            family,
            auth,
            family_store,
            preferences,
        }
    }

    /// Loads persisted state. Screens should not read either store before
    /// this completes.
    pub async fn hydrate(&self) {
        tokio::join!(self.family_store.hydrate(), self.preferences.hydrate());
        self.mock.init();
        info!(
            "Organizer ready ({} backend)",
            if self.is_mock() { "mock" } else { "remote" }
        );
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_mock(&self) -> bool {
        self.switch.use_mock()
    }

    pub fn set_use_mock(&self, use_mock: bool) {
        self.switch.set_use_mock(use_mock);
        self.events.invalidate();
    }

    pub fn mock(&self) -> &MockBackend {
        &self.mock
    }

    pub fn events(&self) -> &EventQueries {
        &self.events
    }

    pub fn family(&self) -> &FamilyQueries {
        &self.family
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn family_store(&self) -> &FamilyStore {
        &self.family_store
    }

    pub fn preferences(&self) -> &PreferencesStore {
        &self.preferences
    }

    pub fn reconcile_filter(&self) -> bool {
        self.preferences
            .reconcile_members(&self.family_store.member_ids())
    }

    pub async fn agenda(&self, date: NaiveDate) -> Result<Vec<CalendarEvent>, ApiException> {
        let filter = self.preferences.filter();
        let mut events: Vec<CalendarEvent> = self
            .events
            .events(&EventFilter::day(date))
            .await?
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect();
        events.sort_by_key(|event| (!event.is_all_day, minute_of_day(&event.start_time).ok()));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::EventRequest;
    use crate::family::{FamilyInput, MemberColor, MemberInput};
    use crate::storage::MemoryStorage;
    use crate::storage::kv::FAMILY_KEY;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 23).unwrap()
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.mock.test_mode = true;
        config
    }

    async fn organizer(storage: Arc<MemoryStorage>) -> FamilyOrganizer {
        let organizer = FamilyOrganizer::with_storage(test_config(), storage, today());
        organizer.hydrate().await;
        organizer
    }

    fn member(name: &str, color: MemberColor) -> MemberInput {
        MemberInput {
            name: name.to_string(),
            color,
            avatar_url: None,
            email: None,
        }
    }

    fn event(title: &str, member_id: &str, start: &str, end: &str) -> EventRequest {
        EventRequest {
            title: title.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            date: "2025-12-23".to_string(),
            member_id: member_id.to_string(),
            is_all_day: None,
            location: None,
        }
    }

    #[tokio::test]
    async fn onboarding_through_agenda() {
        let storage = Arc::new(MemoryStorage::new());
        let organizer = organizer(storage).await;
        let family = organizer
            .family()
            .create_family(&FamilyInput {
                name: "The Smiths".to_string(),
                members: Some(vec![
                    member("Alex", MemberColor::Blue),
                    member("Sam", MemberColor::Green),
                ]),
            })
            .await
            .unwrap();
        let (alex, sam) = (&family.members[0].id, &family.members[1].id);
        assert!(organizer.reconcile_filter());

        organizer.events().create_event(&event("Late", alex, "18:00", "19:00")).await.unwrap();
        organizer.events().create_event(&event("Early", sam, "08:00", "09:00")).await.unwrap();
        organizer.preferences().toggle_member(sam);

        let agenda = organizer.agenda(today()).await.unwrap();

        let titles: Vec<&str> = agenda.iter().map(|e| e.title.as_str()).collect();
        assert!(titles.contains(&"Late"));
        assert!(!titles.contains(&"Early"));
    }

    #[tokio::test]
    async fn agenda_orders_by_start_time() {
        let organizer = organizer(Arc::new(MemoryStorage::new())).await;
        organizer.preferences().select_all_members(&["m1".to_string()]);
        organizer.events().create_event(&event("Afternoon", "m1", "2:00 PM", "3:00 PM")).await.unwrap();
        organizer.events().create_event(&event("Morning", "m1", "9:00 AM", "10:00 AM")).await.unwrap();

        let agenda = organizer.agenda(today()).await.unwrap();

        let titles: Vec<&str> = agenda.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Morning", "Afternoon"]);
    }

    #[tokio::test]
    async fn corrupted_family_falls_back_to_onboarding() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(FAMILY_KEY, "garbage").unwrap();

        let organizer = organizer(storage).await;

        assert!(organizer.family_store().has_hydrated());
        assert!(organizer.family_store().family().is_none());
    }

    #[tokio::test]
    async fn empty_base_url_selects_mock() {
        let mut config = test_config();
        config.api.use_mock = false;
        config.api.base_url = String::new();

        let organizer = FamilyOrganizer::with_storage(config, Arc::new(MemoryStorage::new()), today());

        assert!(organizer.is_mock());
        organizer.set_use_mock(false);
        assert!(!organizer.is_mock());
    }
}
