use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::sample_events::generate_sample_events;
use crate::calendar::{EventFilter, EventRecord, EventRequest, parse_local_date};
use crate::family::member::validate_family_name;
use crate::family::{FamilyData, FamilyInput, FamilyMember, MemberInput};
use crate::services::{
    AuthApi, AuthUser, CalendarApi, Credentials, FamilyApi, MutationResponse, Session,
};
use crate::storage::kv::{FAMILY_KEY, MOCK_EVENTS_KEY, Storage, lock};
use crate::storage::persisted::{Loaded, load_state, save_state};
use crate::transport::ApiException;

#[derive(Debug, Clone, PartialEq)]
pub struct MockSettings {
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub failure_rate: f64,
    /// Automated-test mode: no latency and no injected failures.
    pub test_mode: bool,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(200),
            max_latency: Duration::from_millis(800),
            failure_rate: 0.05,
            test_mode: false,
        }
    }
}

impl MockSettings {
    pub fn deterministic() -> Self {
        Self {
            test_mode: true,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct EventState {
    records: Vec<EventRecord>,
    loaded: bool,
    /// Storage held no event list when first loaded; cleared once samples
    /// are written.
    needs_samples: bool,
}

/// In-process stand-in for the backend API.
///
/// Events live in memory and are mirrored to storage after every mutation.
/// Family endpoints work directly on the persisted family snapshot.
pub struct MockBackend {
    storage: Arc<dyn Storage>,
    settings: Mutex<MockSettings>,
    events: Mutex<EventState>,
    family_lock: Mutex<()>,
}

fn persist_error(e: impl std::error::Error + Send + Sync + 'static) -> ApiException {
    ApiException::server(format!("Mock storage failure: {}", e)).with_source(e)
}

impl MockBackend {
    pub fn new(storage: Arc<dyn Storage>, settings: MockSettings) -> Self {
        Self {
            storage,
            settings: Mutex::new(settings),
            events: Mutex::new(EventState::default()),
            family_lock: Mutex::new(()),
        }
    }

    pub fn init(&self) {
        let mut state = lock(&self.events);
        self.ensure_loaded(&mut state);
    }

    pub fn reset(&self) {
        let mut state = lock(&self.events);
        *state = EventState::default();
        if let Err(e) = self.storage.remove(MOCK_EVENTS_KEY) {
            warn!("Failed to clear mock events: {}", e);
        }
        info!("Mock backend reset");
    }

    pub fn settings(&self) -> MockSettings {
        lock(&self.settings).clone()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut MockSettings)) {
        f(&mut lock(&self.settings));
    }

    pub fn event_count(&self) -> usize {
        let mut state = lock(&self.events);
        self.ensure_loaded(&mut state);
        state.records.len()
    }

    async fn simulate(&self, operation: &str) -> Result<(), ApiException> {
        let (delay, fail) = {
            let settings = self.settings();
            if settings.test_mode {
                (Duration::ZERO, false)
            } else {
                let mut rng = rand::thread_rng();
                let min = settings.min_latency.as_millis() as u64;
                let max = (settings.max_latency.as_millis() as u64).max(min);
                let delay = Duration::from_millis(rng.gen_range(min..=max));
                (delay, rng.gen_bool(settings.failure_rate.clamp(0.0, 1.0)))
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            warn!("Injecting simulated failure into {}", operation);
            return Err(ApiException::server("Simulated server error"));
        }
        debug!("Mock {} after {:?}", operation, delay);
        Ok(())
    }

    fn ensure_loaded(&self, state: &mut EventState) {
        if state.loaded {
            return;
        }
        state.needs_samples = false;
        state.records = match load_state::<Vec<EventRecord>>(self.storage.as_ref(), MOCK_EVENTS_KEY) {
            Ok(Loaded::Found(records)) => records,
            Ok(Loaded::Missing) => {
                state.needs_samples = true;
                Vec::new()
            }
            Ok(Loaded::Corrupt(reason)) => {
                warn!("Discarding unreadable mock events: {}", reason);
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to read mock events: {}", e);
                Vec::new()
            }
        };
        state.loaded = true;
    }

    /// Family members may appear after this backend was created, so samples
    /// are produced the first time members exist while no event list has
    /// ever been stored.
    fn ensure_samples(&self, state: &mut EventState) -> Result<(), ApiException> {
        if !state.needs_samples || !state.records.is_empty() {
            return Ok(());
        }
        let members = self.load_family().map(|f| f.members).unwrap_or_default();
        if members.is_empty() {
            return Ok(());
        }
        let samples = generate_sample_events(&members, Local::now().date_naive());
        self.persist_events(&samples)?;
        info!("Generated {} sample events", samples.len());
        state.records = samples;
        state.needs_samples = false;
        Ok(())
    }

    fn persist_events(&self, records: &[EventRecord]) -> Result<(), ApiException> {
        save_state(self.storage.as_ref(), MOCK_EVENTS_KEY, &records).map_err(persist_error)
    }

    fn with_events<R>(
        &self,
        mutates: bool,
        f: impl FnOnce(&mut Vec<EventRecord>) -> Result<R, ApiException>,
    ) -> Result<R, ApiException> {
        let mut state = lock(&self.events);
        self.ensure_loaded(&mut state);
        self.ensure_samples(&mut state)?;
        if !mutates {
            return f(&mut state.records);
        }
        let mut staged = state.records.clone();
        let result = f(&mut staged)?;
        self.persist_events(&staged)?;
        state.records = staged;
        state.needs_samples = false;
        Ok(result)
    }

    fn load_family(&self) -> Option<FamilyData> {
        match load_state::<FamilyData>(self.storage.as_ref(), FAMILY_KEY) {
            Ok(Loaded::Found(family)) if family.validate().is_ok() => Some(family),
            _ => None,
        }
    }

    fn save_family(&self, family: &FamilyData) -> Result<(), ApiException> {
        save_state(self.storage.as_ref(), FAMILY_KEY, family).map_err(persist_error)
    }

    fn with_family<R>(&self, f: impl FnOnce(&mut FamilyData) -> Result<R, ApiException>) -> Result<R, ApiException> {
        let _guard = lock(&self.family_lock);
        let mut family = self
            .load_family()
            .ok_or_else(|| ApiException::not_found("Family not found"))?;
        let result = f(&mut family)?;
        family.validate()?;
        self.save_family(&family)?;
        Ok(result)
    }

    fn new_members(inputs: &[MemberInput]) -> Result<Vec<FamilyMember>, ApiException> {
        let mut staged = FamilyData::new("staging", "staging", Vec::new());
        for input in inputs {
            staged.check_member(input, None)?;
            staged
                .members
                .push(FamilyMember::from_input(Uuid::new_v4().to_string(), input));
        }
        Ok(staged.members)
    }
}

fn sort_key(record: &EventRecord) -> (String, String) {
    (record.date.clone(), record.start_time.clone())
}

#[async_trait]
impl CalendarApi for MockBackend {
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, ApiException> {
        self.simulate("list_events").await?;
        self.with_events(false, |records| {
            let mut matching: Vec<EventRecord> = records
                .iter()
                .filter(|r| {
                    parse_local_date(&r.date)
                        .map(|date| filter.matches(date, &r.member_id))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            matching.sort_by_key(sort_key);
            Ok(matching)
        })
    }

    async fn get_event(&self, id: &str) -> Result<EventRecord, ApiException> {
        self.simulate("get_event").await?;
        self.with_events(false, |records| {
            records
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or_else(|| ApiException::not_found(format!("Event {} not found", id)))
        })
    }

    async fn create_event(
        &self,
        request: &EventRequest,
    ) -> Result<MutationResponse<EventRecord>, ApiException> {
        self.simulate("create_event").await?;
        let record = request.to_record(&Uuid::new_v4().to_string())?;
        self.with_events(true, |records| {
            records.push(record.clone());
            Ok(MutationResponse::new(record, "Event created successfully"))
        })
    }

    async fn update_event(
        &self,
        id: &str,
        request: &EventRequest,
    ) -> Result<MutationResponse<EventRecord>, ApiException> {
        self.simulate("update_event").await?;
        let replacement = request.to_record(id)?;
        self.with_events(true, |records| {
            let slot = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| ApiException::not_found(format!("Event {} not found", id)))?;
            *slot = replacement.clone();
            Ok(MutationResponse::new(replacement, "Event updated successfully"))
        })
    }

    async fn delete_event(&self, id: &str) -> Result<(), ApiException> {
        self.simulate("delete_event").await?;
        self.with_events(true, |records| {
            let index = records
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| ApiException::not_found(format!("Event {} not found", id)))?;
            records.remove(index);
            Ok(())
        })
    }
}

#[async_trait]
impl FamilyApi for MockBackend {
    async fn get_family(&self) -> Result<Option<FamilyData>, ApiException> {
        self.simulate("get_family").await?;
        Ok(self.load_family())
    }

    async fn create_family(
        &self,
        input: &FamilyInput,
    ) -> Result<MutationResponse<FamilyData>, ApiException> {
        self.simulate("create_family").await?;
        validate_family_name(&input.name)?;
        let members = Self::new_members(input.members.as_deref().unwrap_or_default())?;

        let _guard = lock(&self.family_lock);
        if self.load_family().is_some() {
            return Err(ApiException::conflict("Family already exists"));
        }
        let family = FamilyData::new(Uuid::new_v4().to_string(), input.name.trim(), members);
        self.save_family(&family)?;
        Ok(MutationResponse::new(family, "Family created successfully"))
    }

    async fn update_family(
        &self,
        input: &FamilyInput,
    ) -> Result<MutationResponse<FamilyData>, ApiException> {
        self.simulate("update_family").await?;
        validate_family_name(&input.name)?;
        let members = match &input.members {
            Some(inputs) => Some(Self::new_members(inputs)?),
            None => None,
        };
        let family = self.with_family(|family| {
            family.name = input.name.trim().to_string();
            if let Some(members) = members {
                family.setup_complete = family.setup_complete || !members.is_empty();
                family.members = members;
            }
            Ok(family.clone())
        })?;
        Ok(MutationResponse::new(family, "Family updated successfully"))
    }

    async fn add_member(
        &self,
        input: &MemberInput,
    ) -> Result<MutationResponse<FamilyMember>, ApiException> {
        self.simulate("add_member").await?;
        let member = self.with_family(|family| {
            family.check_member(input, None)?;
            let member = FamilyMember::from_input(Uuid::new_v4().to_string(), input);
            family.members.push(member.clone());
            family.setup_complete = true;
            Ok(member)
        })?;
        Ok(MutationResponse::new(member, "Member added successfully"))
    }

    async fn update_member(
        &self,
        id: &str,
        input: &MemberInput,
    ) -> Result<MutationResponse<FamilyMember>, ApiException> {
        self.simulate("update_member").await?;
        let member = self.with_family(|family| {
            family.check_member(input, Some(id))?;
            let slot = family
                .members
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| ApiException::not_found(format!("Member {} not found", id)))?;
            *slot = FamilyMember::from_input(id, input);
            Ok(slot.clone())
        })?;
        Ok(MutationResponse::new(member, "Member updated successfully"))
    }

    async fn remove_member(&self, id: &str) -> Result<(), ApiException> {
        self.simulate("remove_member").await?;
        self.with_family(|family| {
            if family.member(id).is_none() {
                return Err(ApiException::not_found(format!("Member {} not found", id)));
            }
            if family.members.len() <= 1 {
                return Err(ApiException::validation(
                    "members",
                    "A family must keep at least one member",
                ));
            }
            family.members.retain(|m| m.id != id);
            Ok(())
        })?;
        // Events of a removed member would never match any filter again.
        self.with_events(true, |records| {
            records.retain(|r| r.member_id != id);
            Ok(())
        })
    }
}

#[async_trait]
impl AuthApi for MockBackend {
    async fn login(&self, credentials: &Credentials) -> Result<Session, ApiException> {
        self.simulate("login").await?;
        if credentials.email.trim().is_empty() {
            return Err(ApiException::validation("email", "Email is required"));
        }
        if credentials.password.is_empty() {
            return Err(ApiException::validation("password", "Password is required"));
        }
        let name = credentials
            .email
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(Session {
            token: format!("mock-{}", Uuid::new_v4()),
            user: AuthUser {
                id: Uuid::new_v4().to_string(),
                email: credentials.email.clone(),
                name,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::MemberColor;
    use crate::storage::kv::{MemoryStorage, StorageError};
    use crate::transport::ApiErrorKind;
    use pretty_assertions::assert_eq;

    struct ReadOnlyStorage;

    impl Storage for ReadOnlyStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::IoError(std::io::Error::other("disk full")))
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn backend() -> (MockBackend, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (MockBackend::new(storage.clone(), MockSettings::deterministic()), storage)
    }

    fn request(title: &str, date: &str, member: &str) -> EventRequest {
        EventRequest {
            title: title.to_string(),
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            date: date.to_string(),
            member_id: member.to_string(),
            is_all_day: None,
            location: None,
        }
    }

    fn member_input(name: &str, color: MemberColor) -> MemberInput {
        MemberInput {
            name: name.to_string(),
            color,
            avatar_url: None,
            email: None,
        }
    }

    async fn seed_family(backend: &MockBackend) -> FamilyData {
        backend
            .create_family(&FamilyInput {
                name: "The Smiths".to_string(),
                members: Some(vec![
                    member_input("Alex", MemberColor::Blue),
                    member_input("Sam", MemberColor::Green),
                ]),
            })
            .await
            .unwrap()
            .data
    }

    #[tokio::test]
    async fn created_event_is_listed_and_persisted() {
        let (backend, storage) = backend();

        let created = backend
            .create_event(&request("Team Meeting", "2025-12-23", "m1"))
            .await
            .unwrap();
        let listed = backend.list_events(&EventFilter::default()).await.unwrap();

        assert_eq!(listed, vec![created.data]);
        assert!(storage.get(MOCK_EVENTS_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn events_reload_from_storage() {
        let (backend, storage) = backend();
        backend.create_event(&request("A", "2025-01-01", "m1")).await.unwrap();

        let reloaded = MockBackend::new(storage, MockSettings::deterministic());

        assert_eq!(reloaded.event_count(), 1);
    }

    #[tokio::test]
    async fn date_range_and_member_filters_apply() {
        let (backend, _) = backend();
        backend.create_event(&request("Jan", "2025-01-15", "m1")).await.unwrap();
        backend.create_event(&request("Feb", "2025-02-01", "m1")).await.unwrap();
        backend.create_event(&request("Other", "2025-01-20", "m2")).await.unwrap();

        let january = EventFilter::range(
            chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        );
        let all_january = backend.list_events(&january).await.unwrap();
        let m1_january = backend.list_events(&january.clone().with_member("m1")).await.unwrap();
        let until_jan_20 = backend
            .list_events(&EventFilter {
                end_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 20),
                ..EventFilter::default()
            })
            .await
            .unwrap();

        assert_eq!(all_january.len(), 2);
        assert_eq!(m1_january.len(), 1);
        assert_eq!(m1_january[0].title, "Jan");
        assert_eq!(until_jan_20.len(), 2);
    }

    #[tokio::test]
    async fn update_replaces_whole_record() {
        let (backend, _) = backend();
        let mut with_location = request("Dentist", "2025-03-04", "m1");
        with_location.location = Some("Smile Dental".to_string());
        let created = backend.create_event(&with_location).await.unwrap().data;

        let updated = backend
            .update_event(&created.id, &request("Dentist (moved)", "2025-03-04", "m1"))
            .await
            .unwrap()
            .data;

        assert_eq!(updated.title, "Dentist (moved)");
        assert_eq!(updated.location, None);
        assert_eq!(backend.get_event(&created.id).await.unwrap().location, None);
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let (backend, _) = backend();

        let delete = backend.delete_event("ghost").await.unwrap_err();
        let update = backend
            .update_event("ghost", &request("x", "2025-01-01", "m1"))
            .await
            .unwrap_err();

        assert_eq!((delete.kind, delete.status), (ApiErrorKind::NotFound, 404));
        assert_eq!((update.kind, update.status), (ApiErrorKind::NotFound, 404));
    }

    #[tokio::test]
    async fn samples_appear_once_family_exists() {
        let (backend, _) = backend();
        assert!(backend.list_events(&EventFilter::default()).await.unwrap().is_empty());

        let family = seed_family(&backend).await;
        let events = backend.list_events(&EventFilter::default()).await.unwrap();

        assert!(!events.is_empty());
        assert!(events.iter().all(|e| family.member(&e.member_id).is_some()));
    }

    #[tokio::test]
    async fn deleting_every_event_does_not_bring_samples_back() {
        let (backend, storage) = backend();
        seed_family(&backend).await;
        assert!(!backend.list_events(&EventFilter::default()).await.unwrap().is_empty());

        let reloaded = MockBackend::new(storage, MockSettings::deterministic());
        for event in reloaded.list_events(&EventFilter::default()).await.unwrap() {
            reloaded.delete_event(&event.id).await.unwrap();
        }

        assert!(reloaded.list_events(&EventFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_leaves_events_untouched() {
        let backend = MockBackend::new(Arc::new(ReadOnlyStorage), MockSettings::deterministic());

        let err = backend
            .create_event(&request("Team Meeting", "2025-12-23", "m1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::ServerError);
        assert!(backend.list_events(&EventFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_events() {
        let (backend, storage) = backend();
        backend.create_event(&request("A", "2025-01-01", "m1")).await.unwrap();

        backend.reset();

        assert_eq!(backend.event_count(), 0);
        assert!(storage.get(MOCK_EVENTS_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn full_failure_rate_always_fails() {
        let (backend, _) = backend();
        backend.update_settings(|s| {
            s.test_mode = false;
            s.min_latency = Duration::ZERO;
            s.max_latency = Duration::ZERO;
            s.failure_rate = 1.0;
        });

        let err = backend.list_events(&EventFilter::default()).await.unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::ServerError);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_simulated() {
        let (backend, _) = backend();
        backend.update_settings(|s| {
            s.test_mode = false;
            s.min_latency = Duration::from_millis(300);
            s.max_latency = Duration::from_millis(300);
            s.failure_rate = 0.0;
        });
        let started = tokio::time::Instant::now();

        backend.list_events(&EventFilter::default()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn duplicate_member_names_conflict() {
        let (backend, _) = backend();
        seed_family(&backend).await;

        let err = backend
            .add_member(&member_input("ALEX", MemberColor::Red))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Conflict);
    }

    #[tokio::test]
    async fn last_member_cannot_be_removed() {
        let (backend, _) = backend();
        let family = seed_family(&backend).await;

        backend.remove_member(&family.members[0].id).await.unwrap();
        let err = backend.remove_member(&family.members[1].id).await.unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::ValidationError);
        assert_eq!(backend.get_family().await.unwrap().unwrap().members.len(), 1);
    }

    #[tokio::test]
    async fn removing_member_drops_their_events() {
        let (backend, _) = backend();
        let family = seed_family(&backend).await;
        let gone = family.members[1].id.clone();
        backend.create_event(&request("Mine", "2025-01-01", &gone)).await.unwrap();

        backend.remove_member(&gone).await.unwrap();

        let events = backend.list_events(&EventFilter::default()).await.unwrap();
        assert!(events.iter().all(|e| e.member_id != gone));
    }

    #[tokio::test]
    async fn update_member_replaces_optional_fields() {
        let (backend, _) = backend();
        let family = seed_family(&backend).await;
        let mut with_email = member_input("Alex", MemberColor::Blue);
        with_email.email = Some("alex@example.com".to_string());
        let id = family.members[0].id.clone();
        backend.update_member(&id, &with_email).await.unwrap();

        let updated = backend
            .update_member(&id, &member_input("Alexandra", MemberColor::Purple))
            .await
            .unwrap()
            .data;

        assert_eq!(updated.name, "Alexandra");
        assert_eq!(updated.email, None);
    }

    #[tokio::test]
    async fn family_ops_need_a_family() {
        let (backend, _) = backend();
        let err = backend
            .add_member(&member_input("Alex", MemberColor::Blue))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::NotFound);
    }

    #[tokio::test]
    async fn second_family_conflicts() {
        let (backend, _) = backend();
        seed_family(&backend).await;

        let err = backend
            .create_family(&FamilyInput {
                name: "Again".to_string(),
                members: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Conflict);
    }
}
