use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::kv::{PREFERENCES_KEY, Storage, lock};
use super::persisted::{Loaded, load_state, save_state};
use crate::calendar::CalendarEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub selected_members: Vec<String>,
    pub show_all_day_events: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            selected_members: Vec::new(),
            show_all_day_events: true,
        }
    }
}

impl FilterState {
    pub fn matches(&self, event: &CalendarEvent) -> bool {
        (self.show_all_day_events || !event.is_all_day)
            && self.selected_members.iter().any(|id| *id == event.member_id)
    }

    /// Drops ids that no longer belong to a member. When nothing selected
    /// survives, every current member is selected. Returns whether the
    /// selection changed.
    pub fn reconcile(&mut self, member_ids: &[String]) -> bool {
        let mut kept: Vec<String> = Vec::new();
        for id in &self.selected_members {
            if member_ids.contains(id) && !kept.contains(id) {
                kept.push(id.clone());
            }
        }
        if kept.is_empty() {
            kept = member_ids.to_vec();
        }
        if kept == self.selected_members {
            return false;
        }
        self.selected_members = kept;
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarView {
    Day,
    #[default]
    Week,
    Month,
    Agenda,
}

impl CalendarView {
    fn step(&self, date: NaiveDate, forward: bool) -> Option<NaiveDate> {
        match (self, forward) {
            (CalendarView::Day | CalendarView::Agenda, true) => date.checked_add_days(Days::new(1)),
            (CalendarView::Day | CalendarView::Agenda, false) => date.checked_sub_days(Days::new(1)),
            (CalendarView::Week, true) => date.checked_add_days(Days::new(7)),
            (CalendarView::Week, false) => date.checked_sub_days(Days::new(7)),
            (CalendarView::Month, true) => date.checked_add_months(Months::new(1)),
            (CalendarView::Month, false) => date.checked_sub_months(Months::new(1)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarPreferences {
    pub filter: FilterState,
    pub calendar_view: CalendarView,
    pub has_user_set_view: bool,
}

/// Per-run calendar state; never written to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarSession {
    pub current_date: NaiveDate,
    pub selected_event_id: Option<String>,
    pub is_event_modal_open: bool,
}

struct PreferencesInner {
    storage: Arc<dyn Storage>,
    preferences: Mutex<CalendarPreferences>,
    session: Mutex<CalendarSession>,
    today: NaiveDate,
    hydrated: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct PreferencesStore {
    inner: Arc<PreferencesInner>,
}

impl PreferencesStore {
    pub fn new(storage: Arc<dyn Storage>, today: NaiveDate) -> Self {
        let (hydrated, _) = watch::channel(false);
        Self {
            inner: Arc::new(PreferencesInner {
                storage,
                preferences: Mutex::new(CalendarPreferences::default()),
                session: Mutex::new(CalendarSession {
                    current_date: today,
                    selected_event_id: None,
                    is_event_modal_open: false,
                }),
                today,
                hydrated,
            }),
        }
    }

    pub async fn hydrate(&self) {
        tokio::task::yield_now().await;
        let loaded = load_state::<CalendarPreferences>(self.inner.storage.as_ref(), PREFERENCES_KEY);
        let preferences = match loaded {
            Ok(Loaded::Found(mut preferences)) => {
                let mut seen = HashSet::new();
                preferences
                    .filter
                    .selected_members
                    .retain(|id| seen.insert(id.clone()));
                preferences
            }
            Ok(Loaded::Missing) => CalendarPreferences::default(),
            Ok(Loaded::Corrupt(reason)) => {
                warn!("Discarding unreadable calendar preferences: {}", reason);
                if let Err(e) = self.inner.storage.remove(PREFERENCES_KEY) {
                    warn!("Failed to remove calendar preferences: {}", e);
                }
                CalendarPreferences::default()
            }
            Err(e) => {
                warn!("Failed to read calendar preferences: {}", e);
                CalendarPreferences::default()
            }
        };
        *lock(&self.inner.preferences) = preferences;
        self.inner.hydrated.send_replace(true);
        info!("Calendar preferences hydrated");
    }

    pub fn has_hydrated(&self) -> bool {
        *self.inner.hydrated.borrow()
    }

    pub async fn wait_until_hydrated(&self) {
        let mut hydrated = self.inner.hydrated.subscribe();
        // The sender lives as long as `self`, so this only ends once hydrated.
        let _ = hydrated.wait_for(|done| *done).await;
    }

    pub fn preferences(&self) -> CalendarPreferences {
        lock(&self.inner.preferences).clone()
    }

    pub fn filter(&self) -> FilterState {
        lock(&self.inner.preferences).filter.clone()
    }

    pub fn view(&self) -> CalendarView {
        lock(&self.inner.preferences).calendar_view
    }

    pub fn session(&self) -> CalendarSession {
        lock(&self.inner.session).clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut CalendarPreferences) -> R) -> R {
        let mut preferences = lock(&self.inner.preferences);
        let result = f(&mut preferences);
        if let Err(e) = save_state(self.inner.storage.as_ref(), PREFERENCES_KEY, &*preferences) {
            warn!("Failed to persist calendar preferences: {}", e);
        }
        result
    }

    pub fn set_filter(&self, filter: FilterState) {
        self.update(|p| p.filter = filter);
    }

    /// Toggles one member in the selection. The last selected member cannot
    /// be deselected; returns whether anything changed.
    pub fn toggle_member(&self, member_id: &str) -> bool {
        self.update(|p| {
            let selected = &mut p.filter.selected_members;
            match selected.iter().position(|id| id == member_id) {
                Some(_) if selected.len() == 1 => false,
                Some(index) => {
                    selected.remove(index);
                    true
                }
                None => {
                    selected.push(member_id.to_string());
                    true
                }
            }
        })
    }

    pub fn select_all_members(&self, member_ids: &[String]) {
        self.update(|p| p.filter.selected_members = member_ids.to_vec());
    }

    pub fn set_show_all_day_events(&self, show: bool) {
        self.update(|p| p.filter.show_all_day_events = show);
    }

    pub fn set_view(&self, view: CalendarView) {
        self.update(|p| {
            p.calendar_view = view;
            p.has_user_set_view = true;
        });
    }

    pub fn apply_default_view(&self, view: CalendarView) -> bool {
        self.update(|p| {
            if p.has_user_set_view || p.calendar_view == view {
                return false;
            }
            p.calendar_view = view;
            true
        })
    }

    pub fn reconcile_members(&self, member_ids: &[String]) -> bool {
        let changed = self.update(|p| p.filter.reconcile(member_ids));
        if changed {
            debug!("Member filter reset against {} members", member_ids.len());
        }
        changed
    }

    fn move_date(&self, forward: bool) -> NaiveDate {
        let view = self.view();
        let mut session = lock(&self.inner.session);
        if let Some(date) = view.step(session.current_date, forward) {
            session.current_date = date;
        }
        session.current_date
    }

    pub fn navigate_next(&self) -> NaiveDate {
        self.move_date(true)
    }

    pub fn navigate_previous(&self) -> NaiveDate {
        self.move_date(false)
    }

    pub fn navigate_today(&self) -> NaiveDate {
        self.set_current_date(self.inner.today);
        self.inner.today
    }

    pub fn set_current_date(&self, date: NaiveDate) {
        lock(&self.inner.session).current_date = date;
    }

    pub fn select_event(&self, event_id: Option<String>) {
        lock(&self.inner.session).selected_event_id = event_id;
    }

    pub fn open_event_modal(&self, event_id: Option<String>) {
        let mut session = lock(&self.inner.session);
        session.selected_event_id = event_id;
        session.is_event_modal_open = true;
    }

    pub fn close_event_modal(&self) {
        let mut session = lock(&self.inner.session);
        session.selected_event_id = None;
        session.is_event_modal_open = false;
    }
}
