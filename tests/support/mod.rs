//! In-process stand-in for the detailed-availability page
//!
//! `FakeSite` answers the same locators the page actions use and keeps just
//! enough state to behave like the real widgets: a guest counter that only
//! counts up, a month-paging calendar, and an availability grid whose slots
//! can be scripted per page load.

#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate};

use permitgrab::actions::selectors;
use permitgrab::{BookingRequest, Error, Locator, PageDriver, Result, Timeouts};

pub const PERMIT_NAME: &str = "High Sierra Trail";

pub fn request() -> BookingRequest {
    BookingRequest::new(
        "445857",
        NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
        5,
        PERMIT_NAME,
    )
    .unwrap()
}

pub fn url() -> String {
    request().availability_url(permitgrab::config::DEFAULT_HOST)
}

pub fn timeouts() -> Timeouts {
    Timeouts {
        app: Duration::from_secs(2),
        control: Duration::from_secs(2),
        grid: Duration::from_secs(2),
        confirm: Duration::from_secs(2),
        poll_interval: Duration::from_millis(50),
    }
}

/// One slot control in the permit row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub available: bool,
    pub disabled: bool,
}

impl Slot {
    pub fn open() -> Self {
        Self {
            available: true,
            disabled: false,
        }
    }

    pub fn sold_out() -> Self {
        Self {
            available: false,
            disabled: false,
        }
    }

    pub fn disabled() -> Self {
        Self {
            available: true,
            disabled: true,
        }
    }
}

/// Something observable the site did, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Navigated(String),
    PartyCommitted(u32),
    DateCommitted(String),
    SlotsListed,
    SlotClicked(usize),
    SlotScriptClicked(usize),
    BookNowClicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    App,
    GuestCounter,
    GuestPopup,
    PeopleField,
    AddPeople,
    ClosePopup,
    DateHidden,
    DateToggle,
    Calendar,
    MonthHeading,
    NextMonth,
    PreviousMonth,
    Day(NaiveDate),
    Grid,
    Row,
    Slot(usize),
    SelectedCell,
    BookNow,
}

/// Element handle, tied to the page load it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeElement {
    kind: Kind,
    load: u32,
}

#[derive(Debug)]
struct State {
    // scripted behaviour
    initial_party: u32,
    initial_date: String,
    initial_month: NaiveDate,
    slot_plan: Vec<Vec<Slot>>,
    row_name: String,
    app_present: bool,
    intercept_slot_click: bool,
    detach_on_slot_click: bool,
    book_now_hidden: bool,

    // live page
    loads: u32,
    party: u32,
    people_field: u32,
    popup_open: bool,
    date_value: String,
    calendar_open: bool,
    month: NaiveDate,
    selected: Option<usize>,

    // observations
    events: Vec<Event>,
    interactions: u32,
}

impl State {
    fn slots(&self) -> &[Slot] {
        if self.loads == 0 || self.slot_plan.is_empty() {
            return &[];
        }
        let index = (self.loads as usize - 1).min(self.slot_plan.len() - 1);
        &self.slot_plan[index]
    }

    fn reset_page(&mut self) {
        self.party = self.initial_party;
        self.people_field = self.initial_party;
        self.popup_open = false;
        self.date_value = self.initial_date.clone();
        self.calendar_open = false;
        self.month = self.initial_month;
        self.selected = None;
    }

    fn el(&self, kind: Kind) -> FakeElement {
        FakeElement {
            kind,
            load: self.loads,
        }
    }

    fn check(&self, element: &FakeElement) -> Result<()> {
        if element.load != self.loads {
            return Err(Error::StaleElement(format!("{:?}", element.kind)));
        }
        Ok(())
    }
}

pub struct FakeSite {
    state: Mutex<State>,
}

impl Default for FakeSite {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSite {
    /// Party of 1, no date applied, calendar opening on May 2026, no slots
    pub fn new() -> Self {
        let may = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        Self {
            state: Mutex::new(State {
                initial_party: 1,
                initial_date: String::new(),
                initial_month: may,
                slot_plan: vec![vec![]],
                row_name: PERMIT_NAME.to_string(),
                app_present: true,
                intercept_slot_click: false,
                detach_on_slot_click: false,
                book_now_hidden: false,
                loads: 0,
                party: 1,
                people_field: 1,
                popup_open: false,
                date_value: String::new(),
                calendar_open: false,
                month: may,
                selected: None,
                events: Vec::new(),
                interactions: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Slots shown on the n-th load (the last entry repeats)
    pub fn with_slot_plan(self, plan: Vec<Vec<Slot>>) -> Self {
        self.lock().slot_plan = plan;
        self
    }

    pub fn with_initial_party(self, party: u32) -> Self {
        {
            let mut s = self.lock();
            s.initial_party = party;
            s.party = party;
            s.people_field = party;
        }
        self
    }

    pub fn with_initial_date(self, iso: &str) -> Self {
        {
            let mut s = self.lock();
            s.initial_date = iso.to_string();
            s.date_value = iso.to_string();
        }
        self
    }

    pub fn with_calendar_month(self, year: i32, month: u32) -> Self {
        let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        {
            let mut s = self.lock();
            s.initial_month = first;
            s.month = first;
        }
        self
    }

    pub fn with_row_name(self, name: &str) -> Self {
        self.lock().row_name = name.to_string();
        self
    }

    pub fn without_app(self) -> Self {
        self.lock().app_present = false;
        self
    }

    /// An overlay covers every slot control
    pub fn with_overlay(self) -> Self {
        self.lock().intercept_slot_click = true;
        self
    }

    /// Clicking a slot finds it detached from the document
    pub fn with_detaching_slots(self) -> Self {
        self.lock().detach_on_slot_click = true;
        self
    }

    /// "Book Now" never shows up, even with a slot selected
    pub fn without_book_now(self) -> Self {
        self.lock().book_now_hidden = true;
        self
    }

    /// Page the fake as if it had already been loaded once
    pub fn loaded(self) -> Self {
        {
            let mut s = self.lock();
            s.loads = 1;
            s.reset_page();
        }
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn navigations(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Navigated(_)))
            .count()
    }

    /// Clicks and script clicks on any control
    pub fn interactions(&self) -> u32 {
        self.lock().interactions
    }

    pub fn party(&self) -> u32 {
        self.lock().party
    }

    pub fn date_value(&self) -> String {
        self.lock().date_value.clone()
    }

    pub fn selected(&self) -> Option<usize> {
        self.lock().selected
    }
}

fn day_label(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

fn days_of(month: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    (1..=31).filter_map(move |d| NaiveDate::from_ymd_opt(month.year(), month.month(), d))
}

#[async_trait]
impl PageDriver for FakeSite {
    type Element = FakeElement;

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut s = self.lock();
        s.loads += 1;
        s.reset_page();
        s.events.push(Event::Navigated(url.to_string()));
        Ok(())
    }

    async fn find_all(
        &self,
        scope: Option<&FakeElement>,
        locator: &Locator,
    ) -> Result<Vec<FakeElement>> {
        let mut guard = self.lock();
        let s: &mut State = &mut guard;
        if let Some(scope) = scope {
            s.check(scope)?;
        }
        if s.loads == 0 {
            return Ok(vec![]);
        }

        let one = |s: &State, present: bool, kind: Kind| {
            if present {
                vec![s.el(kind)]
            } else {
                vec![]
            }
        };

        let found = if *locator == selectors::app_root() {
            one(&*s, s.app_present, Kind::App)
        } else if *locator == selectors::guest_counter() {
            one(&*s, true, Kind::GuestCounter)
        } else if *locator == selectors::guest_popup() {
            one(&*s, s.popup_open, Kind::GuestPopup)
        } else if *locator == selectors::people_field() {
            one(&*s, s.popup_open, Kind::PeopleField)
        } else if *locator == selectors::add_people() {
            one(&*s, s.popup_open, Kind::AddPeople)
        } else if *locator == selectors::close_popup() {
            one(&*s, s.popup_open, Kind::ClosePopup)
        } else if *locator == selectors::date_hidden() {
            one(&*s, true, Kind::DateHidden)
        } else if *locator == selectors::date_toggle() {
            one(&*s, true, Kind::DateToggle)
        } else if *locator == selectors::calendar() {
            one(&*s, s.calendar_open, Kind::Calendar)
        } else if *locator == selectors::month_heading() {
            one(&*s, s.calendar_open, Kind::MonthHeading)
        } else if *locator == selectors::next_month() {
            one(&*s, s.calendar_open, Kind::NextMonth)
        } else if *locator == selectors::previous_month() {
            one(&*s, s.calendar_open, Kind::PreviousMonth)
        } else if *locator == selectors::availability_grid() {
            one(&*s, true, Kind::Grid)
        } else if *locator == selectors::permit_row(&s.row_name) {
            one(&*s, true, Kind::Row)
        } else if *locator == selectors::slot_controls() {
            s.events.push(Event::SlotsListed);
            (0..s.slots().len()).map(|i| s.el(Kind::Slot(i))).collect()
        } else if *locator == selectors::selected_cell() {
            one(&*s, s.selected.is_some(), Kind::SelectedCell)
        } else if *locator == selectors::book_now() {
            one(&*s, s.selected.is_some() && !s.book_now_hidden, Kind::BookNow)
        } else if s.calendar_open {
            days_of(s.month)
                .find(|d| *locator == selectors::day_cell(&day_label(*d)))
                .map(|d| vec![s.el(Kind::Day(d))])
                .unwrap_or_default()
        } else {
            vec![]
        };

        Ok(found)
    }

    async fn click(&self, element: &FakeElement) -> Result<()> {
        let mut s = self.lock();
        s.check(element)?;
        s.interactions += 1;

        match element.kind {
            Kind::GuestCounter => {
                s.popup_open = true;
                s.people_field = s.party;
            }
            Kind::AddPeople => s.people_field += 1,
            Kind::ClosePopup => {
                s.popup_open = false;
                s.party = s.people_field;
                let party = s.party;
                s.events.push(Event::PartyCommitted(party));
            }
            Kind::DateToggle => s.calendar_open = true,
            Kind::NextMonth => {
                s.month = s.month.checked_add_months(Months::new(1)).unwrap();
            }
            Kind::PreviousMonth => {
                s.month = s.month.checked_sub_months(Months::new(1)).unwrap();
            }
            Kind::Day(day) => {
                s.calendar_open = false;
                s.date_value = day.format("%Y-%m-%d").to_string();
                let value = s.date_value.clone();
                s.events.push(Event::DateCommitted(value));
            }
            Kind::Slot(i) => {
                if s.detach_on_slot_click {
                    return Err(Error::StaleElement("button.rec-availability-date".into()));
                }
                if s.intercept_slot_click {
                    return Err(Error::intercepted(
                        "button.rec-availability-date",
                        "div.sarsa-modal-overlay",
                    ));
                }
                s.events.push(Event::SlotClicked(i));
                let slot = s.slots()[i];
                if slot.available && !slot.disabled {
                    s.selected = Some(i);
                }
            }
            Kind::BookNow => s.events.push(Event::BookNowClicked),
            _ => {}
        }
        Ok(())
    }

    async fn text(&self, element: &FakeElement) -> Result<String> {
        let s = self.lock();
        s.check(element)?;
        Ok(match element.kind {
            Kind::GuestCounter => format!("{} People", s.party),
            Kind::MonthHeading => s.month.format("%B %Y").to_string(),
            Kind::BookNow => "Book Now".to_string(),
            _ => String::new(),
        })
    }

    async fn attribute(&self, element: &FakeElement, name: &str) -> Result<Option<String>> {
        let s = self.lock();
        s.check(element)?;
        Ok(match (&element.kind, name) {
            (Kind::PeopleField, "value") => Some(s.people_field.to_string()),
            (Kind::DateHidden, "value") => Some(s.date_value.clone()),
            (Kind::Slot(i), "aria-label") => {
                let slot = s.slots()[*i];
                Some(if slot.available {
                    format!("Select {} July 31, 2026", s.row_name)
                } else {
                    format!("{} for July 31, 2026", selectors::NO_ONLINE_RESERVATIONS)
                })
            }
            (Kind::Slot(i), "disabled") => s.slots()[*i].disabled.then(String::new),
            _ => None,
        })
    }

    async fn run_script(
        &self,
        element: &FakeElement,
        function: &str,
    ) -> Result<serde_json::Value> {
        let mut s = self.lock();
        s.check(element)?;
        if function == selectors::SCRIPT_CLICK {
            s.interactions += 1;
            if let Kind::Slot(i) = element.kind {
                s.events.push(Event::SlotScriptClicked(i));
                s.selected = Some(i);
            }
        }
        Ok(serde_json::Value::Bool(true))
    }

    async fn is_clickable(&self, element: &FakeElement) -> Result<bool> {
        let s = self.lock();
        s.check(element)?;
        Ok(match element.kind {
            Kind::Slot(i) => !s.slots()[i].disabled,
            _ => true,
        })
    }
}
