use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::iso_date_serde;

pub const DEFAULT_EVENT_TYPE: &str = "event";
pub const DEFAULT_DEPARTMENT_COLOR: &str = "bg-gray-500";
pub const BIRTHDAY_COLOR: &str = "bg-pink-400";

fn default_event_type() -> String {
    DEFAULT_EVENT_TYPE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_department_color() -> String {
    DEFAULT_DEPARTMENT_COLOR.to_string()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(with = "iso_date_serde")]
    pub date: NaiveDate,

    #[serde(default)]
    pub time: Option<String>,

    /// Department id or name; free text in older rows.
    #[serde(default)]
    pub department: Option<String>,

    #[serde(default = "default_event_type")]
    pub event_type: String,

    #[serde(default)]
    pub is_recurring: bool,

    #[serde(default)]
    pub recurrence_day: Option<u8>,

    #[serde(default)]
    pub recurrence_year: Option<i32>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CalendarEvent {
    pub fn new_direct(title: String, date: NaiveDate) -> Self {
        Self {
            id: new_id(),
            title,
            description: None,
            date,
            time: None,
            department: None,
            event_type: default_event_type(),
            is_recurring: false,
            recurrence_day: None,
            recurrence_year: None,
            extra: BTreeMap::new(),
        }
    }

    /// A weekly definition. `anchor` is kept as the stored `date`.
    pub fn new_recurring(title: String, anchor: NaiveDate, day: u8, year: Option<i32>) -> Self {
        Self {
            is_recurring: true,
            recurrence_day: Some(day),
            recurrence_year: year,
            ..Self::new_direct(title, anchor)
        }
    }

    /// Time used for ordering; a missing time sorts as the empty string.
    pub fn sort_time(&self) -> &str {
        self.time.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: String,

    pub name: String,

    #[serde(default, with = "iso_date_serde::option")]
    pub birth_date: Option<NaiveDate>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Member {
    pub fn new(name: String, birth_date: Option<NaiveDate>) -> Self {
        Self {
            id: new_id(),
            name,
            birth_date,
            phone: None,
            email: None,
            notes: None,
            is_active: true,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Department {
    pub id: String,

    pub name: String,

    #[serde(default = "default_department_color")]
    pub color: String,

    #[serde(default)]
    pub description: Option<String>,
}

impl Department {
    pub fn new(name: String, color: Option<String>) -> Self {
        Self {
            id: new_id(),
            name,
            color: color.unwrap_or_else(default_department_color),
            description: None,
        }
    }

    /// Events reference departments by id, or by name in older rows.
    pub fn matches_ref(&self, reference: &str) -> bool {
        self.id == reference || self.name == reference
    }
}

/// The church's own details. The table holds at most one row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChurchSettings {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub cnpj: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,
}

impl ChurchSettings {
    pub const ROW_ID: &'static str = "church";

    pub fn new(name: String) -> Self {
        Self {
            id: Self::ROW_ID.to_string(),
            name,
            cnpj: None,
            address: None,
            phone: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceKind {
    Event,
    Birthday,
}

/// One concrete dated instance of an event or birthday. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectedOccurrence {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(with = "iso_date_serde")]
    pub date: NaiveDate,
    pub time: Option<String>,
    pub department: Option<String>,
    pub kind: OccurrenceKind,
    pub is_recurring_instance: bool,
}

impl ProjectedOccurrence {
    pub fn direct(event: &CalendarEvent, date: NaiveDate) -> Self {
        Self {
            id: event.id.clone(),
            source_id: event.id.clone(),
            title: event.title.clone(),
            description: event.description.clone(),
            date,
            time: event.time.clone(),
            department: event.department.clone(),
            kind: OccurrenceKind::Event,
            is_recurring_instance: false,
        }
    }

    pub fn recurring(event: &CalendarEvent, date: NaiveDate) -> Self {
        Self {
            id: format!("{}-{}", event.id, date.format("%Y-%m-%d")),
            is_recurring_instance: true,
            ..Self::direct(event, date)
        }
    }

    pub fn birthday(member: &Member, date: NaiveDate) -> Self {
        Self {
            id: member.id.clone(),
            source_id: member.id.clone(),
            title: member.name.clone(),
            description: None,
            date,
            time: None,
            department: None,
            kind: OccurrenceKind::Birthday,
            is_recurring_instance: false,
        }
    }

    pub fn sort_time(&self) -> &str {
        self.time.as_deref().unwrap_or_default()
    }
}
