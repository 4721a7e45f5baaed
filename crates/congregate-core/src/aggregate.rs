use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::{debug, instrument};

use crate::birthday::{birthdays_in_month, birthdays_in_range, birthdays_on};
use crate::datetime::{YearMonth, horizon_end};
use crate::model::{
    BIRTHDAY_COLOR, CalendarEvent, DEFAULT_DEPARTMENT_COLOR, Department, Member, OccurrenceKind,
    ProjectedOccurrence,
};
use crate::recurrence::{self, RecurrenceRule};

pub const BIRTHDAY_TAG: &str = "birthdays";
const LEGACY_BIRTHDAY_TAG: &str = "__birthday__";

/// The single selector narrowing displayed occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActiveFilter {
    #[default]
    All,
    Birthdays,
    /// Department id or name.
    Department(String),
}

impl ActiveFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(tag) = raw.map(str::trim).filter(|tag| !tag.is_empty()) else {
            return Self::All;
        };
        if tag.eq_ignore_ascii_case("all") {
            Self::All
        } else if tag.eq_ignore_ascii_case(BIRTHDAY_TAG) || tag == LEGACY_BIRTHDAY_TAG {
            Self::Birthdays
        } else {
            Self::Department(tag.to_string())
        }
    }

    pub fn keeps_birthdays(&self) -> bool {
        matches!(self, Self::All | Self::Birthdays)
    }

    fn keeps_event(&self, department: Option<&str>, departments: &[Department]) -> bool {
        match self {
            Self::All => true,
            Self::Birthdays => false,
            Self::Department(tag) => department_matches(tag, department, departments),
        }
    }

    fn keeps(&self, occurrence: &ProjectedOccurrence, departments: &[Department]) -> bool {
        match occurrence.kind {
            OccurrenceKind::Birthday => self.keeps_birthdays(),
            OccurrenceKind::Event => {
                self.keeps_event(occurrence.department.as_deref(), departments)
            }
        }
    }
}

/// Rows fetched for one aggregation window.
///
/// `direct` holds events whose stored date falls in the window; `recurring`
/// holds every weekly definition.
#[derive(Debug, Clone, Default)]
pub struct CalendarSnapshot {
    pub direct: Vec<CalendarEvent>,
    pub recurring: Vec<CalendarEvent>,
    pub members: Vec<Member>,
    pub departments: Vec<Department>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayItems {
    pub date: NaiveDate,
    pub events: Vec<ProjectedOccurrence>,
    pub birthdays: Vec<ProjectedOccurrence>,
}

impl DayItems {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.birthdays.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len() + self.birthdays.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthAgenda {
    pub month: YearMonth,
    pub events: Vec<ProjectedOccurrence>,
    pub birthdays: Vec<ProjectedOccurrence>,
}

pub fn department_for<'a>(departments: &'a [Department], reference: &str) -> Option<&'a Department> {
    departments.iter().find(|dept| dept.matches_ref(reference))
}

fn department_matches(tag: &str, department: Option<&str>, departments: &[Department]) -> bool {
    let Some(reference) = department else {
        return false;
    };
    if reference == tag {
        return true;
    }
    match (department_for(departments, tag), department_for(departments, reference)) {
        (Some(wanted), Some(actual)) => wanted.id == actual.id,
        _ => false,
    }
}

/// A recurring row in the direct source only stands as a direct record on a
/// date its rule produces.
fn direct_occurrence(event: &CalendarEvent) -> anyhow::Result<Option<ProjectedOccurrence>> {
    if event.is_recurring && !RecurrenceRule::from_event(event)?.matches(event.date) {
        return Ok(None);
    }
    Ok(Some(ProjectedOccurrence::direct(event, event.date)))
}

fn sort_occurrences(occurrences: &mut [ProjectedOccurrence]) {
    occurrences.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.sort_time().cmp(b.sort_time()))
    });
}

#[instrument(skip(snapshot), fields(filter = ?filter))]
pub fn items_for_date(
    snapshot: &CalendarSnapshot,
    date: NaiveDate,
    filter: &ActiveFilter,
) -> anyhow::Result<DayItems> {
    let mut events = Vec::new();
    for event in snapshot.direct.iter().filter(|event| event.date == date) {
        if let Some(occurrence) = direct_occurrence(event)? {
            events.push(occurrence);
        }
    }

    let direct_ids: HashSet<&str> = events.iter().map(|o| o.source_id.as_str()).collect();
    let mut recurring = Vec::new();
    for event in &snapshot.recurring {
        if direct_ids.contains(event.id.as_str()) {
            continue;
        }
        if recurrence::occurs_on(event, date)? {
            recurring.push(ProjectedOccurrence::recurring(event, date));
        }
    }
    events.extend(recurring);
    events.retain(|o| filter.keeps(o, &snapshot.departments));
    sort_occurrences(&mut events);

    let birthdays = if filter.keeps_birthdays() {
        birthdays_on(&snapshot.members, date)
    } else {
        vec![]
    };

    Ok(DayItems {
        date,
        events,
        birthdays,
    })
}

/// Every event and birthday occurrence in `[start, end]`, sorted by date then
/// time.
#[instrument(skip(snapshot), fields(filter = ?filter))]
pub fn occurrences_in_range(
    snapshot: &CalendarSnapshot,
    start: NaiveDate,
    end: NaiveDate,
    filter: &ActiveFilter,
) -> anyhow::Result<Vec<ProjectedOccurrence>> {
    let mut out = Vec::new();
    for event in snapshot
        .direct
        .iter()
        .filter(|event| event.date >= start && event.date <= end)
    {
        if let Some(occurrence) = direct_occurrence(event)? {
            out.push(occurrence);
        }
    }

    let direct_keys: HashSet<(String, NaiveDate)> =
        out.iter().map(|o| (o.source_id.clone(), o.date)).collect();
    for event in &snapshot.recurring {
        let projected = recurrence::project(event, start, end)?;
        out.extend(
            projected
                .into_iter()
                .filter(|o| !direct_keys.contains(&(o.source_id.clone(), o.date))),
        );
    }

    if filter.keeps_birthdays() {
        out.extend(birthdays_in_range(&snapshot.members, start, end));
    }

    out.retain(|o| filter.keeps(o, &snapshot.departments));
    sort_occurrences(&mut out);

    debug!(
        start = %start,
        end = %end,
        count = out.len(),
        "aggregated occurrences"
    );
    Ok(out)
}

/// Occurrences from `reference` through `horizon_days` ahead.
pub fn upcoming(
    snapshot: &CalendarSnapshot,
    reference: NaiveDate,
    horizon_days: u32,
    filter: &ActiveFilter,
) -> anyhow::Result<Vec<ProjectedOccurrence>> {
    let end = horizon_end(reference, horizon_days)?;
    occurrences_in_range(snapshot, reference, end, filter)
}

/// List-view agenda: the month's events plus birthdays grouped by birth month.
pub fn month_agenda(
    snapshot: &CalendarSnapshot,
    month: YearMonth,
    filter: &ActiveFilter,
) -> anyhow::Result<MonthAgenda> {
    let events = occurrences_in_range(snapshot, month.first_day()?, month.last_day()?, filter)?
        .into_iter()
        .filter(|o| o.kind == OccurrenceKind::Event)
        .collect();
    let birthdays = if filter.keeps_birthdays() {
        birthdays_in_month(&snapshot.members, month.year, month.month)
    } else {
        vec![]
    };
    Ok(MonthAgenda {
        month,
        events,
        birthdays,
    })
}

/// Display tag for a day cell: birthdays win, then the first event's
/// department colour.
pub fn day_marker<'a>(items: &DayItems, departments: &'a [Department]) -> Option<&'a str> {
    if !items.birthdays.is_empty() {
        return Some(BIRTHDAY_COLOR);
    }
    let first = items.events.first()?;
    Some(
        first
            .department
            .as_deref()
            .and_then(|reference| department_for(departments, reference))
            .map(|dept| dept.color.as_str())
            .unwrap_or(DEFAULT_DEPARTMENT_COLOR),
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn culto() -> CalendarEvent {
        let mut event = CalendarEvent::new_recurring("Culto".to_string(), date(2024, 1, 7), 0, None);
        event.id = "e1".to_string();
        event.time = Some("19:00".to_string());
        event.department = Some("dept-louvor".to_string());
        event
    }

    fn departments() -> Vec<Department> {
        vec![
            Department {
                id: "dept-louvor".to_string(),
                name: "Louvor".to_string(),
                color: "bg-blue-500".to_string(),
                description: None,
            },
            Department {
                id: "dept-jovens".to_string(),
                name: "Jovens".to_string(),
                color: "bg-green-500".to_string(),
                description: None,
            },
        ]
    }

    fn june_snapshot() -> CalendarSnapshot {
        let mut conferencia = CalendarEvent::new_direct("Conferência".to_string(), date(2024, 6, 9));
        conferencia.id = "e1".to_string();
        conferencia.time = Some("09:00".to_string());

        let mut jovens = CalendarEvent::new_direct("Retiro".to_string(), date(2024, 6, 15));
        jovens.department = Some("Jovens".to_string());

        let mut ana = Member::new("Ana".to_string(), Some(date(1990, 6, 9)));
        ana.id = "m1".to_string();

        CalendarSnapshot {
            direct: vec![conferencia, jovens],
            recurring: vec![culto()],
            members: vec![ana],
            departments: departments(),
        }
    }

    #[test]
    fn direct_record_replaces_recurring_projection() {
        let snapshot = june_snapshot();
        let out = occurrences_in_range(
            &snapshot,
            date(2024, 6, 1),
            date(2024, 6, 30),
            &ActiveFilter::All,
        )
        .expect("aggregate");

        let on_ninth: Vec<&ProjectedOccurrence> = out
            .iter()
            .filter(|o| o.date == date(2024, 6, 9) && o.kind == OccurrenceKind::Event)
            .collect();
        assert_eq!(on_ninth.len(), 1);
        assert_eq!(on_ninth[0].title, "Conferência");
        assert!(!on_ninth[0].is_recurring_instance);

        let culto_days: Vec<u32> = out
            .iter()
            .filter(|o| o.title == "Culto")
            .map(|o| o.date.day())
            .collect();
        assert_eq!(culto_days, vec![2, 16, 23, 30]);
    }

    #[test]
    fn aggregation_is_idempotent_and_sorted() {
        let snapshot = june_snapshot();
        let first = occurrences_in_range(&snapshot, date(2024, 6, 1), date(2024, 6, 30), &ActiveFilter::All)
            .expect("aggregate");
        let second = occurrences_in_range(&snapshot, date(2024, 6, 1), date(2024, 6, 30), &ActiveFilter::All)
            .expect("aggregate");
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| {
            (w[0].date, w[0].sort_time()) <= (w[1].date, w[1].sort_time())
        }));

        // untimed birthday sorts ahead of the timed conference on the 9th
        let ninth: Vec<OccurrenceKind> = first
            .iter()
            .filter(|o| o.date == date(2024, 6, 9))
            .map(|o| o.kind)
            .collect();
        assert_eq!(ninth, vec![OccurrenceKind::Birthday, OccurrenceKind::Event]);
    }

    #[test]
    fn department_filter_matches_id_or_name() {
        let snapshot = june_snapshot();
        let by_name = ActiveFilter::parse(Some("Louvor"));
        let out = occurrences_in_range(&snapshot, date(2024, 6, 1), date(2024, 6, 30), &by_name)
            .expect("aggregate");
        assert!(out.iter().all(|o| o.title == "Culto"));
        assert_eq!(out.len(), 4);

        let by_id = ActiveFilter::parse(Some("dept-jovens"));
        let out = occurrences_in_range(&snapshot, date(2024, 6, 1), date(2024, 6, 30), &by_id)
            .expect("aggregate");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Retiro");
    }

    #[test]
    fn birthday_filter_excludes_events() {
        let snapshot = june_snapshot();
        let filter = ActiveFilter::parse(Some("__birthday__"));
        assert_eq!(filter, ActiveFilter::Birthdays);
        let items = items_for_date(&snapshot, date(2024, 6, 9), &filter).expect("items");
        assert!(items.events.is_empty());
        assert_eq!(items.birthdays.len(), 1);
        assert_eq!(ActiveFilter::parse(Some("all")), ActiveFilter::All);
        assert_eq!(ActiveFilter::parse(None), ActiveFilter::All);
    }

    #[test]
    fn recurring_row_in_direct_source_counts_once() {
        let mut snapshot = june_snapshot();
        snapshot.direct.retain(|event| event.id != "e1");
        let mut stored = culto();
        stored.date = date(2024, 6, 16);
        snapshot.direct.push(stored.clone());

        let items = items_for_date(&snapshot, date(2024, 6, 16), &ActiveFilter::All).expect("items");
        assert_eq!(items.events.len(), 1);
        assert!(!items.events[0].is_recurring_instance);

        // a stored date off the rule's weekday does not leak an occurrence
        stored.date = date(2024, 6, 18);
        snapshot.direct.push(stored);
        let items = items_for_date(&snapshot, date(2024, 6, 18), &ActiveFilter::All).expect("items");
        assert!(items.events.is_empty());
    }

    #[test]
    fn day_marker_prefers_birthdays_then_department_color() {
        let snapshot = june_snapshot();
        let ninth = items_for_date(&snapshot, date(2024, 6, 9), &ActiveFilter::All).expect("items");
        assert_eq!(day_marker(&ninth, &snapshot.departments), Some(BIRTHDAY_COLOR));

        let second = items_for_date(&snapshot, date(2024, 6, 2), &ActiveFilter::All).expect("items");
        assert_eq!(day_marker(&second, &snapshot.departments), Some("bg-blue-500"));

        let empty = items_for_date(&snapshot, date(2024, 6, 3), &ActiveFilter::All).expect("items");
        assert_eq!(day_marker(&empty, &snapshot.departments), None);
    }

    #[test]
    fn month_agenda_groups_birthdays_by_month() {
        let snapshot = june_snapshot();
        let june = YearMonth::new(2024, 6).expect("month");
        let agenda = month_agenda(&snapshot, june, &ActiveFilter::All).expect("agenda");
        assert!(agenda.events.iter().all(|o| o.kind == OccurrenceKind::Event));
        assert_eq!(agenda.events.len(), 6);
        assert_eq!(agenda.birthdays.len(), 1);

        let louvor = month_agenda(&snapshot, june, &ActiveFilter::parse(Some("Louvor"))).expect("agenda");
        assert!(louvor.birthdays.is_empty());
    }

    #[test]
    fn invalid_recurrence_day_surfaces_as_error() {
        let mut snapshot = june_snapshot();
        snapshot.recurring[0].recurrence_day = Some(9);
        assert!(
            occurrences_in_range(&snapshot, date(2024, 6, 1), date(2024, 6, 30), &ActiveFilter::All)
                .is_err()
        );
    }
}
