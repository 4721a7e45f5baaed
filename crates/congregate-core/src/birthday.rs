use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::datetime::horizon_end;
use crate::model::{Member, ProjectedOccurrence};

/// Projects a birth date onto `year`.
///
/// A 29 February birthday is observed on 28 February in non-leap years.
pub fn birthday_in_year(birth: NaiveDate, year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, birth.month(), birth.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, birth.month(), birth.day() - 1))
        .unwrap_or(birth)
}

/// The first birthday on or after `reference`.
pub fn next_birthday(birth: NaiveDate, reference: NaiveDate) -> NaiveDate {
    let candidate = birthday_in_year(birth, reference.year());
    if candidate < reference {
        birthday_in_year(birth, reference.year() + 1)
    } else {
        candidate
    }
}

/// Completed years at `reference`; `None` for birth dates in the future.
pub fn age_on(birth: NaiveDate, reference: NaiveDate) -> Option<u32> {
    reference.years_since(birth)
}

fn with_birthdays(members: &[Member]) -> impl Iterator<Item = (&Member, NaiveDate)> {
    members
        .iter()
        .filter(|member| member.is_active)
        .filter_map(|member| member.birth_date.map(|birth| (member, birth)))
}

pub fn birthdays_on(members: &[Member], date: NaiveDate) -> Vec<ProjectedOccurrence> {
    with_birthdays(members)
        .filter(|(_, birth)| birthday_in_year(*birth, date.year()) == date)
        .map(|(member, _)| ProjectedOccurrence::birthday(member, date))
        .collect()
}

/// Birthdays observed within `[start, end]`, in member order.
pub fn birthdays_in_range(
    members: &[Member],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<ProjectedOccurrence> {
    let mut out = Vec::new();
    if start > end {
        return out;
    }
    for (member, birth) in with_birthdays(members) {
        for year in start.year()..=end.year() {
            let observed = birthday_in_year(birth, year);
            if observed >= start && observed <= end {
                out.push(ProjectedOccurrence::birthday(member, observed));
            }
        }
    }
    out
}

/// Birthdays grouped by birth month alone, ordered by day then name.
pub fn birthdays_in_month(members: &[Member], year: i32, month: u32) -> Vec<ProjectedOccurrence> {
    let mut out: Vec<ProjectedOccurrence> = with_birthdays(members)
        .filter(|(_, birth)| birth.month() == month)
        .map(|(member, birth)| ProjectedOccurrence::birthday(member, birthday_in_year(birth, year)))
        .collect();
    out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.title.cmp(&b.title)));
    out
}

/// Next birthdays falling within `horizon_days` of `reference`, inclusive.
#[tracing::instrument(skip(members), fields(members = members.len()))]
pub fn upcoming_birthdays(
    members: &[Member],
    reference: NaiveDate,
    horizon_days: u32,
) -> anyhow::Result<Vec<ProjectedOccurrence>> {
    let horizon = horizon_end(reference, horizon_days)?;
    let mut out: Vec<ProjectedOccurrence> = with_birthdays(members)
        .map(|(member, birth)| (member, next_birthday(birth, reference)))
        .filter(|(_, next)| *next <= horizon)
        .map(|(member, next)| ProjectedOccurrence::birthday(member, next))
        .collect();
    out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.title.cmp(&b.title)));
    debug!(count = out.len(), "upcoming birthdays");
    Ok(out)
}
