use anyhow::{Context, anyhow};
use chrono::{Datelike, NaiveDate};
use tracing::{info, instrument};

use super::{Modifiers, Session};
use crate::aggregate::{
    ActiveFilter, CalendarSnapshot, day_marker, items_for_date, month_agenda, occurrences_in_range,
    upcoming,
};
use crate::birthday::{birthdays_in_month, upcoming_birthdays};
use crate::datetime::{YearMonth, check_horizon, horizon_end, parse_date_expr, parse_month_expr};
use crate::grid::{month_days, month_grid, year_overview};
use crate::render::{DayMark, DayMarks};

const VIEW_KEYS: &[&str] = &["filter", "department"];

/// Marker per day that has anything to show under `filter`.
pub(crate) fn day_marks(
    snapshot: &CalendarSnapshot,
    days: impl Iterator<Item = NaiveDate>,
    filter: &ActiveFilter,
) -> anyhow::Result<DayMarks> {
    let mut marks = DayMarks::new();
    for date in days {
        let items = items_for_date(snapshot, date, filter)?;
        if let Some(color) = day_marker(&items, &snapshot.departments) {
            marks.insert(
                date,
                DayMark {
                    count: items.len(),
                    color: color.to_string(),
                },
            );
        }
    }
    Ok(marks)
}

fn month_arg(session: &Session<'_>, mods: &Modifiers) -> anyhow::Result<YearMonth> {
    match mods.text() {
        Some(expr) => parse_month_expr(&expr, session.today),
        None => Ok(YearMonth::of(session.today)),
    }
}

fn horizon_arg(session: &Session<'_>, mods: &mut Modifiers) -> anyhow::Result<u32> {
    match mods.take("days") {
        Some(raw) => check_horizon(
            raw.parse()
                .with_context(|| format!("invalid days: {raw}"))?,
        ),
        None => session.cfg.upcoming_days(),
    }
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_month(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command month");
    let mut mods = Modifiers::parse(args, VIEW_KEYS)?;
    let filter = mods.take_filter();
    let month = month_arg(session, &mods)?;

    let grid = month_grid(month, session.cfg.week_start()?)?;
    let snapshot = session.service.month_snapshot(month)?;
    let marks = day_marks(&snapshot, month_days(&grid), &filter)?;
    session.renderer.print_month_grid(&grid, &marks, session.today)?;

    let occurrences = occurrences_in_range(&snapshot, month.first_day()?, month.last_day()?, &filter)?;
    if !occurrences.is_empty() {
        println!();
        session
            .renderer
            .print_occurrences(&occurrences, &snapshot.departments)?;
    }
    Ok(())
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_list(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command list");
    let mut mods = Modifiers::parse(args, VIEW_KEYS)?;
    let filter = mods.take_filter();
    let month = month_arg(session, &mods)?;

    let snapshot = session.service.month_snapshot(month)?;
    let agenda = month_agenda(&snapshot, month, &filter)?;
    session
        .renderer
        .print_month_agenda(&agenda, &snapshot.departments)
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_year(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command year");
    let mut mods = Modifiers::parse(args, VIEW_KEYS)?;
    let filter = mods.take_filter();
    let year = match mods.text() {
        Some(raw) => raw
            .parse::<i32>()
            .with_context(|| format!("invalid year: {raw}"))?,
        None => session.today.year(),
    };

    let months = year_overview(year, session.cfg.week_start()?)?;
    let first = YearMonth::new(year, 1)?.first_day()?;
    let last = YearMonth::new(year, 12)?.last_day()?;
    let snapshot = session.service.snapshot(first, last)?;
    let days = months.iter().flat_map(month_days);
    let marks = day_marks(&snapshot, days, &filter)?;
    session.renderer.print_year(year, &months, &marks)
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_day(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command day");
    let mut mods = Modifiers::parse(args, VIEW_KEYS)?;
    let filter = mods.take_filter();
    let date = match mods.text() {
        Some(expr) => parse_date_expr(&expr, session.today)?,
        None => session.today,
    };

    let snapshot = session.service.snapshot(date, date)?;
    let items = items_for_date(&snapshot, date, &filter)?;
    session.renderer.print_day(&items, &snapshot.departments)
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_upcoming(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command upcoming");
    let mut mods = Modifiers::parse(args, &["filter", "department", "days"])?;
    let filter = mods.take_filter();
    let horizon = horizon_arg(session, &mut mods)?;
    if let Some(extra) = mods.text() {
        return Err(anyhow!("upcoming: unexpected argument: {extra}"));
    }

    let today = session.today;
    let snapshot = session
        .service
        .snapshot(today, horizon_end(today, horizon)?)?;
    let occurrences = upcoming(&snapshot, today, horizon, &filter)?;
    if occurrences.is_empty() {
        println!("Nothing in the next {horizon} days.");
        return Ok(());
    }
    session
        .renderer
        .print_occurrences(&occurrences, &snapshot.departments)
}

/// Upcoming birthdays, or a month's birthdays when a month is named.
#[instrument(skip(session, args))]
pub(crate) fn cmd_birthdays(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command birthdays");
    let mut mods = Modifiers::parse(args, &["days"])?;
    let members = session.service.birthday_members()?;

    let birthdays = match mods.text() {
        Some(expr) => {
            let month = parse_month_expr(&expr, session.today)?;
            birthdays_in_month(&members, month.year, month.month)
        }
        None => {
            let horizon = horizon_arg(session, &mut mods)?;
            upcoming_birthdays(&members, session.today, horizon)?
        }
    };

    if birthdays.is_empty() {
        println!("No birthdays.");
        return Ok(());
    }
    session.renderer.print_birthdays(&birthdays, &members)
}

#[instrument(skip(session))]
pub(crate) fn cmd_recurring(session: &mut Session<'_>) -> anyhow::Result<()> {
    info!("command recurring");
    let events = session.service.recurring_events()?;
    let departments = session.service.departments()?;
    if events.is_empty() {
        println!("No weekly events.");
        return Ok(());
    }
    session.renderer.print_recurring(&events, &departments)
}
