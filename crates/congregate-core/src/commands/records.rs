use anyhow::{Context, anyhow};
use tracing::{info, instrument};

use super::{Modifiers, Session, find_by_ref, optional, parse_flag, take_target};
use crate::aggregate::{ActiveFilter, upcoming};
use crate::datetime::{horizon_end, normalize_time, parse_date_expr, parse_iso_date, parse_weekday};
use crate::model::{
    CalendarEvent, ChurchSettings, DEFAULT_DEPARTMENT_COLOR, DEFAULT_EVENT_TYPE, Department, Member,
};
use crate::recurrence::RecurrenceDay;
use crate::render::short_id;

const EVENT_KEYS: &[&str] = &[
    "date",
    "time",
    "department",
    "type",
    "description",
    "every",
    "year",
];
const DEPARTMENT_KEYS: &[&str] = &["name", "color", "description"];
const MEMBER_KEYS: &[&str] = &["name", "birth_date", "phone", "email", "notes", "active"];
const CHURCH_KEYS: &[&str] = &["name", "cnpj", "address", "phone"];

fn resolve_department_id(session: &mut Session<'_>, reference: &str) -> anyhow::Result<String> {
    let departments = session.service.departments()?;
    let dept = find_by_ref(
        &departments,
        reference,
        "department",
        |d| d.id.as_str(),
        |d| d.name.as_str(),
    )?;
    Ok(dept.id.clone())
}

/// Applies event modifiers in dependency order: the date first, then the
/// recurrence that may be anchored on it.
fn apply_event_mods(
    session: &mut Session<'_>,
    event: &mut CalendarEvent,
    mods: &mut Modifiers,
) -> anyhow::Result<()> {
    if let Some(raw) = mods.take("date") {
        event.date = parse_date_expr(&raw, session.today)?;
    }

    if let Some(raw) = mods.take("every") {
        match optional(raw) {
            Some(day) => {
                let day = RecurrenceDay::from(parse_weekday(&day)?);
                event.is_recurring = true;
                event.recurrence_day = Some(day.number());
            }
            None => {
                event.is_recurring = false;
                event.recurrence_day = None;
                event.recurrence_year = None;
            }
        }
    }

    if let Some(raw) = mods.take("year") {
        if !event.is_recurring {
            return Err(anyhow!("year: only weekly events can be pinned to a year"));
        }
        event.recurrence_year = optional(raw)
            .map(|y| y.parse::<i32>().with_context(|| format!("invalid year: {y}")))
            .transpose()?;
    }

    if let Some(raw) = mods.take("time") {
        event.time = optional(raw).map(|t| normalize_time(&t)).transpose()?;
    }

    if let Some(raw) = mods.take("department") {
        event.department = match optional(raw) {
            Some(reference) => Some(resolve_department_id(session, &reference)?),
            None => None,
        };
    }

    if let Some(raw) = mods.take("type") {
        event.event_type = optional(raw).unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());
    }

    if let Some(raw) = mods.take("description") {
        event.description = optional(raw);
    }

    if let Some(title) = mods.text() {
        event.title = title;
    }
    Ok(())
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_add(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command add");
    let mut mods = Modifiers::parse(args, EVENT_KEYS)?;
    let title = mods
        .text()
        .ok_or_else(|| anyhow!("add: title is required"))?;

    let mut event = CalendarEvent::new_direct(title, session.today);
    apply_event_mods(session, &mut event, &mut mods)?;
    let saved = session.service.save_event(event, true)?;

    if saved.is_recurring {
        let day = saved
            .recurrence_day
            .map(RecurrenceDay::new)
            .transpose()?
            .map(|d| d.to_string())
            .unwrap_or_default();
        println!("Created weekly event {} every {day}.", short_id(&saved.id));
    } else {
        println!("Created event {} on {}.", short_id(&saved.id), saved.date);
    }
    Ok(())
}

#[instrument(skip(session, selectors, args))]
pub(crate) fn cmd_modify(
    session: &mut Session<'_>,
    selectors: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command modify");
    let (reference, rest) = take_target(selectors, args, "modify")?;
    let mut mods = Modifiers::parse(rest, EVENT_KEYS)?;
    if mods.is_empty() {
        return Err(anyhow!("modify: nothing to change"));
    }

    let store = session.service.store();
    let id = store.resolve_id::<CalendarEvent>(&reference)?;
    let mut event = store
        .find::<CalendarEvent>(&id)?
        .ok_or_else(|| anyhow!("event not found: {id}"))?;
    apply_event_mods(session, &mut event, &mut mods)?;
    let saved = session.service.save_event(event, false)?;
    println!("Modified event {} '{}'.", short_id(&saved.id), saved.title);
    Ok(())
}

#[instrument(skip(session, selectors, args))]
pub(crate) fn cmd_delete(
    session: &mut Session<'_>,
    selectors: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command delete");
    let (reference, _) = take_target(selectors, args, "delete")?;
    let id = session
        .service
        .store()
        .resolve_id::<CalendarEvent>(&reference)?;
    let removed = session.service.delete_event(&id)?;
    println!("Deleted event {} '{}'.", short_id(&removed.id), removed.title);
    Ok(())
}

#[instrument(skip(session))]
pub(crate) fn cmd_departments(session: &mut Session<'_>) -> anyhow::Result<()> {
    info!("command departments");
    let departments = session.service.departments()?;
    if departments.is_empty() {
        println!("No departments.");
        return Ok(());
    }
    session.renderer.print_departments(&departments)
}

fn apply_department_mods(dept: &mut Department, mods: &mut Modifiers) {
    if let Some(name) = mods.take("name").and_then(optional) {
        dept.name = name;
    }
    if let Some(raw) = mods.take("color") {
        dept.color = optional(raw).unwrap_or_else(|| DEFAULT_DEPARTMENT_COLOR.to_string());
    }
    if let Some(raw) = mods.take("description") {
        dept.description = optional(raw);
    }
}

/// `department add|modify|delete`, or a department's upcoming calendar.
#[instrument(skip(session, selectors, args))]
pub(crate) fn cmd_department(
    session: &mut Session<'_>,
    selectors: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command department");
    let action = args.first().map(String::as_str);
    let departments = session.service.departments()?;

    match action {
        Some("add") => {
            let mut mods = Modifiers::parse(&args[1..], DEPARTMENT_KEYS)?;
            let name = mods
                .text()
                .ok_or_else(|| anyhow!("department add: name is required"))?;
            if departments.iter().any(|d| d.name.eq_ignore_ascii_case(&name)) {
                return Err(anyhow!("department already exists: {name}"));
            }
            let mut dept = Department::new(name, None);
            apply_department_mods(&mut dept, &mut mods);
            let saved = session.service.save_department(dept, true)?;
            println!("Created department {} '{}'.", short_id(&saved.id), saved.name);
            Ok(())
        }
        Some("modify") => {
            let (reference, rest) = take_target(selectors, &args[1..], "department modify")?;
            let mut mods = Modifiers::parse(rest, DEPARTMENT_KEYS)?;
            let mut dept = find_by_ref(
                &departments,
                &reference,
                "department",
                |d| d.id.as_str(),
                |d| d.name.as_str(),
            )?
            .clone();
            apply_department_mods(&mut dept, &mut mods);
            if let Some(name) = mods.text() {
                dept.name = name;
            }
            let saved = session.service.save_department(dept, false)?;
            println!("Modified department '{}'.", saved.name);
            Ok(())
        }
        Some("delete") => {
            let (reference, _) = take_target(selectors, &args[1..], "department delete")?;
            let id = find_by_ref(
                &departments,
                &reference,
                "department",
                |d| d.id.as_str(),
                |d| d.name.as_str(),
            )?
            .id
            .clone();
            let removed = session.service.delete_department(&id)?;
            println!("Deleted department '{}'.", removed.name);
            Ok(())
        }
        _ => {
            let reference = match (selectors, args) {
                ([], []) => return Err(anyhow!("department: an id or name is required")),
                ([], words) => words.join(" "),
                (selected, _) => selected.join(" "),
            };
            let dept = find_by_ref(
                &departments,
                &reference,
                "department",
                |d| d.id.as_str(),
                |d| d.name.as_str(),
            )?;
            let horizon = session.cfg.upcoming_days()?;
            let today = session.today;
            let snapshot = session
                .service
                .snapshot(today, horizon_end(today, horizon)?)?;
            let filter = ActiveFilter::Department(dept.id.clone());
            let occurrences = upcoming(&snapshot, today, horizon, &filter)?;
            println!("{} ({})", dept.name, dept.color);
            if let Some(description) = &dept.description {
                println!("{description}");
            }
            println!();
            session
                .renderer
                .print_occurrences(&occurrences, &snapshot.departments)
        }
    }
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_members(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command members");
    let active_only = args.first().is_some_and(|arg| arg == "active");
    let members: Vec<Member> = session
        .service
        .members()?
        .into_iter()
        .filter(|m| !active_only || m.is_active)
        .collect();
    if members.is_empty() {
        println!("No members.");
        return Ok(());
    }
    session.renderer.print_members(&members, session.today)
}

fn apply_member_mods(member: &mut Member, mods: &mut Modifiers) -> anyhow::Result<()> {
    if let Some(name) = mods.take("name").and_then(optional) {
        member.name = name;
    }
    if let Some(raw) = mods.take("birth_date") {
        member.birth_date = optional(raw).map(|d| parse_iso_date(&d)).transpose()?;
    }
    if let Some(raw) = mods.take("phone") {
        member.phone = optional(raw);
    }
    if let Some(raw) = mods.take("email") {
        member.email = optional(raw);
    }
    if let Some(raw) = mods.take("notes") {
        member.notes = optional(raw);
    }
    if let Some(raw) = mods.take("active") {
        member.is_active = parse_flag("active", &raw)?;
    }
    Ok(())
}

/// `member add|modify|delete`, or one member's details.
#[instrument(skip(session, selectors, args))]
pub(crate) fn cmd_member(
    session: &mut Session<'_>,
    selectors: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command member");
    let action = args.first().map(String::as_str);
    let members = session.service.members()?;

    match action {
        Some("add") => {
            let mut mods = Modifiers::parse(&args[1..], MEMBER_KEYS)?;
            let name = mods
                .text()
                .ok_or_else(|| anyhow!("member add: name is required"))?;
            let mut member = Member::new(name, None);
            apply_member_mods(&mut member, &mut mods)?;
            let saved = session.service.save_member(member, true)?;
            println!("Created member {} '{}'.", short_id(&saved.id), saved.name);
            Ok(())
        }
        Some("modify") => {
            let (reference, rest) = take_target(selectors, &args[1..], "member modify")?;
            let mut mods = Modifiers::parse(rest, MEMBER_KEYS)?;
            let mut member = find_by_ref(
                &members,
                &reference,
                "member",
                |m| m.id.as_str(),
                |m| m.name.as_str(),
            )?
            .clone();
            apply_member_mods(&mut member, &mut mods)?;
            if let Some(name) = mods.text() {
                member.name = name;
            }
            let saved = session.service.save_member(member, false)?;
            println!("Modified member '{}'.", saved.name);
            Ok(())
        }
        Some("delete") => {
            let (reference, _) = take_target(selectors, &args[1..], "member delete")?;
            let id = find_by_ref(
                &members,
                &reference,
                "member",
                |m| m.id.as_str(),
                |m| m.name.as_str(),
            )?
            .id
            .clone();
            let removed = session.service.delete_member(&id)?;
            println!("Deleted member '{}'.", removed.name);
            Ok(())
        }
        _ => {
            let reference = match (selectors, args) {
                ([], []) => return Err(anyhow!("member: an id or name is required")),
                ([], words) => words.join(" "),
                (selected, _) => selected.join(" "),
            };
            let member = find_by_ref(
                &members,
                &reference,
                "member",
                |m| m.id.as_str(),
                |m| m.name.as_str(),
            )?;
            session.renderer.print_member_info(member, session.today)
        }
    }
}

/// `church` shows the church details; `church set name:NAME cnpj:...` edits them.
#[instrument(skip(session, args))]
pub(crate) fn cmd_church(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command church");
    let current = session.service.church_settings()?;
    match args.first().map(String::as_str) {
        None => match current {
            Some(settings) => session.renderer.print_church(&settings),
            None => {
                println!("No church details yet. Use: church set name:NAME");
                Ok(())
            }
        },
        Some("set") => {
            let mut mods = Modifiers::parse(&args[1..], CHURCH_KEYS)?;
            let name = mods.take("name").and_then(optional).or_else(|| mods.text());
            let mut settings = match (current, name) {
                (Some(mut existing), Some(name)) => {
                    existing.name = name;
                    existing
                }
                (Some(existing), None) => existing,
                (None, Some(name)) => ChurchSettings::new(name),
                (None, None) => return Err(anyhow!("church set: name is required")),
            };
            if let Some(raw) = mods.take("cnpj") {
                settings.cnpj = optional(raw);
            }
            if let Some(raw) = mods.take("address") {
                settings.address = optional(raw);
            }
            if let Some(raw) = mods.take("phone") {
                settings.phone = optional(raw);
            }
            let saved = session.service.save_church_settings(settings)?;
            println!("Saved church details for '{}'.", saved.name);
            Ok(())
        }
        Some(other) => Err(anyhow!("church: unknown action {other} (expected set)")),
    }
}
