use anyhow::anyhow;
use tracing::{info, instrument};

use super::{Modifiers, Session, find_by_ref, optional, parse_flag, take_target};
use crate::datetime::{YearMonth, parse_date_expr, parse_month_expr};
use crate::pantry::{
    BeneficiaryFamily, FoodEntry, FoodExit, distributions_by_family, format_kilograms,
    month_movements, parse_kilograms,
};
use crate::render::short_id;
use crate::store::EntryQuery;

const DONATION_KEYS: &[&str] = &["food", "quantity", "date", "donor", "description"];
const DISTRIBUTION_KEYS: &[&str] = &["food", "quantity", "date", "family", "description"];
const FAMILY_KEYS: &[&str] = &[
    "name",
    "responsible",
    "phone",
    "address",
    "people",
    "notes",
    "active",
];

#[instrument(skip(session))]
pub(crate) fn cmd_inventory(session: &mut Session<'_>) -> anyhow::Result<()> {
    info!("command inventory");
    let levels = session.service.food_inventory()?;
    if levels.is_empty() {
        println!("Pantry is empty.");
        return Ok(());
    }
    session.renderer.print_inventory(&levels)
}

/// `food [MONTH]` or `food families [MONTH]`.
#[instrument(skip(session, args))]
pub(crate) fn cmd_food(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command food");
    let (by_family, rest) = match args.split_first() {
        Some((first, rest)) if first == "families" => (true, rest),
        _ => (false, args),
    };
    let month = match optional(rest.join(" ")) {
        Some(expr) => parse_month_expr(&expr, session.today)?,
        None => YearMonth::of(session.today),
    };

    let entries = session.service.food_entries(month)?;
    let exits = session.service.food_exits(month)?;
    if by_family {
        let groups = distributions_by_family(&exits)?;
        return session
            .renderer
            .print_family_distributions(&month.to_string(), &groups);
    }
    let movements = month_movements(&entries, &exits, month)?;
    session.renderer.print_pantry_month(&movements)
}

/// Leading quantity in kilograms followed by the food name, unless
/// `quantity:` names it.
fn quantity_and_food(
    mods: &mut Modifiers,
    command: &str,
) -> anyhow::Result<(i64, String)> {
    let (grams, named) = match mods.take("quantity") {
        Some(raw) => (parse_kilograms(&raw)?, mods.text()),
        None => {
            let (quantity, rest) = mods
                .words
                .split_first()
                .ok_or_else(|| anyhow!("{command}: quantity in kg is required"))?;
            (parse_kilograms(quantity)?, optional(rest.join(" ")))
        }
    };
    let food = mods
        .take("food")
        .and_then(optional)
        .or(named)
        .ok_or_else(|| anyhow!("{command}: food name is required"))?;
    Ok((grams, food))
}

fn resolve_family(session: &mut Session<'_>, reference: String) -> anyhow::Result<Option<String>> {
    let Some(reference) = optional(reference) else {
        return Ok(None);
    };
    let families: Vec<BeneficiaryFamily> = session
        .service
        .families()?
        .into_iter()
        .filter(|f| f.is_active)
        .collect();
    let family = find_by_ref(
        &families,
        &reference,
        "family",
        |f| f.id.as_str(),
        |f| f.family_name.as_str(),
    )?;
    Ok(Some(family.family_name.clone()))
}

/// `donation QTY FOOD donor:NAME`, `donation modify ID ...` or
/// `donation delete ID`.
#[instrument(skip(session, selectors, args))]
pub(crate) fn cmd_donation(
    session: &mut Session<'_>,
    selectors: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command donation");
    match args.first().map(String::as_str) {
        Some("modify") => {
            let (reference, rest) = take_target(selectors, &args[1..], "donation modify")?;
            let mut mods = Modifiers::parse(rest, DONATION_KEYS)?;
            let store = session.service.store();
            let id = store.resolve_id::<FoodEntry>(&reference)?;
            let mut entry = store
                .find::<FoodEntry>(&id)?
                .ok_or_else(|| anyhow!("no donation with id {id}"))?;
            if let Some(raw) = mods.take("quantity") {
                entry.quantity_grams = parse_kilograms(&raw)?;
            }
            if let Some(food) = mods.take("food").and_then(optional) {
                entry.food_name = food;
            }
            if let Some(raw) = mods.take("date") {
                entry.date = parse_date_expr(&raw, session.today)?;
            }
            if let Some(raw) = mods.take("donor") {
                entry.donor_name = optional(raw);
            }
            if let Some(raw) = mods.take("description") {
                entry.description = optional(raw);
            }
            if let Some(extra) = mods.text() {
                return Err(anyhow!("donation modify: unexpected argument: {extra}"));
            }
            let saved = session.service.save_food_entry(entry, false)?;
            println!("Modified donation {}.", short_id(&saved.id));
            Ok(())
        }
        Some("delete") => {
            let (reference, _) = take_target(selectors, &args[1..], "donation delete")?;
            let id = session.service.store().resolve_id::<FoodEntry>(&reference)?;
            let removed = session.service.delete_food_entry(&id)?;
            println!(
                "Deleted donation of {} kg {}.",
                format_kilograms(removed.quantity_grams),
                removed.food_name
            );
            Ok(())
        }
        _ => {
            let args = match args.split_first() {
                Some((first, rest)) if first == "add" => rest,
                _ => args,
            };
            let mut mods = Modifiers::parse(args, DONATION_KEYS)?;
            let (grams, food) = quantity_and_food(&mut mods, "donation")?;
            let date = match mods.take("date") {
                Some(raw) => parse_date_expr(&raw, session.today)?,
                None => session.today,
            };
            let mut entry = FoodEntry::new(food, grams, date);
            entry.donor_name = mods.take("donor").and_then(optional);
            entry.description = mods.take("description").and_then(optional);
            let saved = session.service.save_food_entry(entry, true)?;
            println!(
                "Recorded donation {}: {} kg {} on {}.",
                short_id(&saved.id),
                format_kilograms(saved.quantity_grams),
                saved.food_name,
                saved.date
            );
            Ok(())
        }
    }
}

/// `distribution QTY FOOD family:FAMILY`, `distribution modify ID ...` or
/// `distribution delete ID`.
#[instrument(skip(session, selectors, args))]
pub(crate) fn cmd_distribution(
    session: &mut Session<'_>,
    selectors: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command distribution");
    match args.first().map(String::as_str) {
        Some("modify") => {
            let (reference, rest) = take_target(selectors, &args[1..], "distribution modify")?;
            let mut mods = Modifiers::parse(rest, DISTRIBUTION_KEYS)?;
            let store = session.service.store();
            let id = store.resolve_id::<FoodExit>(&reference)?;
            let mut exit = store
                .find::<FoodExit>(&id)?
                .ok_or_else(|| anyhow!("no distribution with id {id}"))?;
            if let Some(raw) = mods.take("quantity") {
                exit.quantity_grams = parse_kilograms(&raw)?;
            }
            if let Some(food) = mods.take("food").and_then(optional) {
                exit.food_name = food;
            }
            if let Some(raw) = mods.take("date") {
                exit.date = parse_date_expr(&raw, session.today)?;
            }
            if let Some(raw) = mods.take("family") {
                exit.family_name = resolve_family(session, raw)?;
            }
            if let Some(raw) = mods.take("description") {
                exit.description = optional(raw);
            }
            if let Some(extra) = mods.text() {
                return Err(anyhow!("distribution modify: unexpected argument: {extra}"));
            }
            let saved = session.service.save_food_exit(exit, false)?;
            println!("Modified distribution {}.", short_id(&saved.id));
            Ok(())
        }
        Some("delete") => {
            let (reference, _) = take_target(selectors, &args[1..], "distribution delete")?;
            let id = session.service.store().resolve_id::<FoodExit>(&reference)?;
            let removed = session.service.delete_food_exit(&id)?;
            println!(
                "Deleted distribution of {} kg {}.",
                format_kilograms(removed.quantity_grams),
                removed.food_name
            );
            Ok(())
        }
        _ => {
            let args = match args.split_first() {
                Some((first, rest)) if first == "add" => rest,
                _ => args,
            };
            let mut mods = Modifiers::parse(args, DISTRIBUTION_KEYS)?;
            let (grams, food) = quantity_and_food(&mut mods, "distribution")?;
            let date = match mods.take("date") {
                Some(raw) => parse_date_expr(&raw, session.today)?,
                None => session.today,
            };
            let mut exit = FoodExit::new(food, grams, date);
            if let Some(raw) = mods.take("family") {
                exit.family_name = resolve_family(session, raw)?;
            }
            exit.description = mods.take("description").and_then(optional);
            let saved = session.service.save_food_exit(exit, true)?;
            let to = saved
                .family_name
                .as_deref()
                .map(|family| format!(" to {family}"))
                .unwrap_or_default();
            println!(
                "Recorded distribution {}: {} kg {}{to} on {}.",
                short_id(&saved.id),
                format_kilograms(saved.quantity_grams),
                saved.food_name,
                saved.date
            );
            Ok(())
        }
    }
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_families(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command families");
    let active_only = args.first().is_some_and(|arg| arg == "active");
    let families: Vec<BeneficiaryFamily> = session
        .service
        .families()?
        .into_iter()
        .filter(|f| !active_only || f.is_active)
        .collect();
    if families.is_empty() {
        println!("No families.");
        return Ok(());
    }
    session.renderer.print_families(&families)
}

fn apply_family_mods(family: &mut BeneficiaryFamily, mods: &mut Modifiers) -> anyhow::Result<()> {
    if let Some(name) = mods.take("name").and_then(optional) {
        family.family_name = name;
    }
    if let Some(raw) = mods.take("responsible") {
        family.responsible_name = optional(raw);
    }
    if let Some(raw) = mods.take("phone") {
        family.phone = optional(raw);
    }
    if let Some(raw) = mods.take("address") {
        family.address = optional(raw);
    }
    if let Some(raw) = mods.take("people") {
        family.members_count = optional(raw)
            .map(|n| {
                n.parse::<u32>()
                    .map_err(|_| anyhow!("invalid people count: {n}"))
            })
            .transpose()?;
    }
    if let Some(raw) = mods.take("notes") {
        family.notes = optional(raw);
    }
    if let Some(raw) = mods.take("active") {
        family.is_active = parse_flag("active", &raw)?;
    }
    Ok(())
}

/// `family add|modify|delete`, or one family's details and what it received.
#[instrument(skip(session, selectors, args))]
pub(crate) fn cmd_family(
    session: &mut Session<'_>,
    selectors: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command family");
    let families = session.service.families()?;
    let find = |reference: &str| {
        find_by_ref(
            &families,
            reference,
            "family",
            |f| f.id.as_str(),
            |f| f.family_name.as_str(),
        )
        .cloned()
    };

    match args.first().map(String::as_str) {
        Some("add") => {
            let mut mods = Modifiers::parse(&args[1..], FAMILY_KEYS)?;
            let name = mods
                .text()
                .ok_or_else(|| anyhow!("family add: name is required"))?;
            if families
                .iter()
                .any(|f| f.family_name.eq_ignore_ascii_case(&name))
            {
                return Err(anyhow!("family already exists: {name}"));
            }
            let mut family = BeneficiaryFamily::new(name);
            apply_family_mods(&mut family, &mut mods)?;
            let saved = session.service.save_family(family, true)?;
            println!("Created family {} '{}'.", short_id(&saved.id), saved.family_name);
            Ok(())
        }
        Some("modify") => {
            let (reference, rest) = take_target(selectors, &args[1..], "family modify")?;
            let mut mods = Modifiers::parse(rest, FAMILY_KEYS)?;
            let mut family = find(&reference)?;
            apply_family_mods(&mut family, &mut mods)?;
            if let Some(name) = mods.text() {
                family.family_name = name;
            }
            let saved = session.service.save_family(family, false)?;
            println!("Modified family '{}'.", saved.family_name);
            Ok(())
        }
        Some("delete") => {
            let (reference, _) = take_target(selectors, &args[1..], "family delete")?;
            let id = find(&reference)?.id;
            let removed = session.service.delete_family(&id)?;
            println!("Deleted family '{}'.", removed.family_name);
            Ok(())
        }
        _ => {
            let reference = match (selectors, args) {
                ([], []) => return Err(anyhow!("family: an id or name is required")),
                ([], words) => words.join(" "),
                (selected, _) => selected.join(" "),
            };
            let family = find(&reference)?;
            let name = family.family_name.trim();
            let received: Vec<FoodExit> = session
                .service
                .store()
                .select_food_exits(&EntryQuery::default())?
                .into_iter()
                .filter(|exit| {
                    exit.family_name
                        .as_deref()
                        .is_some_and(|received_by| received_by.trim().eq_ignore_ascii_case(name))
                })
                .collect();
            session.renderer.print_family_info(&family, &received)
        }
    }
}
