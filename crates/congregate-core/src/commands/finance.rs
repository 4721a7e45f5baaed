use anyhow::{Context, anyhow};
use chrono::Datelike;
use tracing::{info, instrument};

use super::{Modifiers, Session, find_by_ref, optional, parse_flag, take_target};
use crate::datetime::{YearMonth, parse_date_expr, parse_month_expr};
use crate::ledger::{
    Category, CategoryKind, ExpenseEntry, IncomeEntry, format_amount, monthly_summary,
    parse_amount, recent_entries, yearly_report,
};
use crate::model::new_id;
use crate::render::short_id;
use crate::store::EntryQuery;

const DEFAULT_RECENT_LIMIT: usize = 10;
const INCOME_KEYS: &[&str] = &["category", "date", "member", "campaign", "description"];
const EXPENSE_KEYS: &[&str] = &["category", "date", "beneficiary", "recurring", "description"];
const CATEGORY_KEYS: &[&str] = &["type", "description", "default"];
const CATEGORY_MODIFY_KEYS: &[&str] = &["name", "description", "default"];

#[instrument(skip(session, args))]
pub(crate) fn cmd_ledger(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command ledger");
    let mods = Modifiers::parse(args, &[])?;
    let month = match mods.text() {
        Some(expr) => parse_month_expr(&expr, session.today)?,
        None => YearMonth::of(session.today),
    };

    let (income, expenses) = session.service.ledger_month(month)?;
    let categories = session.service.categories()?;
    let summary = monthly_summary(&income, &expenses, &categories, month)?;
    session.renderer.print_ledger_summary(&summary)
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_report(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command report");
    let year = match args.first() {
        Some(raw) => raw
            .parse::<i32>()
            .with_context(|| format!("invalid year: {raw}"))?,
        None => session.today.year(),
    };

    let mut income = Vec::new();
    let mut expenses = Vec::new();
    for m in 1..=12 {
        let (month_income, month_expenses) = session.service.ledger_month(YearMonth::new(year, m)?)?;
        income.extend(month_income);
        expenses.extend(month_expenses);
    }
    let report = yearly_report(&income, &expenses, year)?;
    session.renderer.print_yearly_report(year, &report)
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_recent(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command recent");
    let mut mods = Modifiers::parse(args, &["limit"])?;
    let limit = match mods.take("limit") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid limit: {raw}"))?,
        None => DEFAULT_RECENT_LIMIT,
    };

    let store = session.service.store();
    let income = store.select_income(&EntryQuery::default())?;
    let expenses = store.select_expenses(&EntryQuery::default())?;
    let entries = recent_entries(&income, &expenses, limit);
    if entries.is_empty() {
        println!("No ledger entries.");
        return Ok(());
    }
    let categories = session.service.categories()?;
    session.renderer.print_recent(&entries, &categories)
}

/// Leading amount followed by a free-text description.
fn amount_and_description(mods: &Modifiers, command: &str) -> anyhow::Result<(i64, Option<String>)> {
    let (amount, rest) = mods
        .words
        .split_first()
        .ok_or_else(|| anyhow!("{command}: amount is required"))?;
    let cents = parse_amount(amount)?;
    if cents == 0 {
        return Err(anyhow!("{command}: amount must be greater than zero"));
    }
    Ok((cents, optional(rest.join(" "))))
}

fn resolve_category(
    session: &mut Session<'_>,
    reference: Option<String>,
    kind: CategoryKind,
) -> anyhow::Result<Category> {
    let categories: Vec<Category> = session
        .service
        .categories()?
        .into_iter()
        .filter(|c| c.kind == kind)
        .collect();
    match reference.and_then(optional) {
        Some(reference) => Ok(find_by_ref(
            &categories,
            &reference,
            "category",
            |c| c.id.as_str(),
            |c| c.name.as_str(),
        )?
        .clone()),
        None => categories
            .iter()
            .find(|c| c.is_default)
            .cloned()
            .ok_or_else(|| anyhow!("category: is required (no default category)")),
    }
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_income(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command income");
    let mut mods = Modifiers::parse(args, INCOME_KEYS)?;
    let (amount_cents, words) = amount_and_description(&mods, "income")?;
    let category = resolve_category(session, mods.take("category"), CategoryKind::Income)?;
    let date = match mods.take("date") {
        Some(raw) => parse_date_expr(&raw, session.today)?,
        None => session.today,
    };
    let member_id = match mods.take("member").and_then(optional) {
        Some(reference) => {
            let members = session.service.members()?;
            Some(
                find_by_ref(&members, &reference, "member", |m| m.id.as_str(), |m| m.name.as_str())?
                    .id
                    .clone(),
            )
        }
        None => None,
    };

    let entry = IncomeEntry {
        id: new_id(),
        category_id: category.id.clone(),
        member_id,
        amount_cents,
        date,
        description: mods.take("description").and_then(optional).or(words),
        campaign_name: mods.take("campaign").and_then(optional),
    };
    let saved = session.service.record_income(entry)?;
    println!(
        "Recorded income {} ({}) on {}.",
        format_amount(saved.amount_cents),
        category.name,
        saved.date
    );
    Ok(())
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_expense(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command expense");
    let mut mods = Modifiers::parse(args, EXPENSE_KEYS)?;
    let (amount_cents, words) = amount_and_description(&mods, "expense")?;
    let category = resolve_category(session, mods.take("category"), CategoryKind::Expense)?;
    let date = match mods.take("date") {
        Some(raw) => parse_date_expr(&raw, session.today)?,
        None => session.today,
    };
    let is_recurring = match mods.take("recurring") {
        Some(raw) => parse_flag("recurring", &raw)?,
        None => false,
    };

    let entry = ExpenseEntry {
        id: new_id(),
        category_id: category.id.clone(),
        amount_cents,
        date,
        description: mods.take("description").and_then(optional).or(words),
        beneficiary: mods.take("beneficiary").and_then(optional),
        is_recurring,
    };
    let saved = session.service.record_expense(entry)?;
    println!(
        "Recorded expense {} ({}) on {}.",
        format_amount(saved.amount_cents),
        category.name,
        saved.date
    );
    Ok(())
}

#[instrument(skip(session, args))]
pub(crate) fn cmd_categories(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command categories");
    let kind = args
        .first()
        .map(|raw| raw.parse::<CategoryKind>())
        .transpose()?;
    let categories: Vec<Category> = session
        .service
        .categories()?
        .into_iter()
        .filter(|c| kind.is_none_or(|k| c.kind == k))
        .collect();
    if categories.is_empty() {
        println!("No categories.");
        return Ok(());
    }
    session.renderer.print_categories(&categories)
}

/// `category add NAME type:income|expense`, `category modify ID name:NAME` or
/// `category delete ID`.
#[instrument(skip(session, selectors, args))]
pub(crate) fn cmd_category(
    session: &mut Session<'_>,
    selectors: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command category");
    match args.first().map(String::as_str) {
        Some("add") => {
            let mut mods = Modifiers::parse(&args[1..], CATEGORY_KEYS)?;
            let name = mods
                .text()
                .ok_or_else(|| anyhow!("category add: name is required"))?;
            let kind = mods
                .take("type")
                .ok_or_else(|| anyhow!("category add: type:income or type:expense is required"))?
                .parse::<CategoryKind>()?;
            let existing = session.service.categories()?;
            if existing
                .iter()
                .any(|c| c.kind == kind && c.name.eq_ignore_ascii_case(&name))
            {
                return Err(anyhow!("category already exists: {name}"));
            }
            let mut category = Category::new(name, kind);
            category.description = mods.take("description").and_then(optional);
            if let Some(raw) = mods.take("default") {
                category.is_default = parse_flag("default", &raw)?;
            }
            let saved = session.service.save_category(category, true)?;
            println!("Created category {} '{}'.", short_id(&saved.id), saved.name);
            Ok(())
        }
        Some("modify") => {
            let (reference, rest) = take_target(selectors, &args[1..], "category modify")?;
            let mut mods = Modifiers::parse(rest, CATEGORY_MODIFY_KEYS)?;
            let categories = session.service.categories()?;
            let mut category = find_by_ref(
                &categories,
                &reference,
                "category",
                |c| c.id.as_str(),
                |c| c.name.as_str(),
            )?
            .clone();
            if let Some(name) = mods.take("name").and_then(optional).or_else(|| mods.text()) {
                if categories.iter().any(|c| {
                    c.id != category.id && c.kind == category.kind && c.name.eq_ignore_ascii_case(&name)
                }) {
                    return Err(anyhow!("category already exists: {name}"));
                }
                category.name = name;
            }
            if let Some(raw) = mods.take("description") {
                category.description = optional(raw);
            }
            if let Some(raw) = mods.take("default") {
                category.is_default = parse_flag("default", &raw)?;
            }
            let saved = session.service.save_category(category, false)?;
            println!("Modified category '{}'.", saved.name);
            Ok(())
        }
        Some("delete") => {
            let (reference, _) = take_target(selectors, &args[1..], "category delete")?;
            let categories = session.service.categories()?;
            let id = find_by_ref(
                &categories,
                &reference,
                "category",
                |c| c.id.as_str(),
                |c| c.name.as_str(),
            )?
            .id
            .clone();
            let removed = session.service.delete_category(&id)?;
            println!("Deleted category '{}'.", removed.name);
            Ok(())
        }
        Some(other) => Err(anyhow!(
            "category: unknown action {other} (expected add, modify or delete)"
        )),
        None => Err(anyhow!("category: expected add, modify or delete")),
    }
}
