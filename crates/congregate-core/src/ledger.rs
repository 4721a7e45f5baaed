use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::datetime::{YearMonth, iso_date_serde};
use crate::model::new_id;

/// Group name for entries whose category cannot be resolved.
pub const UNCATEGORIZED: &str = "Outros";

/// Largest single entry accepted, in cents.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Income,
    Expense,
}

impl std::str::FromStr for CategoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" | "in" => Ok(Self::Income),
            "expense" | "out" => Ok(Self::Expense),
            other => Err(anyhow!("invalid category type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CategoryKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl Category {
    pub fn new(name: String, kind: CategoryKind) -> Self {
        Self {
            id: new_id(),
            name,
            kind,
            description: None,
            is_default: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomeEntry {
    pub id: String,
    pub category_id: String,
    #[serde(default)]
    pub member_id: Option<String>,
    pub amount_cents: i64,
    #[serde(with = "iso_date_serde")]
    pub date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub campaign_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpenseEntry {
    pub id: String,
    pub category_id: String,
    pub amount_cents: i64,
    #[serde(with = "iso_date_serde")]
    pub date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub beneficiary: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotal {
    pub name: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub month: String,
    pub total_income: i64,
    pub total_expenses: i64,
    pub balance: i64,
    pub income_by_category: Vec<CategoryTotal>,
    pub expenses_by_category: Vec<CategoryTotal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyReport {
    pub month: String,
    pub income: i64,
    pub expenses: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Income,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub kind: EntryKind,
    pub id: String,
    pub date: NaiveDate,
    pub amount_cents: i64,
    pub category_id: String,
    pub description: Option<String>,
}

fn category_name<'a>(categories: &'a [Category], id: &str) -> &'a str {
    categories
        .iter()
        .find(|category| category.id == id)
        .map(|category| category.name.as_str())
        .unwrap_or(UNCATEGORIZED)
}

/// Sum of `amounts`, failing instead of wrapping.
pub fn checked_total(amounts: impl IntoIterator<Item = i64>) -> anyhow::Result<i64> {
    amounts
        .into_iter()
        .try_fold(0_i64, |acc, amount| acc.checked_add(amount))
        .ok_or_else(|| anyhow!("ledger total overflows"))
}

fn group_totals<'a>(
    rows: impl Iterator<Item = (&'a str, i64)>,
    categories: &[Category],
) -> anyhow::Result<Vec<CategoryTotal>> {
    let mut grouped: BTreeMap<String, i64> = BTreeMap::new();
    for (category_id, amount) in rows {
        let slot = grouped
            .entry(category_name(categories, category_id).to_string())
            .or_default();
        *slot = checked_total([*slot, amount])?;
    }
    let mut out: Vec<CategoryTotal> = grouped
        .into_iter()
        .map(|(name, amount_cents)| CategoryTotal { name, amount_cents })
        .collect();
    out.sort_by(|a, b| b.amount_cents.cmp(&a.amount_cents).then_with(|| a.name.cmp(&b.name)));
    Ok(out)
}

fn balance(income: i64, expenses: i64) -> anyhow::Result<i64> {
    income
        .checked_sub(expenses)
        .ok_or_else(|| anyhow!("ledger balance overflows"))
}

/// Monthly balance sheet grouped by category.
#[tracing::instrument(skip(income, expenses, categories))]
pub fn monthly_summary(
    income: &[IncomeEntry],
    expenses: &[ExpenseEntry],
    categories: &[Category],
    month: YearMonth,
) -> anyhow::Result<LedgerSummary> {
    let income: Vec<&IncomeEntry> = income.iter().filter(|e| month.contains(e.date)).collect();
    let expenses: Vec<&ExpenseEntry> = expenses.iter().filter(|e| month.contains(e.date)).collect();

    let total_income = checked_total(income.iter().map(|e| e.amount_cents))?;
    let total_expenses = checked_total(expenses.iter().map(|e| e.amount_cents))?;

    Ok(LedgerSummary {
        month: month.to_string(),
        total_income,
        total_expenses,
        balance: balance(total_income, total_expenses)?,
        income_by_category: group_totals(
            income.iter().map(|e| (e.category_id.as_str(), e.amount_cents)),
            categories,
        )?,
        expenses_by_category: group_totals(
            expenses.iter().map(|e| (e.category_id.as_str(), e.amount_cents)),
            categories,
        )?,
    })
}

/// Month-by-month totals for `year`.
pub fn yearly_report(
    income: &[IncomeEntry],
    expenses: &[ExpenseEntry],
    year: i32,
) -> anyhow::Result<Vec<MonthlyReport>> {
    let mut out = Vec::with_capacity(12);
    for m in 1..=12 {
        let month = YearMonth::new(year, m)?;
        let month_income = checked_total(
            income
                .iter()
                .filter(|e| month.contains(e.date))
                .map(|e| e.amount_cents),
        )?;
        let month_expenses = checked_total(
            expenses
                .iter()
                .filter(|e| month.contains(e.date))
                .map(|e| e.amount_cents),
        )?;
        out.push(MonthlyReport {
            month: month.to_string(),
            income: month_income,
            expenses: month_expenses,
            balance: balance(month_income, month_expenses)?,
        });
    }
    Ok(out)
}

/// Income and expense entries combined, newest first.
pub fn recent_entries(
    income: &[IncomeEntry],
    expenses: &[ExpenseEntry],
    limit: usize,
) -> Vec<LedgerEntry> {
    let mut combined: Vec<LedgerEntry> = income
        .iter()
        .map(|e| LedgerEntry {
            kind: EntryKind::Income,
            id: e.id.clone(),
            date: e.date,
            amount_cents: e.amount_cents,
            category_id: e.category_id.clone(),
            description: e.description.clone(),
        })
        .chain(expenses.iter().map(|e| LedgerEntry {
            kind: EntryKind::Expense,
            id: e.id.clone(),
            date: e.date,
            amount_cents: e.amount_cents,
            category_id: e.category_id.clone(),
            description: e.description.clone(),
        }))
        .collect();
    combined.sort_by(|a, b| b.date.cmp(&a.date));
    combined.truncate(limit);
    combined
}

/// Parses `1234.56`, `1234,56`, `1.234,56` or `R$ 50` into cents.
pub fn parse_amount(raw: &str) -> anyhow::Result<i64> {
    let cents = parse_decimal(raw.trim().trim_start_matches("R$"), 2, "amount")?;
    if cents > MAX_AMOUNT_CENTS {
        return Err(anyhow!("amount too large: {raw}"));
    }
    Ok(cents)
}

/// Parses a non-negative decimal with up to `places` fractional digits into
/// an integer count of `10^-places` units. Either `,` or `.` may be the
/// decimal separator; the other one groups thousands.
pub fn parse_decimal(raw: &str, places: u32, what: &str) -> anyhow::Result<i64> {
    let cleaned = raw.trim().replace(' ', "");
    if cleaned.is_empty() {
        return Err(anyhow!("empty {what}"));
    }
    if cleaned.starts_with('-') {
        return Err(anyhow!("{what} must not be negative: {raw}"));
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    let (whole, frac) = normalized.split_once('.').unwrap_or((normalized.as_str(), ""));
    let width = places as usize;
    if frac.len() > width {
        return Err(anyhow!("too many decimal places in {what}: {raw}"));
    }
    let whole: i64 = whole
        .parse()
        .with_context(|| format!("invalid {what}: {raw}"))?;
    let frac_units: i64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<width$}")
            .parse()
            .with_context(|| format!("invalid {what}: {raw}"))?
    };
    whole
        .checked_mul(10_i64.pow(places))
        .and_then(|units| units.checked_add(frac_units))
        .ok_or_else(|| anyhow!("{what} too large: {raw}"))
}

pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
