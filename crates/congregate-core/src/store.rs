use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::ledger::{Category, CategoryKind, ExpenseEntry, IncomeEntry, MAX_AMOUNT_CENTS};
use crate::model::{CalendarEvent, ChurchSettings, Department, Member};
use crate::pantry::{BeneficiaryFamily, FoodEntry, FoodExit, MAX_QUANTITY_GRAMS};
use crate::recurrence::RecurrenceRule;

/// A row type stored in one table file.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const TABLE: &'static str;

    fn id(&self) -> &str;

    /// Rejects rows that parse but violate the row's invariants.
    fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn require_text(field: &str, value: &str) -> anyhow::Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{field} must not be empty"));
    }
    Ok(())
}

fn require_amount(what: &str, id: &str, cents: i64) -> anyhow::Result<()> {
    if cents < 0 {
        return Err(anyhow!("{what} {id} has a negative amount"));
    }
    if cents > MAX_AMOUNT_CENTS {
        return Err(anyhow!("{what} {id} amount exceeds {MAX_AMOUNT_CENTS} cents"));
    }
    Ok(())
}

impl Record for CalendarEvent {
    const TABLE: &'static str = "events";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_text("title", &self.title)?;
        if self.is_recurring {
            RecurrenceRule::from_event(self)?;
        } else if self.recurrence_day.is_some() {
            return Err(anyhow!(
                "event {} has recurrence_day but is not recurring",
                self.id
            ));
        }
        Ok(())
    }
}

impl Record for Member {
    const TABLE: &'static str = "members";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_text("name", &self.name)
    }
}

impl Record for Department {
    const TABLE: &'static str = "departments";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_text("name", &self.name)
    }
}

impl Record for Category {
    const TABLE: &'static str = "categories";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_text("name", &self.name)
    }
}

impl Record for IncomeEntry {
    const TABLE: &'static str = "income";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_amount("income", &self.id, self.amount_cents)
    }
}

impl Record for ExpenseEntry {
    const TABLE: &'static str = "expenses";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_amount("expense", &self.id, self.amount_cents)
    }
}

fn require_quantity(what: &str, id: &str, grams: i64) -> anyhow::Result<()> {
    if grams <= 0 {
        return Err(anyhow!("{what} {id} must have a positive quantity"));
    }
    if grams > MAX_QUANTITY_GRAMS {
        return Err(anyhow!("{what} {id} quantity exceeds {MAX_QUANTITY_GRAMS} grams"));
    }
    Ok(())
}

impl Record for FoodEntry {
    const TABLE: &'static str = "food_entries";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_text("food_name", &self.food_name)?;
        require_quantity("food entry", &self.id, self.quantity_grams)
    }
}

impl Record for FoodExit {
    const TABLE: &'static str = "food_exits";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_text("food_name", &self.food_name)?;
        require_quantity("food exit", &self.id, self.quantity_grams)
    }
}

impl Record for BeneficiaryFamily {
    const TABLE: &'static str = "families";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_text("family_name", &self.family_name)
    }
}

impl Record for ChurchSettings {
    const TABLE: &'static str = "church";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> anyhow::Result<()> {
        require_text("id", &self.id)?;
        require_text("name", &self.name)
    }
}

/// `gte`/`lte` on the event date and equality on `is_recurring`.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub is_recurring: Option<bool>,
}

impl EventQuery {
    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            date_from: Some(from),
            date_to: Some(to),
            is_recurring: None,
        }
    }

    pub fn recurring() -> Self {
        Self {
            is_recurring: Some(true),
            ..Self::default()
        }
    }

    fn matches(&self, event: &CalendarEvent) -> bool {
        self.date_from.is_none_or(|from| event.date >= from)
            && self.date_to.is_none_or(|to| event.date <= to)
            && self.is_recurring.is_none_or(|flag| event.is_recurring == flag)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemberQuery {
    pub active_only: bool,
    pub with_birth_date: bool,
}

impl MemberQuery {
    pub fn birthdays() -> Self {
        Self {
            active_only: true,
            with_birth_date: true,
        }
    }
}

/// Date-range filter for ledger entries.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl EntryQuery {
    fn matches(&self, date: NaiveDate) -> bool {
        self.date_from.is_none_or(|from| date >= from) && self.date_to.is_none_or(|to| date <= to)
    }
}

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
}

const TABLES: [&str; 10] = [
    CalendarEvent::TABLE,
    Member::TABLE,
    Department::TABLE,
    Category::TABLE,
    IncomeEntry::TABLE,
    ExpenseEntry::TABLE,
    FoodEntry::TABLE,
    FoodExit::TABLE,
    BeneficiaryFamily::TABLE,
    ChurchSettings::TABLE,
];

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        for table in TABLES {
            let path = table_path(&data_dir, table);
            if !path.exists() {
                fs::write(&path, "")
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }

        info!(data_dir = %data_dir.display(), "opened datastore");

        Ok(Self { data_dir })
    }

    pub fn path_for<R: Record>(&self) -> PathBuf {
        table_path(&self.data_dir, R::TABLE)
    }

    #[tracing::instrument(skip(self), fields(table = R::TABLE))]
    pub fn load<R: Record>(&self) -> anyhow::Result<Vec<R>> {
        load_jsonl(&self.path_for::<R>()).with_context(|| format!("failed to load {}.data", R::TABLE))
    }

    #[tracing::instrument(skip(self, rows), fields(table = R::TABLE))]
    pub fn save<R: Record>(&self, rows: &[R]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.path_for::<R>(), rows)
            .with_context(|| format!("failed to save {}.data", R::TABLE))
    }

    pub fn find<R: Record>(&self, id: &str) -> anyhow::Result<Option<R>> {
        Ok(self.load::<R>()?.into_iter().find(|row| row.id() == id))
    }

    /// Resolves a full id from a unique prefix.
    pub fn resolve_id<R: Record>(&self, prefix: &str) -> anyhow::Result<String> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(anyhow!("empty {} id", R::TABLE));
        }
        let rows = self.load::<R>()?;
        if let Some(row) = rows.iter().find(|row| row.id() == prefix) {
            return Ok(row.id().to_string());
        }
        let mut matches = rows.iter().filter(|row| row.id().starts_with(prefix));
        let first = matches
            .next()
            .ok_or_else(|| anyhow!("no {} row with id {prefix}", R::TABLE))?;
        if matches.next().is_some() {
            return Err(anyhow!("ambiguous {} id prefix: {prefix}", R::TABLE));
        }
        Ok(first.id().to_string())
    }

    #[tracing::instrument(skip(self, row), fields(table = R::TABLE, id = %row.id()))]
    pub fn insert<R: Record>(&self, row: R) -> anyhow::Result<R> {
        row.validate()?;
        let mut rows = self.load::<R>()?;
        if rows.iter().any(|existing| existing.id() == row.id()) {
            return Err(anyhow!("duplicate {} id: {}", R::TABLE, row.id()));
        }
        rows.push(row.clone());
        self.save(&rows)?;
        Ok(row)
    }

    #[tracing::instrument(skip(self, row), fields(table = R::TABLE, id = %row.id()))]
    pub fn update<R: Record>(&self, row: R) -> anyhow::Result<R> {
        row.validate()?;
        let mut rows = self.load::<R>()?;
        let slot = rows
            .iter_mut()
            .find(|existing| existing.id() == row.id())
            .ok_or_else(|| anyhow!("{} row not found: {}", R::TABLE, row.id()))?;
        *slot = row.clone();
        self.save(&rows)?;
        Ok(row)
    }

    #[tracing::instrument(skip(self), fields(table = R::TABLE))]
    pub fn delete<R: Record>(&self, id: &str) -> anyhow::Result<R> {
        let mut rows = self.load::<R>()?;
        let idx = rows
            .iter()
            .position(|row| row.id() == id)
            .ok_or_else(|| anyhow!("{} row not found: {id}", R::TABLE))?;
        let removed = rows.remove(idx);
        self.save(&rows)?;
        info!(id, "deleted row");
        Ok(removed)
    }

    /// Events ordered by date then time.
    #[tracing::instrument(skip(self))]
    pub fn select_events(&self, query: &EventQuery) -> anyhow::Result<Vec<CalendarEvent>> {
        let mut rows: Vec<CalendarEvent> = self
            .load::<CalendarEvent>()?
            .into_iter()
            .filter(|event| query.matches(event))
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.sort_time().cmp(b.sort_time())));
        debug!(count = rows.len(), "selected events");
        Ok(rows)
    }

    /// Members ordered by name.
    #[tracing::instrument(skip(self))]
    pub fn select_members(&self, query: &MemberQuery) -> anyhow::Result<Vec<Member>> {
        let mut rows: Vec<Member> = self
            .load::<Member>()?
            .into_iter()
            .filter(|member| !query.active_only || member.is_active)
            .filter(|member| !query.with_birth_date || member.birth_date.is_some())
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    #[tracing::instrument(skip(self))]
    pub fn select_departments(&self) -> anyhow::Result<Vec<Department>> {
        let mut rows = self.load::<Department>()?;
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    #[tracing::instrument(skip(self))]
    pub fn select_categories(&self, kind: Option<CategoryKind>) -> anyhow::Result<Vec<Category>> {
        let mut rows: Vec<Category> = self
            .load::<Category>()?
            .into_iter()
            .filter(|category| kind.is_none_or(|k| category.kind == k))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    /// Income entries, newest first.
    #[tracing::instrument(skip(self))]
    pub fn select_income(&self, query: &EntryQuery) -> anyhow::Result<Vec<IncomeEntry>> {
        let mut rows: Vec<IncomeEntry> = self
            .load::<IncomeEntry>()?
            .into_iter()
            .filter(|entry| query.matches(entry.date))
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(rows)
    }

    /// Expense entries, newest first.
    #[tracing::instrument(skip(self))]
    pub fn select_expenses(&self, query: &EntryQuery) -> anyhow::Result<Vec<ExpenseEntry>> {
        let mut rows: Vec<ExpenseEntry> = self
            .load::<ExpenseEntry>()?
            .into_iter()
            .filter(|entry| query.matches(entry.date))
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(rows)
    }

    /// Donations, newest first.
    #[tracing::instrument(skip(self))]
    pub fn select_food_entries(&self, query: &EntryQuery) -> anyhow::Result<Vec<FoodEntry>> {
        let mut rows: Vec<FoodEntry> = self
            .load::<FoodEntry>()?
            .into_iter()
            .filter(|entry| query.matches(entry.date))
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(rows)
    }

    /// Distributions, newest first.
    #[tracing::instrument(skip(self))]
    pub fn select_food_exits(&self, query: &EntryQuery) -> anyhow::Result<Vec<FoodExit>> {
        let mut rows: Vec<FoodExit> = self
            .load::<FoodExit>()?
            .into_iter()
            .filter(|exit| query.matches(exit.date))
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(rows)
    }

    #[tracing::instrument(skip(self))]
    pub fn select_families(&self) -> anyhow::Result<Vec<BeneficiaryFamily>> {
        let mut rows = self.load::<BeneficiaryFamily>()?;
        rows.sort_by(|a, b| a.family_name.cmp(&b.family_name));
        Ok(rows)
    }

    pub fn church_settings(&self) -> anyhow::Result<Option<ChurchSettings>> {
        self.find::<ChurchSettings>(ChurchSettings::ROW_ID)
    }

    /// Inserts or replaces the single settings row.
    #[tracing::instrument(skip(self, settings))]
    pub fn upsert_church_settings(&self, mut settings: ChurchSettings) -> anyhow::Result<ChurchSettings> {
        settings.id = ChurchSettings::ROW_ID.to_string();
        settings.validate()?;
        self.save(std::slice::from_ref(&settings))?;
        Ok(settings)
    }
}

fn table_path(data_dir: &Path, table: &str) -> PathBuf {
    data_dir.join(format!("{table}.data"))
}

/// Rows that fail to parse or validate are logged and skipped.
#[tracing::instrument(skip(path))]
fn load_jsonl<R: Record>(path: &Path) -> anyhow::Result<Vec<R>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: R = match serde_json::from_str(trimmed) {
            Ok(row) => row,
            Err(err) => {
                warn!(
                    file = %path.display(),
                    line = idx + 1,
                    error = %err,
                    "skipping malformed row"
                );
                continue;
            }
        };
        if let Err(err) = row.validate() {
            warn!(
                file = %path.display(),
                line = idx + 1,
                error = %err,
                "skipping invalid row"
            );
            continue;
        }
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic<R: Record>(path: &Path, rows: &[R]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
