use std::any::Any;
use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, trace};

use crate::aggregate::CalendarSnapshot;
use crate::datetime::YearMonth;
use crate::ledger::{Category, ExpenseEntry, IncomeEntry};
use crate::model::{CalendarEvent, ChurchSettings, Department, Member};
use crate::pantry::{BeneficiaryFamily, FoodEntry, FoodExit, FoodStock, ensure_stock_covers, stock_levels};
use crate::store::{DataStore, EntryQuery, EventQuery, MemberQuery};

/// Identity of one cached row set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Departments,
    CalendarEvents(YearMonth),
    RecurringEvents,
    MemberBirthdays,
    Members,
    Categories,
    LedgerMonth(YearMonth),
    FoodInventory,
    FoodEntries(YearMonth),
    FoodExits(YearMonth),
    Families,
    ChurchSettings,
}

/// A successful write, described by what it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Event,
    Department,
    Member,
    LedgerEntry,
    Category,
    FoodEntry,
    FoodExit,
    Family,
    ChurchSettings,
}

impl Mutation {
    pub fn invalidates(self, key: &QueryKey) -> bool {
        match self {
            Self::Event => matches!(
                key,
                QueryKey::CalendarEvents(_) | QueryKey::RecurringEvents
            ),
            Self::Department => matches!(key, QueryKey::Departments),
            Self::Member => matches!(key, QueryKey::MemberBirthdays | QueryKey::Members),
            Self::LedgerEntry => matches!(key, QueryKey::LedgerMonth(_)),
            Self::Category => matches!(key, QueryKey::Categories),
            Self::FoodEntry => matches!(key, QueryKey::FoodEntries(_) | QueryKey::FoodInventory),
            Self::FoodExit => matches!(key, QueryKey::FoodExits(_) | QueryKey::FoodInventory),
            Self::Family => matches!(key, QueryKey::Families),
            Self::ChurchSettings => matches!(key, QueryKey::ChurchSettings),
        }
    }
}

#[derive(Default)]
pub struct QueryCache {
    entries: HashMap<QueryKey, Box<dyn Any>>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached rows for `key`, fetching them on a miss.
    ///
    /// A failed fetch leaves the cache untouched.
    pub fn get_or_fetch<T, F>(&mut self, key: QueryKey, fetch: F) -> anyhow::Result<T>
    where
        T: Clone + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        if let Some(hit) = self
            .entries
            .get(&key)
            .and_then(|cached| cached.downcast_ref::<T>())
        {
            trace!(key = ?key, "cache hit");
            return Ok(hit.clone());
        }

        trace!(key = ?key, "cache miss");
        let rows = fetch()?;
        self.entries.insert(key, Box::new(rows.clone()));
        Ok(rows)
    }

    pub fn invalidate(&mut self, mutation: Mutation) {
        let before = self.entries.len();
        self.entries.retain(|key, _| !mutation.invalidates(key));
        debug!(
            mutation = ?mutation,
            dropped = before - self.entries.len(),
            "invalidated cached queries"
        );
    }
}

/// Fetch-then-compute access to the store, memoized per query key.
#[derive(Debug)]
pub struct CalendarService<'a> {
    store: &'a DataStore,
    cache: QueryCache,
}

impl<'a> CalendarService<'a> {
    pub fn new(store: &'a DataStore) -> Self {
        Self {
            store,
            cache: QueryCache::new(),
        }
    }

    pub fn store(&self) -> &'a DataStore {
        self.store
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn departments(&mut self) -> anyhow::Result<Vec<Department>> {
        let store = self.store;
        self.cache
            .get_or_fetch(QueryKey::Departments, || store.select_departments())
    }

    pub fn members(&mut self) -> anyhow::Result<Vec<Member>> {
        let store = self.store;
        self.cache.get_or_fetch(QueryKey::Members, || {
            store.select_members(&MemberQuery::default())
        })
    }

    pub fn birthday_members(&mut self) -> anyhow::Result<Vec<Member>> {
        let store = self.store;
        self.cache.get_or_fetch(QueryKey::MemberBirthdays, || {
            store.select_members(&MemberQuery::birthdays())
        })
    }

    pub fn recurring_events(&mut self) -> anyhow::Result<Vec<CalendarEvent>> {
        let store = self.store;
        self.cache.get_or_fetch(QueryKey::RecurringEvents, || {
            store.select_events(&EventQuery::recurring())
        })
    }

    pub fn month_events(&mut self, month: YearMonth) -> anyhow::Result<Vec<CalendarEvent>> {
        let store = self.store;
        let (first, last) = (month.first_day()?, month.last_day()?);
        self.cache.get_or_fetch(QueryKey::CalendarEvents(month), || {
            store.select_events(&EventQuery::between(first, last))
        })
    }

    pub fn categories(&mut self) -> anyhow::Result<Vec<Category>> {
        let store = self.store;
        self.cache
            .get_or_fetch(QueryKey::Categories, || store.select_categories(None))
    }

    pub fn ledger_month(
        &mut self,
        month: YearMonth,
    ) -> anyhow::Result<(Vec<IncomeEntry>, Vec<ExpenseEntry>)> {
        let store = self.store;
        let query = month_query(month)?;
        self.cache.get_or_fetch(QueryKey::LedgerMonth(month), || {
            Ok((store.select_income(&query)?, store.select_expenses(&query)?))
        })
    }

    /// Stock per food across all donations and distributions.
    pub fn food_inventory(&mut self) -> anyhow::Result<Vec<FoodStock>> {
        let store = self.store;
        self.cache.get_or_fetch(QueryKey::FoodInventory, || {
            stock_levels(&store.load::<FoodEntry>()?, &store.load::<FoodExit>()?)
        })
    }

    pub fn food_entries(&mut self, month: YearMonth) -> anyhow::Result<Vec<FoodEntry>> {
        let store = self.store;
        let query = month_query(month)?;
        self.cache
            .get_or_fetch(QueryKey::FoodEntries(month), || store.select_food_entries(&query))
    }

    pub fn food_exits(&mut self, month: YearMonth) -> anyhow::Result<Vec<FoodExit>> {
        let store = self.store;
        let query = month_query(month)?;
        self.cache
            .get_or_fetch(QueryKey::FoodExits(month), || store.select_food_exits(&query))
    }

    pub fn families(&mut self) -> anyhow::Result<Vec<BeneficiaryFamily>> {
        let store = self.store;
        self.cache
            .get_or_fetch(QueryKey::Families, || store.select_families())
    }

    pub fn church_settings(&mut self) -> anyhow::Result<Option<ChurchSettings>> {
        let store = self.store;
        self.cache
            .get_or_fetch(QueryKey::ChurchSettings, || store.church_settings())
    }

    /// Every row needed to aggregate `[start, end]`.
    ///
    /// Direct events are fetched month by month so the per-month keys stay
    /// shareable between overlapping windows.
    #[tracing::instrument(skip(self))]
    pub fn snapshot(&mut self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<CalendarSnapshot> {
        let mut direct = Vec::new();
        if start <= end {
            let last = YearMonth::of(end);
            let mut month = YearMonth::of(start);
            while month <= last {
                direct.extend(
                    self.month_events(month)?
                        .into_iter()
                        .filter(|event| event.date >= start && event.date <= end),
                );
                month = month.shift(1);
            }
        }

        Ok(CalendarSnapshot {
            direct,
            recurring: self.recurring_events()?,
            members: self.birthday_members()?,
            departments: self.departments()?,
        })
    }

    pub fn month_snapshot(&mut self, month: YearMonth) -> anyhow::Result<CalendarSnapshot> {
        self.snapshot(month.first_day()?, month.last_day()?)
    }

    fn after_write<T>(&mut self, mutation: Mutation, result: anyhow::Result<T>) -> anyhow::Result<T> {
        let value = result?;
        self.cache.invalidate(mutation);
        Ok(value)
    }

    pub fn save_event(&mut self, event: CalendarEvent, is_new: bool) -> anyhow::Result<CalendarEvent> {
        let result = if is_new {
            self.store.insert(event)
        } else {
            self.store.update(event)
        };
        self.after_write(Mutation::Event, result)
    }

    pub fn delete_event(&mut self, id: &str) -> anyhow::Result<CalendarEvent> {
        let result = self.store.delete::<CalendarEvent>(id);
        self.after_write(Mutation::Event, result)
    }

    pub fn save_department(
        &mut self,
        department: Department,
        is_new: bool,
    ) -> anyhow::Result<Department> {
        let result = if is_new {
            self.store.insert(department)
        } else {
            self.store.update(department)
        };
        self.after_write(Mutation::Department, result)
    }

    pub fn delete_department(&mut self, id: &str) -> anyhow::Result<Department> {
        let result = self.store.delete::<Department>(id);
        self.after_write(Mutation::Department, result)
    }

    pub fn save_member(&mut self, member: Member, is_new: bool) -> anyhow::Result<Member> {
        let result = if is_new {
            self.store.insert(member)
        } else {
            self.store.update(member)
        };
        self.after_write(Mutation::Member, result)
    }

    pub fn delete_member(&mut self, id: &str) -> anyhow::Result<Member> {
        let result = self.store.delete::<Member>(id);
        self.after_write(Mutation::Member, result)
    }

    pub fn save_category(&mut self, category: Category, is_new: bool) -> anyhow::Result<Category> {
        let result = if is_new {
            self.store.insert(category)
        } else {
            self.store.update(category)
        };
        self.after_write(Mutation::Category, result)
    }

    pub fn delete_category(&mut self, id: &str) -> anyhow::Result<Category> {
        let result = self.store.delete::<Category>(id);
        self.after_write(Mutation::Category, result)
    }

    pub fn record_income(&mut self, entry: IncomeEntry) -> anyhow::Result<IncomeEntry> {
        let result = self.store.insert(entry);
        self.after_write(Mutation::LedgerEntry, result)
    }

    pub fn record_expense(&mut self, entry: ExpenseEntry) -> anyhow::Result<ExpenseEntry> {
        let result = self.store.insert(entry);
        self.after_write(Mutation::LedgerEntry, result)
    }

    /// Checks that `foods` keep a non-negative stock once `entries` and
    /// `exits` replace the stored rows.
    fn check_stock(&self, entries: &[FoodEntry], exits: &[FoodExit], foods: &[&str]) -> anyhow::Result<()> {
        ensure_stock_covers(&stock_levels(entries, exits)?, foods)
    }

    #[tracing::instrument(skip(self, entry), fields(id = %entry.id))]
    pub fn save_food_entry(&mut self, entry: FoodEntry, is_new: bool) -> anyhow::Result<FoodEntry> {
        let mut entries = self.store.load::<FoodEntry>()?;
        let exits = self.store.load::<FoodExit>()?;
        let previous = entries
            .iter()
            .position(|row| row.id == entry.id)
            .map(|idx| entries.remove(idx));
        entries.push(entry.clone());
        if let Some(previous) = &previous {
            self.check_stock(&entries, &exits, &[previous.food_name.as_str()])?;
        }

        let result = if is_new {
            self.store.insert(entry)
        } else {
            self.store.update(entry)
        };
        self.after_write(Mutation::FoodEntry, result)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_food_entry(&mut self, id: &str) -> anyhow::Result<FoodEntry> {
        let mut entries = self.store.load::<FoodEntry>()?;
        let exits = self.store.load::<FoodExit>()?;
        if let Some(idx) = entries.iter().position(|row| row.id == id) {
            let removed = entries.remove(idx);
            self.check_stock(&entries, &exits, &[removed.food_name.as_str()])?;
        }
        let result = self.store.delete::<FoodEntry>(id);
        self.after_write(Mutation::FoodEntry, result)
    }

    #[tracing::instrument(skip(self, exit), fields(id = %exit.id))]
    pub fn save_food_exit(&mut self, exit: FoodExit, is_new: bool) -> anyhow::Result<FoodExit> {
        let entries = self.store.load::<FoodEntry>()?;
        let mut exits = self.store.load::<FoodExit>()?;
        exits.retain(|row| row.id != exit.id);
        exits.push(exit.clone());
        self.check_stock(&entries, &exits, &[exit.food_name.as_str()])?;

        let result = if is_new {
            self.store.insert(exit)
        } else {
            self.store.update(exit)
        };
        self.after_write(Mutation::FoodExit, result)
    }

    pub fn delete_food_exit(&mut self, id: &str) -> anyhow::Result<FoodExit> {
        let result = self.store.delete::<FoodExit>(id);
        self.after_write(Mutation::FoodExit, result)
    }

    pub fn save_family(&mut self, family: BeneficiaryFamily, is_new: bool) -> anyhow::Result<BeneficiaryFamily> {
        let result = if is_new {
            self.store.insert(family)
        } else {
            self.store.update(family)
        };
        self.after_write(Mutation::Family, result)
    }

    pub fn delete_family(&mut self, id: &str) -> anyhow::Result<BeneficiaryFamily> {
        let result = self.store.delete::<BeneficiaryFamily>(id);
        self.after_write(Mutation::Family, result)
    }

    pub fn save_church_settings(&mut self, settings: ChurchSettings) -> anyhow::Result<ChurchSettings> {
        let result = self.store.upsert_church_settings(settings);
        self.after_write(Mutation::ChurchSettings, result)
    }
}

fn month_query(month: YearMonth) -> anyhow::Result<EntryQuery> {
    Ok(EntryQuery {
        date_from: Some(month.first_day()?),
        date_to: Some(month.last_day()?),
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn june() -> YearMonth {
        YearMonth::new(2024, 6).expect("month")
    }

    #[test]
    fn mutations_invalidate_their_keys() {
        assert!(Mutation::Event.invalidates(&QueryKey::CalendarEvents(june())));
        assert!(Mutation::Event.invalidates(&QueryKey::RecurringEvents));
        assert!(!Mutation::Event.invalidates(&QueryKey::Departments));
        assert!(Mutation::Member.invalidates(&QueryKey::MemberBirthdays));
        assert!(Mutation::Member.invalidates(&QueryKey::Members));
        assert!(Mutation::LedgerEntry.invalidates(&QueryKey::LedgerMonth(june())));
        assert!(!Mutation::Category.invalidates(&QueryKey::LedgerMonth(june())));
        assert!(Mutation::FoodEntry.invalidates(&QueryKey::FoodEntries(june())));
        assert!(Mutation::FoodEntry.invalidates(&QueryKey::FoodInventory));
        assert!(!Mutation::FoodEntry.invalidates(&QueryKey::FoodExits(june())));
        assert!(Mutation::FoodExit.invalidates(&QueryKey::FoodExits(june())));
        assert!(Mutation::FoodExit.invalidates(&QueryKey::FoodInventory));
        assert!(!Mutation::FoodExit.invalidates(&QueryKey::Families));
        assert!(Mutation::Family.invalidates(&QueryKey::Families));
        assert!(!Mutation::Family.invalidates(&QueryKey::FoodInventory));
        assert!(Mutation::ChurchSettings.invalidates(&QueryKey::ChurchSettings));
        assert!(!Mutation::ChurchSettings.invalidates(&QueryKey::Categories));
    }

    #[test]
    fn failed_fetch_is_not_cached() {
        let mut cache = QueryCache::new();
        let err = cache.get_or_fetch::<Vec<Department>, _>(QueryKey::Departments, || {
            Err(anyhow::anyhow!("store offline"))
        });
        assert!(err.is_err());
        assert!(cache.is_empty());

        let mut calls = 0;
        for _ in 0..2 {
            let rows = cache
                .get_or_fetch(QueryKey::Departments, || {
                    calls += 1;
                    Ok(Vec::<Department>::new())
                })
                .expect("fetch");
            assert!(rows.is_empty());
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn saving_an_event_refreshes_the_snapshot() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let mut service = CalendarService::new(&store);

        let empty = service.month_snapshot(june()).expect("snapshot");
        assert!(empty.direct.is_empty());
        assert!(service.cache().contains(&QueryKey::CalendarEvents(june())));

        service
            .save_event(CalendarEvent::new_direct("Ceia".to_string(), date(2024, 6, 2)), true)
            .expect("save");
        assert!(!service.cache().contains(&QueryKey::CalendarEvents(june())));
        assert!(service.cache().contains(&QueryKey::Departments));

        let refreshed = service.month_snapshot(june()).expect("snapshot");
        assert_eq!(refreshed.direct.len(), 1);
    }

    #[test]
    fn pantry_writes_refresh_inventory_and_guard_stock() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let mut service = CalendarService::new(&store);

        let donation = service
            .save_food_entry(FoodEntry::new("Arroz".to_string(), 10_000, date(2024, 6, 1)), true)
            .expect("donate");
        assert_eq!(service.food_inventory().expect("stock")[0].quantity_grams, 10_000);
        assert_eq!(service.food_entries(june()).expect("entries").len(), 1);
        service.families().expect("families");
        assert!(service.cache().contains(&QueryKey::FoodInventory));

        service
            .save_food_exit(FoodExit::new("arroz".to_string(), 4_000, date(2024, 6, 5)), true)
            .expect("distribute");
        assert!(!service.cache().contains(&QueryKey::FoodInventory));
        assert!(service.cache().contains(&QueryKey::FoodEntries(june())));
        assert!(service.cache().contains(&QueryKey::Families));
        assert_eq!(service.food_inventory().expect("stock")[0].quantity_grams, 6_000);

        let err = service
            .save_food_exit(FoodExit::new("Arroz".to_string(), 6_001, date(2024, 6, 6)), true)
            .expect_err("overdrawn");
        assert!(err.to_string().contains("not enough Arroz"));
        assert!(service.cache().contains(&QueryKey::FoodInventory));
        assert_eq!(store.load::<FoodExit>().expect("load").len(), 1);

        let mut smaller = donation.clone();
        smaller.quantity_grams = 3_000;
        assert!(service.save_food_entry(smaller, false).is_err());
        assert!(service.delete_food_entry(&donation.id).is_err());
        assert_eq!(service.food_exits(june()).expect("exits").len(), 1);
    }

    #[test]
    fn category_edits_invalidate_categories() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let mut service = CalendarService::new(&store);
        let mut oferta = service
            .save_category(Category::new("Oferta".to_string(), crate::ledger::CategoryKind::Income), true)
            .expect("save");
        assert_eq!(service.categories().expect("categories")[0].name, "Oferta");

        oferta.name = "Ofertas".to_string();
        service.save_category(oferta, false).expect("update");
        assert!(!service.cache().contains(&QueryKey::Categories));
        assert_eq!(service.categories().expect("categories")[0].name, "Ofertas");

        let settings = service
            .save_church_settings(ChurchSettings::new("Igreja Central".to_string()))
            .expect("settings");
        assert_eq!(service.church_settings().expect("settings"), Some(settings));
    }

    #[test]
    fn snapshot_spans_month_boundaries() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let mut service = CalendarService::new(&store);
        service
            .save_event(CalendarEvent::new_direct("Fim".to_string(), date(2024, 5, 30)), true)
            .expect("save");
        service
            .save_event(CalendarEvent::new_direct("Início".to_string(), date(2024, 6, 3)), true)
            .expect("save");
        service
            .save_event(CalendarEvent::new_direct("Fora".to_string(), date(2024, 6, 20)), true)
            .expect("save");

        let snapshot = service
            .snapshot(date(2024, 5, 26), date(2024, 6, 8))
            .expect("snapshot");
        let titles: Vec<&str> = snapshot.direct.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Fim", "Início"]);
    }
}
