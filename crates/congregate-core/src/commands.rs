use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::aggregate::ActiveFilter;
use crate::cache::CalendarService;
use crate::cli::Invocation;
use crate::config::{AppRole, Config};
use crate::datetime::{resolve_timezone, today_in};
use crate::ledger::{Category, ExpenseEntry, IncomeEntry};
use crate::model::{CalendarEvent, ChurchSettings, Department, Member};
use crate::pantry::{BeneficiaryFamily, FoodEntry, FoodExit};
use crate::render::Renderer;
use crate::store::{DataStore, Record};

mod calendar;
mod finance;
mod pantry;
mod records;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "month",
        "list",
        "year",
        "day",
        "upcoming",
        "birthdays",
        "recurring",
        "add",
        "modify",
        "delete",
        "departments",
        "department",
        "members",
        "member",
        "ledger",
        "report",
        "recent",
        "income",
        "expense",
        "categories",
        "category",
        "inventory",
        "food",
        "donation",
        "distribution",
        "families",
        "family",
        "church",
        "export",
        "show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Whether `command` writes to the store.
pub fn requires_admin(command: &str, args: &[String]) -> bool {
    match command {
        "add" | "modify" | "delete" | "income" | "expense" | "donation" | "distribution" => true,
        "department" | "member" | "category" | "family" => args
            .first()
            .is_some_and(|action| matches!(action.as_str(), "add" | "modify" | "delete")),
        "church" => args.first().is_some_and(|action| action == "set"),
        _ => false,
    }
}

fn ensure_allowed(role: AppRole, command: &str, args: &[String]) -> anyhow::Result<()> {
    if requires_admin(command, args) && !role.can_write() {
        return Err(anyhow!(
            "{command} requires the admin role (current role: {})",
            role.as_str()
        ));
    }
    Ok(())
}

/// State shared by one command run.
pub struct Session<'a> {
    pub service: CalendarService<'a>,
    pub cfg: &'a Config,
    pub renderer: &'a Renderer,
    pub today: NaiveDate,
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let known = known_command_names();
    let command = expand_command_abbrev(inv.command.as_str(), &known)
        .ok_or_else(|| anyhow!("unknown command: {}", inv.command))?;
    let role = cfg.role()?;

    debug!(
        command,
        selectors = ?inv.selectors,
        args = ?inv.command_args,
        role = role.as_str(),
        "dispatching command"
    );
    ensure_allowed(role, command, &inv.command_args)?;

    let today = today_in(resolve_timezone(cfg.timezone().as_deref()));
    let mut session = Session {
        service: CalendarService::new(store),
        cfg,
        renderer,
        today,
    };
    let selectors = inv.selectors.as_slice();
    let args = inv.command_args.as_slice();

    match command {
        "month" => calendar::cmd_month(&mut session, args),
        "list" => calendar::cmd_list(&mut session, args),
        "year" => calendar::cmd_year(&mut session, args),
        "day" => calendar::cmd_day(&mut session, args),
        "upcoming" => calendar::cmd_upcoming(&mut session, args),
        "birthdays" => calendar::cmd_birthdays(&mut session, args),
        "recurring" => calendar::cmd_recurring(&mut session),
        "add" => records::cmd_add(&mut session, args),
        "modify" => records::cmd_modify(&mut session, selectors, args),
        "delete" => records::cmd_delete(&mut session, selectors, args),
        "departments" => records::cmd_departments(&mut session),
        "department" => records::cmd_department(&mut session, selectors, args),
        "members" => records::cmd_members(&mut session, args),
        "member" => records::cmd_member(&mut session, selectors, args),
        "ledger" => finance::cmd_ledger(&mut session, args),
        "report" => finance::cmd_report(&mut session, args),
        "recent" => finance::cmd_recent(&mut session, args),
        "income" => finance::cmd_income(&mut session, args),
        "expense" => finance::cmd_expense(&mut session, args),
        "categories" => finance::cmd_categories(&mut session, args),
        "category" => finance::cmd_category(&mut session, selectors, args),
        "inventory" => pantry::cmd_inventory(&mut session),
        "food" => pantry::cmd_food(&mut session, args),
        "donation" => pantry::cmd_donation(&mut session, selectors, args),
        "distribution" => pantry::cmd_distribution(&mut session, selectors, args),
        "families" => pantry::cmd_families(&mut session, args),
        "family" => pantry::cmd_family(&mut session, selectors, args),
        "church" => records::cmd_church(&mut session, args),
        "export" => cmd_export(store, args),
        "show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn export_table<R: Record>(store: &DataStore) -> anyhow::Result<Value> {
    let rows = store.load::<R>()?;
    serde_json::to_value(rows).with_context(|| format!("failed to serialize {}", R::TABLE))
}

/// Table contents as JSON; `all` wraps every table in one object.
pub fn export_json(store: &DataStore, table: &str) -> anyhow::Result<Value> {
    match table {
        "events" => export_table::<CalendarEvent>(store),
        "members" => export_table::<Member>(store),
        "departments" => export_table::<Department>(store),
        "categories" => export_table::<Category>(store),
        "income" => export_table::<IncomeEntry>(store),
        "expenses" => export_table::<ExpenseEntry>(store),
        "food_entries" => export_table::<FoodEntry>(store),
        "food_exits" => export_table::<FoodExit>(store),
        "families" => export_table::<BeneficiaryFamily>(store),
        "church" => export_table::<ChurchSettings>(store),
        "all" => Ok(json!({
            "events": export_table::<CalendarEvent>(store)?,
            "members": export_table::<Member>(store)?,
            "departments": export_table::<Department>(store)?,
            "categories": export_table::<Category>(store)?,
            "income": export_table::<IncomeEntry>(store)?,
            "expenses": export_table::<ExpenseEntry>(store)?,
            "food_entries": export_table::<FoodEntry>(store)?,
            "food_exits": export_table::<FoodExit>(store)?,
            "families": export_table::<BeneficiaryFamily>(store)?,
            "church": export_table::<ChurchSettings>(store)?,
        })),
        other => Err(anyhow!(
            "unknown table: {other} (expected events, members, departments, categories, income, \
             expenses, food_entries, food_exits, families, church or all)"
        )),
    }
}

#[instrument(skip(store, args))]
fn cmd_export(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    info!("command export");
    let table = args.first().map(String::as_str).unwrap_or("all");
    let out = serde_json::to_string(&export_json(store, table)?)?;
    println!("{out}");
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let sorted: BTreeMap<&String, &String> = cfg.iter().collect();
    for (k, v) in sorted {
        println!("{k}={v}");
    }
    for file in &cfg.loaded_files {
        println!("# loaded {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Calendar: month [MONTH], list [MONTH], year [YEAR], day [DATE], upcoming [days:N], birthdays [MONTH], recurring
  view filters: filter:all | filter:birthdays | filter:DEPARTMENT
Events: add TITLE date:DATE time:HH:MM dept:DEPT type:TYPE desc:TEXT every:WEEKDAY year:YYYY
        ID modify ..., ID delete
People: departments, department add|modify|delete|ID, members [active], member add|modify|delete|ID
Ledger: ledger [MONTH], report [YEAR], recent [limit:N], income AMOUNT category:CAT, expense AMOUNT category:CAT,
        categories [income|expense], category add|modify|delete
Social action: inventory, food [families] [MONTH], donation KG FOOD donor:NAME,
        distribution KG FOOD family:FAMILY, donation|distribution modify|delete ID,
        families [active], family add|modify|delete|ID
Other: church [set name:NAME cnpj:CNPJ address:TEXT phone:PHONE], export [TABLE|all], show, help, version"
    );
    Ok(())
}

/// Free words plus recognised `key:value` modifiers from a command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub words: Vec<String>,
    values: BTreeMap<String, String>,
}

fn canonical_key(key: &str) -> &str {
    match key {
        "dept" => "department",
        "desc" => "description",
        "birth" | "birthday" | "born" => "birth_date",
        "cat" => "category",
        "kind" => "type",
        "qty" | "kg" => "quantity",
        "size" => "people",
        other => other,
    }
}

impl Modifiers {
    /// Tokens after `--` are always words. A `key:value` token whose key is not
    /// in `allowed` is kept as a word.
    #[instrument(skip(args))]
    pub fn parse(args: &[String], allowed: &[&str]) -> anyhow::Result<Self> {
        let mut out = Self::default();
        let mut literal = false;
        for arg in args {
            if arg == "--" {
                literal = true;
                continue;
            }

            if !literal && let Some((key, value)) = arg.split_once(':') {
                let key = canonical_key(&key.to_ascii_lowercase()).to_string();
                if allowed.contains(&key.as_str()) {
                    if out.values.insert(key.clone(), value.trim().to_string()).is_some() {
                        return Err(anyhow!("modifier {key} given more than once"));
                    }
                    continue;
                }
                if !value.is_empty() && key.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                    warn!(arg = %arg, "unrecognized modifier kept as text");
                }
            }

            out.words.push(arg.clone());
        }
        Ok(out)
    }

    pub fn text(&self) -> Option<String> {
        let joined = self.words.join(" ");
        let trimmed = joined.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    pub fn take(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.values.is_empty()
    }

    /// The view filter from `filter:` or `department:`.
    pub fn take_filter(&mut self) -> ActiveFilter {
        let raw = self.take("filter").or_else(|| self.take("department"));
        ActiveFilter::parse(raw.as_deref())
    }
}

/// An empty modifier value clears the field.
pub(crate) fn optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub(crate) fn parse_flag(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Ok(true),
        "0" | "n" | "no" | "off" | "false" => Ok(false),
        other => Err(anyhow!("invalid {key}: {other} (expected yes or no)")),
    }
}

/// The row id a command acts on: the selector written before the command, or
/// else the first argument.
pub(crate) fn take_target<'a>(
    selectors: &[String],
    args: &'a [String],
    command: &str,
) -> anyhow::Result<(String, &'a [String])> {
    match selectors {
        [] => args
            .split_first()
            .map(|(id, rest)| (id.clone(), rest))
            .ok_or_else(|| anyhow!("{command}: an id is required")),
        [id] => Ok((id.clone(), args)),
        _ => Err(anyhow!("{command}: one id at a time")),
    }
}

/// Finds a row by exact id, case-insensitive name, or unique id prefix.
pub(crate) fn find_by_ref<'a, T>(
    rows: &'a [T],
    reference: &str,
    what: &str,
    id: impl Fn(&T) -> &str,
    name: impl Fn(&T) -> &str,
) -> anyhow::Result<&'a T> {
    let reference = reference.trim();
    if let Some(row) = rows.iter().find(|row| id(row) == reference) {
        return Ok(row);
    }
    if let Some(row) = rows
        .iter()
        .find(|row| name(row).eq_ignore_ascii_case(reference))
    {
        return Ok(row);
    }
    let mut prefixed = rows.iter().filter(|row| id(row).starts_with(reference));
    match (prefixed.next(), prefixed.next()) {
        (Some(row), None) if !reference.is_empty() => Ok(row),
        (Some(_), Some(_)) => Err(anyhow!("ambiguous {what}: {reference}")),
        _ => Err(anyhow!("unknown {what}: {reference}")),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn abbreviations_must_be_unique() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("upc", &known), Some("upcoming"));
        assert_eq!(expand_command_abbrev("department", &known), Some("department"));
        assert_eq!(expand_command_abbrev("rec", &known), None);
        assert_eq!(expand_command_abbrev("mo", &known), None);
    }

    #[test]
    fn viewers_cannot_write() {
        assert!(requires_admin("add", &[]));
        assert!(requires_admin("member", &strings(&["add", "Ana"])));
        assert!(!requires_admin("member", &strings(&["ana"])));
        assert!(!requires_admin("month", &[]));
        assert!(requires_admin("donation", &strings(&["5", "Arroz"])));
        assert!(requires_admin("family", &strings(&["modify", "Silva"])));
        assert!(!requires_admin("family", &strings(&["Silva"])));
        assert!(requires_admin("church", &strings(&["set", "name:Central"])));
        assert!(!requires_admin("church", &[]));
        assert!(requires_admin("category", &strings(&["modify", "Oferta"])));
        assert!(ensure_allowed(AppRole::Viewer, "income", &[]).is_err());
        assert!(ensure_allowed(AppRole::Viewer, "ledger", &[]).is_ok());
        assert!(ensure_allowed(AppRole::Admin, "delete", &[]).is_ok());
    }

    #[test]
    fn modifiers_split_known_keys_from_text() {
        let args = strings(&["Culto:", "de", "jovens", "time:19:30", "dept:Jovens", "--", "date:not-a-mod"]);
        let mut mods = Modifiers::parse(&args, &["time", "department", "date"]).expect("parse");
        assert_eq!(mods.text().as_deref(), Some("Culto: de jovens date:not-a-mod"));
        assert_eq!(mods.take("time").as_deref(), Some("19:30"));
        assert_eq!(mods.take("department").as_deref(), Some("Jovens"));
        assert_eq!(mods.take("date"), None);

        assert!(Modifiers::parse(&strings(&["time:1", "time:2"]), &["time"]).is_err());
    }

    #[test]
    fn target_comes_from_selector_or_first_arg() {
        let args = strings(&["abc", "time:10:00"]);
        let (id, rest) = take_target(&[], &args, "modify").expect("target");
        assert_eq!(id, "abc");
        assert_eq!(rest, &args[1..]);

        let (id, rest) = take_target(&strings(&["xyz"]), &args, "modify").expect("target");
        assert_eq!(id, "xyz");
        assert_eq!(rest.len(), 2);

        assert!(take_target(&[], &[], "delete").is_err());
    }

    #[test]
    fn references_resolve_by_id_name_or_prefix() {
        let mut louvor = Department::new("Louvor".to_string(), None);
        louvor.id = "d-100".to_string();
        let mut jovens = Department::new("Jovens".to_string(), None);
        jovens.id = "d-200".to_string();
        let rows = vec![louvor, jovens];
        let by = |reference: &str| {
            find_by_ref(&rows, reference, "department", |d| d.id.as_str(), |d| d.name.as_str())
                .map(|d| d.name.clone())
        };
        assert_eq!(by("d-100").expect("id"), "Louvor");
        assert_eq!(by("jovens").expect("name"), "Jovens");
        assert_eq!(by("d-2").expect("prefix"), "Jovens");
        assert!(by("d-").is_err());
        assert!(by("Missões").is_err());
    }

    #[test]
    fn export_all_wraps_every_table() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        store
            .insert(Member::new("Ana".to_string(), None))
            .expect("insert");
        let all = export_json(&store, "all").expect("export");
        assert_eq!(all["members"].as_array().map(Vec::len), Some(1));
        assert_eq!(all["events"].as_array().map(Vec::len), Some(0));
        assert_eq!(all["food_exits"].as_array().map(Vec::len), Some(0));
        assert!(export_json(&store, "tasks").is_err());
    }
}
