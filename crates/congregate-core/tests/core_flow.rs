use std::ffi::OsString;
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use congregate_core::aggregate::{ActiveFilter, occurrences_in_range};
use congregate_core::cache::CalendarService;
use congregate_core::datetime::YearMonth;
use congregate_core::ledger::{Category, CategoryKind, IncomeEntry, monthly_summary};
use congregate_core::model::{CalendarEvent, ChurchSettings, Department, Member, OccurrenceKind};
use congregate_core::pantry::{BeneficiaryFamily, FoodExit};
use congregate_core::store::{DataStore, EntryQuery, EventQuery};
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn run_cli(rc: &Path, data: &Path, args: &[&str]) -> anyhow::Result<()> {
    let mut argv: Vec<OsString> = vec![
        "congregate".into(),
        "--config".into(),
        rc.as_os_str().to_owned(),
        "--data".into(),
        data.as_os_str().to_owned(),
    ];
    argv.extend(args.iter().map(OsString::from));
    congregate_core::run(argv)
}

#[test]
fn stored_rows_aggregate_into_a_june_calendar() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut service = CalendarService::new(&store);

    let louvor = service
        .save_department(Department::new("Louvor".to_string(), Some("bg-blue-500".to_string())), true)
        .expect("save department");

    let mut culto = CalendarEvent::new_recurring("Culto".to_string(), date(2024, 1, 7), 0, None);
    culto.time = Some("19:00".to_string());
    culto.department = Some(louvor.id.clone());
    let culto = service.save_event(culto, true).expect("save culto");

    let mut conferencia = CalendarEvent::new_direct("Conferência".to_string(), date(2024, 6, 9));
    conferencia.id = culto.id.clone();
    conferencia.time = Some("09:00".to_string());
    // same id as the weekly definition: lands in the direct source only
    fs::write(
        store.path_for::<CalendarEvent>(),
        format!(
            "{}\n{}\n",
            serde_json::to_string(&culto).expect("json"),
            serde_json::to_string(&conferencia).expect("json")
        ),
    )
    .expect("write events");

    service
        .save_member(Member::new("Ana".to_string(), Some(date(1990, 6, 9))), true)
        .expect("save member");

    let june = YearMonth::new(2024, 6).expect("month");
    let snapshot = service.month_snapshot(june).expect("snapshot");
    let out = occurrences_in_range(
        &snapshot,
        date(2024, 6, 1),
        date(2024, 6, 30),
        &ActiveFilter::All,
    )
    .expect("aggregate");

    let culto_days: Vec<u32> = out
        .iter()
        .filter(|o| o.title == "Culto")
        .map(|o| o.date.day())
        .collect();
    assert_eq!(culto_days, vec![2, 16, 23, 30]);

    let ninth: Vec<(&str, OccurrenceKind)> = out
        .iter()
        .filter(|o| o.date == date(2024, 6, 9))
        .map(|o| (o.title.as_str(), o.kind))
        .collect();
    assert_eq!(
        ninth,
        vec![("Ana", OccurrenceKind::Birthday), ("Conferência", OccurrenceKind::Event)]
    );

    let by_department = occurrences_in_range(
        &snapshot,
        date(2024, 6, 1),
        date(2024, 6, 30),
        &ActiveFilter::parse(Some("Louvor")),
    )
    .expect("aggregate");
    assert_eq!(by_department.len(), 4);
}

#[test]
fn ledger_summary_from_stored_entries() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut service = CalendarService::new(&store);

    let dizimo = service
        .save_category(Category::new("Dízimo".to_string(), CategoryKind::Income), true)
        .expect("save category");
    for (category_id, cents) in [(dizimo.id.clone(), 10_000), ("gone".to_string(), 500)] {
        service
            .record_income(IncomeEntry {
                id: congregate_core::model::new_id(),
                category_id,
                member_id: None,
                amount_cents: cents,
                date: date(2024, 6, 2),
                description: None,
                campaign_name: None,
            })
            .expect("record income");
    }

    let june = YearMonth::new(2024, 6).expect("month");
    let (income, expenses) = service.ledger_month(june).expect("ledger");
    let categories = service.categories().expect("categories");
    let summary = monthly_summary(&income, &expenses, &categories, june).expect("summary");
    assert_eq!(summary.total_income, 10_500);
    assert_eq!(summary.balance, 10_500);
    assert_eq!(summary.income_by_category[1].name, "Outros");
}

#[test]
fn cli_writes_respect_the_configured_role() {
    let temp = tempdir().expect("tempdir");
    let data = temp.path().join("data");
    let rc = temp.path().join("congregaterc");
    fs::write(&rc, "color = off\n").expect("write rc");

    run_cli(
        &rc,
        &data,
        &["add", "Culto", "de", "domingo", "every:sunday", "time:19:00"],
    )
    .expect("add as admin");
    run_cli(&rc, &data, &["member", "add", "Ana", "birth:1990-06-09"]).expect("add member");

    let store = DataStore::open(&data).expect("open datastore");
    let recurring = store
        .select_events(&EventQuery::recurring())
        .expect("select");
    assert_eq!(recurring.len(), 1);
    assert_eq!(recurring[0].title, "Culto de domingo");
    assert_eq!(recurring[0].recurrence_day, Some(0));
    assert_eq!(recurring[0].time.as_deref(), Some("19:00"));

    let err = run_cli(&rc, &data, &["rc.user.role=viewer", "add", "Ensaio"])
        .expect_err("viewer cannot add");
    assert!(format!("{err:#}").contains("admin role"));

    run_cli(&rc, &data, &["rc.user.role=viewer", "list", "2024-06"]).expect("viewer can read");
    run_cli(&rc, &data, &["export", "events"]).expect("export");
    assert_eq!(store.load::<CalendarEvent>().expect("load").len(), 1);
}

#[test]
fn cli_pantry_keeps_stock_from_going_negative() {
    let temp = tempdir().expect("tempdir");
    let data = temp.path().join("data");
    let rc = temp.path().join("congregaterc");
    fs::write(&rc, "color = off\n").expect("write rc");

    run_cli(&rc, &data, &["family", "add", "Silva", "people:4"]).expect("add family");
    run_cli(&rc, &data, &["donation", "10", "Arroz", "donor:Maria"]).expect("donation");
    run_cli(&rc, &data, &["distribution", "4", "arroz", "family:silva"]).expect("distribution");

    let err = run_cli(&rc, &data, &["distribution", "6.5", "Arroz"])
        .expect_err("only 6 kg left");
    assert!(format!("{err:#}").contains("not enough"));

    let err = run_cli(&rc, &data, &["distribution", "1", "Feijão"])
        .expect_err("never donated");
    assert!(format!("{err:#}").contains("not enough"));

    let store = DataStore::open(&data).expect("open datastore");
    let exits = store
        .select_food_exits(&EntryQuery::default())
        .expect("select exits");
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].quantity_grams, 4_000);
    assert_eq!(exits[0].family_name.as_deref(), Some("Silva"));

    let mut service = CalendarService::new(&store);
    let stock = service.food_inventory().expect("inventory");
    assert_eq!(stock.len(), 1);
    assert_eq!(stock[0].quantity_grams, 6_000);

    let err = run_cli(&rc, &data, &["rc.user.role=viewer", "donation", "1", "Arroz"])
        .expect_err("viewer cannot donate");
    assert!(format!("{err:#}").contains("admin role"));
    run_cli(&rc, &data, &["rc.user.role=viewer", "inventory"]).expect("viewer can read stock");
    run_cli(&rc, &data, &["food", "families"]).expect("family report");
    assert_eq!(store.load::<BeneficiaryFamily>().expect("families").len(), 1);
    assert_eq!(store.load::<FoodExit>().expect("exits").len(), 1);
}

#[test]
fn cli_rejects_huge_values_and_edits_settings() {
    let temp = tempdir().expect("tempdir");
    let data = temp.path().join("data");
    let rc = temp.path().join("congregaterc");
    fs::write(&rc, "color = off\n").expect("write rc");

    assert!(run_cli(&rc, &data, &["upcoming", "days:4000000000"]).is_err());
    let err = run_cli(&rc, &data, &["income", "99999999999999999", "Oferta"])
        .expect_err("amount overflows");
    assert!(format!("{err:#}").contains("too large"));

    run_cli(&rc, &data, &["category", "add", "Missões", "type:expense"]).expect("add category");
    let err = run_cli(&rc, &data, &["category", "modify", "Nada", "description:x"])
        .expect_err("unknown category");
    assert!(format!("{err:#}").contains("Nada"));
    run_cli(&rc, &data, &["category", "modify", "Missões", "description:Viagens"])
        .expect("modify category");

    run_cli(&rc, &data, &["church", "set", "Igreja", "Central", "phone:1234"]).expect("church set");
    run_cli(&rc, &data, &["church", "set", "cnpj:00.000.000/0001-00"]).expect("church update");

    let store = DataStore::open(&data).expect("open datastore");
    let categories = store.load::<Category>().expect("categories");
    let missoes = categories
        .iter()
        .find(|c| c.name == "Missões")
        .expect("category kept its name");
    assert_eq!(missoes.description.as_deref(), Some("Viagens"));

    let church = store
        .church_settings()
        .expect("load church")
        .expect("church saved");
    assert_eq!(church.id, ChurchSettings::ROW_ID);
    assert_eq!(church.name, "Igreja Central");
    assert_eq!(church.phone.as_deref(), Some("1234"));
    assert_eq!(church.cnpj.as_deref(), Some("00.000.000/0001-00"));
}
