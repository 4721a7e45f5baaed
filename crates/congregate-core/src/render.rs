use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::aggregate::{DayItems, MonthAgenda, department_for};
use crate::birthday::{age_on, next_birthday};
use crate::config::Config;
use crate::datetime::weekday_label;
use crate::grid::{MonthGrid, is_weekend};
use crate::ledger::{
    Category, CategoryTotal, EntryKind, LedgerEntry, LedgerSummary, MonthlyReport, UNCATEGORIZED,
    format_amount,
};
use crate::model::{
    CalendarEvent, ChurchSettings, Department, Member, OccurrenceKind, ProjectedOccurrence,
};
use crate::pantry::{
    BeneficiaryFamily, FamilyDistribution, FoodExit, FoodStock, PantryMonth, family_counts,
    format_kilograms,
};
use crate::recurrence::RecurrenceRule;

/// Per-day cell decoration for calendar grids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayMark {
    pub count: usize,
    pub color: String,
}

pub type DayMarks = HashMap<NaiveDate, DayMark>;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, grid, marks))]
    pub fn print_month_grid(
        &self,
        grid: &MonthGrid,
        marks: &DayMarks,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        self.write_month_grid(io::stdout().lock(), grid, marks, today)
    }

    pub fn write_month_grid<W: Write>(
        &self,
        mut out: W,
        grid: &MonthGrid,
        marks: &DayMarks,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let title = grid.month.first_day()?.format("%B %Y").to_string();
        let width = 7 * 5 - 1;
        writeln!(out, "{:^width$}", title)?;
        let labels: Vec<String> = grid
            .week_start
            .labels()
            .iter()
            .map(|label| format!("{label:>3} "))
            .collect();
        writeln!(out, "{}", labels.join(" ").trim_end())?;

        for week in grid.weeks() {
            let mut cells = Vec::with_capacity(7);
            for cell in week {
                let day = format!("{:>3}", cell.date.format("%-d"));
                let day = if !cell.in_month {
                    self.paint(&day, "90")
                } else if cell.date == today {
                    self.paint(&day, "7")
                } else if is_weekend(cell.date) {
                    self.paint(&day, "36")
                } else {
                    day
                };
                let marker = match marks.get(&cell.date) {
                    Some(mark) if cell.in_month => {
                        let symbol = if mark.count > 1 { "+" } else { "*" };
                        self.paint(symbol, color_code(&mark.color))
                    }
                    _ => " ".to_string(),
                };
                cells.push(format!("{day}{marker}"));
            }
            writeln!(out, "{}", cells.join(" "))?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, months, marks))]
    pub fn print_year(&self, year: i32, months: &[MonthGrid], marks: &DayMarks) -> anyhow::Result<()> {
        self.write_year(io::stdout().lock(), year, months, marks)
    }

    pub fn write_year<W: Write>(
        &self,
        mut out: W,
        year: i32,
        months: &[MonthGrid],
        marks: &DayMarks,
    ) -> anyhow::Result<()> {
        writeln!(out, "{year:^71}")?;
        for row in months.chunks(3) {
            writeln!(out)?;
            let blocks: Vec<Vec<String>> = row
                .iter()
                .map(|grid| self.mini_month_lines(grid, marks))
                .collect::<anyhow::Result<_>>()?;
            let height = blocks.iter().map(Vec::len).max().unwrap_or(0);
            for line in 0..height {
                let parts: Vec<String> = blocks
                    .iter()
                    .map(|block| {
                        let text = block.get(line).cloned().unwrap_or_default();
                        pad_visible(&text, 21)
                    })
                    .collect();
                writeln!(out, "{}", parts.join("  ").trim_end())?;
            }
        }
        Ok(())
    }

    fn mini_month_lines(&self, grid: &MonthGrid, marks: &DayMarks) -> anyhow::Result<Vec<String>> {
        let mut lines = vec![
            format!("{:^21}", grid.month.first_day()?.format("%B").to_string()),
            grid.week_start
                .labels()
                .iter()
                .map(|label| format!("{:>2} ", &label[..2]))
                .collect::<String>(),
        ];
        for week in grid.weeks() {
            let mut line = String::new();
            for cell in week {
                if !cell.in_month {
                    line.push_str("   ");
                    continue;
                }
                let day = format!("{:>2}", cell.date.format("%-d"));
                match marks.get(&cell.date) {
                    Some(mark) => {
                        line.push_str(&self.paint(&day, color_code(&mark.color)));
                        line.push('*');
                    }
                    None => {
                        line.push_str(&day);
                        line.push(' ');
                    }
                }
            }
            lines.push(line);
        }
        Ok(lines)
    }

    /// Occurrence table: date, time, title, department, kind.
    #[tracing::instrument(skip(self, occurrences, departments))]
    pub fn print_occurrences(
        &self,
        occurrences: &[ProjectedOccurrence],
        departments: &[Department],
    ) -> anyhow::Result<()> {
        self.write_occurrences(io::stdout().lock(), occurrences, departments)
    }

    pub fn write_occurrences<W: Write>(
        &self,
        out: W,
        occurrences: &[ProjectedOccurrence],
        departments: &[Department],
    ) -> anyhow::Result<()> {
        let headers = ["Date", "Day", "Time", "Title", "Department", "Kind"]
            .map(String::from)
            .to_vec();
        let rows = occurrences
            .iter()
            .map(|o| {
                vec![
                    self.paint(&o.date.format("%Y-%m-%d").to_string(), "33"),
                    weekday_label(chrono::Datelike::weekday(&o.date))[..3].to_string(),
                    o.time.clone().unwrap_or_default(),
                    o.title.clone(),
                    self.department_cell(o, departments),
                    kind_label(o).to_string(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip(self, agenda, departments))]
    pub fn print_month_agenda(&self, agenda: &MonthAgenda, departments: &[Department]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if agenda.events.is_empty() {
            writeln!(out, "No events in {}.", agenda.month)?;
        } else {
            self.write_occurrences(&mut out, &agenda.events, departments)?;
        }
        if !agenda.birthdays.is_empty() {
            writeln!(out)?;
            writeln!(out, "Birthdays")?;
            for birthday in &agenda.birthdays {
                writeln!(
                    out,
                    "  {}  {}",
                    self.paint(&birthday.date.format("%d/%m").to_string(), "35"),
                    birthday.title
                )?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, items, departments))]
    pub fn print_day(&self, items: &DayItems, departments: &[Department]) -> anyhow::Result<()> {
        self.write_day(io::stdout().lock(), items, departments)
    }

    pub fn write_day<W: Write>(
        &self,
        mut out: W,
        items: &DayItems,
        departments: &[Department],
    ) -> anyhow::Result<()> {
        writeln!(
            out,
            "{}, {}",
            weekday_label(chrono::Datelike::weekday(&items.date)),
            items.date.format("%Y-%m-%d")
        )?;
        if items.is_empty() {
            writeln!(out, "  nothing scheduled")?;
            return Ok(());
        }
        for event in &items.events {
            let time = event.time.as_deref().unwrap_or("--:--");
            let department = self.department_cell(event, departments);
            let recurring = if event.is_recurring_instance { " (weekly)" } else { "" };
            if department.is_empty() {
                writeln!(out, "  {time}  {}{recurring}", event.title)?;
            } else {
                writeln!(out, "  {time}  {}{recurring}  [{department}]", event.title)?;
            }
        }
        for birthday in &items.birthdays {
            writeln!(out, "  {}  {}", self.paint("birthday", "35"), birthday.title)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, birthdays, members))]
    pub fn print_birthdays(
        &self,
        birthdays: &[ProjectedOccurrence],
        members: &[Member],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["Date", "Name", "Turns"].map(String::from).to_vec();
        let rows = birthdays
            .iter()
            .map(|b| {
                let turns = members
                    .iter()
                    .find(|m| m.id == b.source_id)
                    .and_then(|m| m.birth_date)
                    .and_then(|birth| age_on(birth, b.date))
                    .map(|age| age.to_string())
                    .unwrap_or_default();
                vec![
                    self.paint(&b.date.format("%Y-%m-%d").to_string(), "35"),
                    b.title.clone(),
                    turns,
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, events, departments))]
    pub fn print_recurring(&self, events: &[CalendarEvent], departments: &[Department]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "Every", "Time", "Title", "Department", "Year"]
            .map(String::from)
            .to_vec();
        let mut rows = Vec::with_capacity(events.len());
        for event in events {
            let rule = RecurrenceRule::from_event(event)?;
            rows.push(vec![
                self.paint(short_id(&event.id), "33"),
                rule.day.to_string(),
                event.time.clone().unwrap_or_default(),
                event.title.clone(),
                event
                    .department
                    .as_deref()
                    .map(|reference| department_name(departments, reference))
                    .unwrap_or_default(),
                rule.year.map(|y| y.to_string()).unwrap_or_default(),
            ]);
        }
        write_table(&mut out, headers, rows)
    }

    pub fn print_departments(&self, departments: &[Department]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "Name", "Color", "Description"].map(String::from).to_vec();
        let rows = departments
            .iter()
            .map(|d| {
                vec![
                    self.paint(short_id(&d.id), "33"),
                    self.paint(&d.name, color_code(&d.color)),
                    d.color.clone(),
                    d.description.clone().unwrap_or_default(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    pub fn print_members(&self, members: &[Member], today: NaiveDate) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "Name", "Birth", "Age", "Phone", "Email", "Active"]
            .map(String::from)
            .to_vec();
        let rows = members
            .iter()
            .map(|m| {
                vec![
                    self.paint(short_id(&m.id), "33"),
                    m.name.clone(),
                    m.birth_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_default(),
                    m.birth_date
                        .and_then(|d| age_on(d, today))
                        .map(|age| age.to_string())
                        .unwrap_or_default(),
                    m.phone.clone().unwrap_or_default(),
                    m.email.clone().unwrap_or_default(),
                    if m.is_active { "yes" } else { "no" }.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    pub fn print_member_info(&self, member: &Member, today: NaiveDate) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "name      {}", member.name)?;
        writeln!(out, "id        {}", member.id)?;
        if let Some(birth) = member.birth_date {
            writeln!(out, "born      {}", birth.format("%Y-%m-%d"))?;
            if let Some(age) = age_on(birth, today) {
                writeln!(out, "age       {age}")?;
            }
            writeln!(
                out,
                "birthday  {}",
                next_birthday(birth, today).format("%Y-%m-%d")
            )?;
        }
        writeln!(out, "phone     {}", member.phone.clone().unwrap_or_default())?;
        writeln!(out, "email     {}", member.email.clone().unwrap_or_default())?;
        writeln!(out, "active    {}", if member.is_active { "yes" } else { "no" })?;
        if let Some(notes) = &member.notes {
            writeln!(out, "notes     {notes}")?;
        }
        Ok(())
    }

    pub fn print_categories(&self, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "Name", "Type", "Default"].map(String::from).to_vec();
        let rows = categories
            .iter()
            .map(|c| {
                vec![
                    self.paint(short_id(&c.id), "33"),
                    c.name.clone(),
                    format!("{:?}", c.kind).to_ascii_lowercase(),
                    if c.is_default { "yes" } else { "" }.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, summary))]
    pub fn print_ledger_summary(&self, summary: &LedgerSummary) -> anyhow::Result<()> {
        self.write_ledger_summary(io::stdout().lock(), summary)
    }

    pub fn write_ledger_summary<W: Write>(&self, mut out: W, summary: &LedgerSummary) -> anyhow::Result<()> {
        writeln!(out, "Ledger {}", summary.month)?;
        writeln!(out, "  Income    {:>12}", format_amount(summary.total_income))?;
        writeln!(out, "  Expenses  {:>12}", format_amount(summary.total_expenses))?;
        let balance = format!("{:>12}", format_amount(summary.balance));
        let balance = if summary.balance < 0 {
            self.paint(&balance, "31")
        } else {
            self.paint(&balance, "32")
        };
        writeln!(out, "  Balance   {balance}")?;

        for (label, totals) in [
            ("Income by category", &summary.income_by_category),
            ("Expenses by category", &summary.expenses_by_category),
        ] {
            if totals.is_empty() {
                continue;
            }
            writeln!(out)?;
            writeln!(out, "{label}")?;
            write_table(&mut out, category_headers(), category_rows(totals))?;
        }
        Ok(())
    }

    pub fn print_yearly_report(&self, year: i32, report: &[MonthlyReport]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "Report {year}")?;
        let headers = ["Month", "Income", "Expenses", "Balance"].map(String::from).to_vec();
        let mut rows: Vec<Vec<String>> = report
            .iter()
            .map(|r| {
                vec![
                    r.month.clone(),
                    format_amount(r.income),
                    format_amount(r.expenses),
                    format_amount(r.balance),
                ]
            })
            .collect();
        let income: i64 = report.iter().map(|r| r.income).sum();
        let expenses: i64 = report.iter().map(|r| r.expenses).sum();
        rows.push(vec![
            "total".to_string(),
            format_amount(income),
            format_amount(expenses),
            format_amount(income - expenses),
        ]);
        write_table(&mut out, headers, rows)
    }

    pub fn print_recent(&self, entries: &[LedgerEntry], categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["Date", "Kind", "Amount", "Category", "Description"]
            .map(String::from)
            .to_vec();
        let rows = entries
            .iter()
            .map(|e| {
                let (kind, code) = match e.kind {
                    EntryKind::Income => ("income", "32"),
                    EntryKind::Expense => ("expense", "31"),
                };
                vec![
                    e.date.format("%Y-%m-%d").to_string(),
                    self.paint(kind, code),
                    format_amount(e.amount_cents),
                    categories
                        .iter()
                        .find(|c| c.id == e.category_id)
                        .map(|c| c.name.clone())
                        .unwrap_or_else(|| UNCATEGORIZED.to_string()),
                    e.description.clone().unwrap_or_default(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, levels))]
    pub fn print_inventory(&self, levels: &[FoodStock]) -> anyhow::Result<()> {
        self.write_inventory(io::stdout().lock(), levels)
    }

    /// Stock table with low items flagged and a kilogram total.
    pub fn write_inventory<W: Write>(&self, mut out: W, levels: &[FoodStock]) -> anyhow::Result<()> {
        let headers = ["Food", "Stock (kg)", ""].map(String::from).to_vec();
        let rows = levels
            .iter()
            .map(|stock| {
                let quantity = format_kilograms(stock.quantity_grams);
                let (quantity, flag) = if stock.is_low() {
                    (self.paint(&quantity, "31"), "low")
                } else {
                    (quantity, "")
                };
                vec![stock.food_name.clone(), quantity, flag.to_string()]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        let total: i64 = levels.iter().map(|s| s.quantity_grams.max(0)).sum();
        writeln!(out, "Total in stock: {} kg", format_kilograms(total))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, month))]
    pub fn print_pantry_month(&self, month: &PantryMonth) -> anyhow::Result<()> {
        self.write_pantry_month(io::stdout().lock(), month)
    }

    pub fn write_pantry_month<W: Write>(&self, mut out: W, month: &PantryMonth) -> anyhow::Result<()> {
        writeln!(out, "Social action {}", month.month)?;
        writeln!(out, "  Donated      {:>10} kg", format_kilograms(month.donated_grams))?;
        writeln!(out, "  Distributed  {:>10} kg", format_kilograms(month.distributed_grams))?;

        if !month.entries.is_empty() {
            writeln!(out)?;
            writeln!(out, "Donations")?;
            let headers = ["ID", "Date", "Food", "Kg", "Donor"].map(String::from).to_vec();
            let rows = month
                .entries
                .iter()
                .map(|e| {
                    vec![
                        self.paint(short_id(&e.id), "33"),
                        e.date.format("%Y-%m-%d").to_string(),
                        e.food_name.clone(),
                        format_kilograms(e.quantity_grams),
                        e.donor_name.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            write_table(&mut out, headers, rows)?;
        }
        if !month.exits.is_empty() {
            writeln!(out)?;
            writeln!(out, "Distributions")?;
            write_table(&mut out, exit_headers(), self.exit_rows(&month.exits))?;
        }
        Ok(())
    }

    /// Distributions per family, the layout of the donations report.
    pub fn print_family_distributions(&self, month: &str, groups: &[FamilyDistribution]) -> anyhow::Result<()> {
        self.write_family_distributions(io::stdout().lock(), month, groups)
    }

    pub fn write_family_distributions<W: Write>(
        &self,
        mut out: W,
        month: &str,
        groups: &[FamilyDistribution],
    ) -> anyhow::Result<()> {
        writeln!(out, "Distributions by family {month}")?;
        for group in groups {
            writeln!(out)?;
            writeln!(
                out,
                "{}  ({} kg)",
                self.paint(&group.family, "1"),
                format_kilograms(group.total_grams)
            )?;
            for item in &group.items {
                writeln!(
                    out,
                    "  {}  {:<20} {:>8}",
                    item.date.format("%Y-%m-%d"),
                    item.food_name,
                    format_kilograms(item.quantity_grams)
                )?;
            }
        }
        writeln!(out)?;
        writeln!(out, "Families served: {}", groups.len())?;
        Ok(())
    }

    pub fn print_families(&self, families: &[BeneficiaryFamily]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "Family", "Responsible", "Phone", "People", "Active"]
            .map(String::from)
            .to_vec();
        let rows = families
            .iter()
            .map(|f| {
                vec![
                    self.paint(short_id(&f.id), "33"),
                    f.family_name.clone(),
                    f.responsible_name.clone().unwrap_or_default(),
                    f.phone.clone().unwrap_or_default(),
                    f.members_count.map(|n| n.to_string()).unwrap_or_default(),
                    if f.is_active { "yes" } else { "no" }.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        let (total, active) = family_counts(families);
        writeln!(out, "{total} families, {active} active")?;
        Ok(())
    }

    pub fn print_family_info(&self, family: &BeneficiaryFamily, received: &[FoodExit]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "family       {}", family.family_name)?;
        writeln!(out, "id           {}", family.id)?;
        writeln!(
            out,
            "responsible  {}",
            family.responsible_name.clone().unwrap_or_default()
        )?;
        writeln!(out, "phone        {}", family.phone.clone().unwrap_or_default())?;
        writeln!(out, "address      {}", family.address.clone().unwrap_or_default())?;
        if let Some(count) = family.members_count {
            writeln!(out, "people       {count}")?;
        }
        writeln!(out, "active       {}", if family.is_active { "yes" } else { "no" })?;
        if let Some(notes) = &family.notes {
            writeln!(out, "notes        {notes}")?;
        }
        if !received.is_empty() {
            writeln!(out)?;
            write_table(&mut out, exit_headers(), self.exit_rows(received))?;
        }
        Ok(())
    }

    pub fn write_church<W: Write>(&self, mut out: W, settings: &ChurchSettings) -> anyhow::Result<()> {
        writeln!(out, "name     {}", self.paint(&settings.name, "1"))?;
        for (label, value) in [
            ("cnpj", &settings.cnpj),
            ("address", &settings.address),
            ("phone", &settings.phone),
        ] {
            writeln!(out, "{label:<8} {}", value.clone().unwrap_or_default())?;
        }
        Ok(())
    }

    pub fn print_church(&self, settings: &ChurchSettings) -> anyhow::Result<()> {
        self.write_church(io::stdout().lock(), settings)
    }

    fn exit_rows(&self, exits: &[FoodExit]) -> Vec<Vec<String>> {
        exits
            .iter()
            .map(|e| {
                vec![
                    self.paint(short_id(&e.id), "33"),
                    e.date.format("%Y-%m-%d").to_string(),
                    e.food_name.clone(),
                    format_kilograms(e.quantity_grams),
                    e.family_name.clone().unwrap_or_default(),
                ]
            })
            .collect()
    }

    fn department_cell(&self, occurrence: &ProjectedOccurrence, departments: &[Department]) -> String {
        let Some(reference) = occurrence.department.as_deref() else {
            return String::new();
        };
        match department_for(departments, reference) {
            Some(dept) => self.paint(&dept.name, color_code(&dept.color)),
            None => reference.to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn kind_label(occurrence: &ProjectedOccurrence) -> &'static str {
    match occurrence.kind {
        OccurrenceKind::Birthday => "birthday",
        OccurrenceKind::Event if occurrence.is_recurring_instance => "weekly",
        OccurrenceKind::Event => "event",
    }
}

fn department_name(departments: &[Department], reference: &str) -> String {
    department_for(departments, reference)
        .map(|dept| dept.name.clone())
        .unwrap_or_else(|| reference.to_string())
}

fn exit_headers() -> Vec<String> {
    ["ID", "Date", "Food", "Kg", "Family"].map(String::from).to_vec()
}

fn category_headers() -> Vec<String> {
    vec!["Category".to_string(), "Amount".to_string()]
}

fn category_rows(totals: &[CategoryTotal]) -> Vec<Vec<String>> {
    totals
        .iter()
        .map(|t| vec![t.name.clone(), format_amount(t.amount_cents)])
        .collect()
}

pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Maps a stored colour token such as `bg-blue-500` to an ANSI foreground
/// code.
pub fn color_code(token: &str) -> &'static str {
    let token = token.to_ascii_lowercase();
    let palette: [(&[&str], &'static str); 6] = [
        (&["red", "rose"], "31"),
        (&["green", "emerald", "lime"], "32"),
        (&["yellow", "amber", "orange"], "33"),
        (&["blue", "indigo", "sky"], "34"),
        (&["purple", "pink", "fuchsia", "violet"], "35"),
        (&["cyan", "teal"], "36"),
    ];
    palette
        .iter()
        .find(|(names, _)| names.iter().any(|name| token.contains(name)))
        .map(|(_, code)| *code)
        .unwrap_or("37")
}

fn pad_visible(text: &str, width: usize) -> String {
    let visible = UnicodeWidthStr::width(strip_ansi(text).as_str());
    format!("{text}{}", " ".repeat(width.saturating_sub(visible)))
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        write!(writer, "{:width$} ", header, width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::YearMonth;
    use crate::grid::{WeekStart, month_grid};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn color_tokens_map_to_ansi() {
        assert_eq!(color_code("bg-blue-500"), "34");
        assert_eq!(color_code("bg-pink-400"), "35");
        assert_eq!(color_code("bg-gray-500"), "37");
    }

    #[test]
    fn table_aligns_on_visible_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["Title".to_string(), "Dept".to_string()],
            vec![
                vec!["Conferência".to_string(), "\x1b[34mLouvor\x1b[0m".to_string()],
                vec!["Culto".to_string(), "".to_string()],
            ],
        )
        .expect("table");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Title       Dept   ");
        assert_eq!(lines[3], "Culto              ");
    }

    #[test]
    fn month_grid_marks_busy_days() {
        let renderer = Renderer::plain();
        let grid = month_grid(YearMonth::new(2024, 2).expect("month"), WeekStart::Monday).expect("grid");
        let mut marks = DayMarks::new();
        marks.insert(
            date(2024, 2, 4),
            DayMark {
                count: 1,
                color: "bg-blue-500".to_string(),
            },
        );
        let mut buf = Vec::new();
        renderer
            .write_month_grid(&mut buf, &grid, &marks, date(2024, 2, 1))
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 8);
        assert!(lines[0].contains("February 2024"));
        assert!(lines[1].starts_with("Mon"));
        assert!(lines[2].starts_with(" 29 "));
        assert!(lines[2].ends_with("  4*"));
    }

    #[test]
    fn inventory_flags_low_stock() {
        let levels = vec![
            FoodStock {
                food_name: "Arroz".to_string(),
                quantity_grams: 12_500,
            },
            FoodStock {
                food_name: "Óleo".to_string(),
                quantity_grams: 900,
            },
        ];
        let mut buf = Vec::new();
        Renderer::plain()
            .write_inventory(&mut buf, &levels)
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0].trim_end(), "Food  Stock (kg)");
        assert_eq!(lines[2].trim_end(), "Arroz 12.5");
        assert_eq!(lines[3].trim_end(), "Óleo  0.9        low");
        assert_eq!(lines[4], "Total in stock: 13.4 kg");
    }

    #[test]
    fn family_report_lists_each_family() {
        let mut exit = FoodExit::new("Arroz".to_string(), 5_000, date(2024, 6, 5));
        exit.family_name = Some("Silva".to_string());
        let groups = vec![FamilyDistribution {
            family: "Silva".to_string(),
            total_grams: 5_000,
            items: vec![exit],
        }];
        let mut buf = Vec::new();
        Renderer::plain()
            .write_family_distributions(&mut buf, "2024-06", &groups)
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("Silva  (5.0 kg)\n  2024-06-05  Arroz"));
        assert!(text.ends_with("Families served: 1\n"));
    }

    #[test]
    fn day_view_lists_events_then_birthdays() {
        let renderer = Renderer::plain();
        let mut culto = CalendarEvent::new_recurring("Culto".to_string(), date(2024, 1, 7), 0, None);
        culto.time = Some("19:00".to_string());
        let ana = Member::new("Ana".to_string(), Some(date(1990, 6, 9)));
        let items = DayItems {
            date: date(2024, 6, 9),
            events: vec![ProjectedOccurrence::recurring(&culto, date(2024, 6, 9))],
            birthdays: vec![ProjectedOccurrence::birthday(&ana, date(2024, 6, 9))],
        };
        let mut buf = Vec::new();
        renderer.write_day(&mut buf, &items, &[]).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            text,
            "Sunday, 2024-06-09\n  19:00  Culto (weekly)\n  birthday  Ana\n"
        );
    }
}
