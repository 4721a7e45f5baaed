use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::datetime::{YearMonth, iso_date_serde};
use crate::ledger::{checked_total, parse_decimal};
use crate::model::new_id;

/// Group name for distributions not tied to a family.
pub const NO_FAMILY: &str = "Sem família";

/// Stock below this many grams is flagged as low.
pub const LOW_STOCK_GRAMS: i64 = 10_000;

/// Largest single donation or distribution accepted, in grams.
pub const MAX_QUANTITY_GRAMS: i64 = 1_000_000_000_000;

fn default_true() -> bool {
    true
}

/// Food received as a donation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FoodEntry {
    pub id: String,
    pub food_name: String,
    pub quantity_grams: i64,
    #[serde(with = "iso_date_serde")]
    pub date: NaiveDate,
    #[serde(default)]
    pub donor_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FoodEntry {
    pub fn new(food_name: String, quantity_grams: i64, date: NaiveDate) -> Self {
        Self {
            id: new_id(),
            food_name,
            quantity_grams,
            date,
            donor_name: None,
            description: None,
        }
    }
}

/// Food handed out, optionally to a registered family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FoodExit {
    pub id: String,
    pub food_name: String,
    pub quantity_grams: i64,
    #[serde(with = "iso_date_serde")]
    pub date: NaiveDate,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FoodExit {
    pub fn new(food_name: String, quantity_grams: i64, date: NaiveDate) -> Self {
        Self {
            id: new_id(),
            food_name,
            quantity_grams,
            date,
            family_name: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeneficiaryFamily {
    pub id: String,
    pub family_name: String,
    #[serde(default)]
    pub responsible_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub members_count: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl BeneficiaryFamily {
    pub fn new(family_name: String) -> Self {
        Self {
            id: new_id(),
            family_name,
            responsible_name: None,
            phone: None,
            address: None,
            members_count: None,
            notes: None,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoodStock {
    pub food_name: String,
    pub quantity_grams: i64,
}

impl FoodStock {
    pub fn is_low(&self) -> bool {
        self.quantity_grams < LOW_STOCK_GRAMS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PantryMonth {
    pub month: String,
    pub donated_grams: i64,
    pub distributed_grams: i64,
    pub entries: Vec<FoodEntry>,
    pub exits: Vec<FoodExit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilyDistribution {
    pub family: String,
    pub total_grams: i64,
    pub items: Vec<FoodExit>,
}

/// Food names match case-insensitively, ignoring surrounding space.
pub fn food_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Current stock per food: donations minus distributions.
///
/// Foods whose balance is exactly zero are left out. Names keep the spelling
/// of the first donation seen.
pub fn stock_levels(entries: &[FoodEntry], exits: &[FoodExit]) -> anyhow::Result<Vec<FoodStock>> {
    let mut levels: BTreeMap<String, FoodStock> = BTreeMap::new();
    let rows = entries
        .iter()
        .map(|e| (e.food_name.as_str(), e.quantity_grams))
        .chain(exits.iter().map(|e| (e.food_name.as_str(), -e.quantity_grams)));
    for (name, grams) in rows {
        let slot = levels.entry(food_key(name)).or_insert_with(|| FoodStock {
            food_name: name.trim().to_string(),
            quantity_grams: 0,
        });
        slot.quantity_grams = checked_total([slot.quantity_grams, grams])?;
    }
    Ok(levels
        .into_values()
        .filter(|stock| stock.quantity_grams != 0)
        .collect())
}

/// Fails when any of `foods` would be left with negative stock.
pub fn ensure_stock_covers(levels: &[FoodStock], foods: &[&str]) -> anyhow::Result<()> {
    for food in foods {
        let key = food_key(food);
        if let Some(stock) = levels
            .iter()
            .find(|stock| food_key(&stock.food_name) == key && stock.quantity_grams < 0)
        {
            return Err(anyhow!(
                "not enough {} in stock (short by {} kg)",
                food.trim(),
                format_kilograms(-stock.quantity_grams)
            ));
        }
    }
    Ok(())
}

/// One month of donations and distributions with their totals.
pub fn month_movements(
    entries: &[FoodEntry],
    exits: &[FoodExit],
    month: YearMonth,
) -> anyhow::Result<PantryMonth> {
    let entries: Vec<FoodEntry> = entries
        .iter()
        .filter(|e| month.contains(e.date))
        .cloned()
        .collect();
    let exits: Vec<FoodExit> = exits
        .iter()
        .filter(|e| month.contains(e.date))
        .cloned()
        .collect();
    Ok(PantryMonth {
        month: month.to_string(),
        donated_grams: checked_total(entries.iter().map(|e| e.quantity_grams))?,
        distributed_grams: checked_total(exits.iter().map(|e| e.quantity_grams))?,
        entries,
        exits,
    })
}

/// Distributions grouped by family, families in name order with
/// [`NO_FAMILY`] last. Items within a family keep date order.
pub fn distributions_by_family(exits: &[FoodExit]) -> anyhow::Result<Vec<FamilyDistribution>> {
    let mut grouped: BTreeMap<(bool, String), Vec<FoodExit>> = BTreeMap::new();
    for exit in exits {
        let key = match exit.family_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => (false, name.to_string()),
            _ => (true, NO_FAMILY.to_string()),
        };
        grouped.entry(key).or_default().push(exit.clone());
    }

    let mut out = Vec::with_capacity(grouped.len());
    for ((_, family), mut items) in grouped {
        items.sort_by(|a, b| a.date.cmp(&b.date));
        out.push(FamilyDistribution {
            total_grams: checked_total(items.iter().map(|e| e.quantity_grams))?,
            family,
            items,
        });
    }
    Ok(out)
}

/// `(registered, active)` family counts.
pub fn family_counts(families: &[BeneficiaryFamily]) -> (usize, usize) {
    let active = families.iter().filter(|f| f.is_active).count();
    (families.len(), active)
}

/// Parses kilograms such as `2,5` or `0.125` into grams.
pub fn parse_kilograms(raw: &str) -> anyhow::Result<i64> {
    let grams = parse_decimal(raw.trim().trim_end_matches("kg"), 3, "quantity")?;
    if grams == 0 {
        return Err(anyhow!("quantity must be greater than zero"));
    }
    if grams > MAX_QUANTITY_GRAMS {
        return Err(anyhow!("quantity too large: {raw}"));
    }
    Ok(grams)
}

/// Grams as kilograms with at least one decimal: `2500` is `2.5`.
pub fn format_kilograms(grams: i64) -> String {
    let sign = if grams < 0 { "-" } else { "" };
    let abs = grams.unsigned_abs();
    let frac = format!("{:03}", abs % 1000);
    let frac = frac.trim_end_matches('0');
    let frac = if frac.is_empty() { "0" } else { frac };
    format!("{sign}{}.{frac}", abs / 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn entry(food: &str, grams: i64, on: NaiveDate) -> FoodEntry {
        FoodEntry::new(food.to_string(), grams, on)
    }

    fn exit(food: &str, grams: i64, on: NaiveDate, family: Option<&str>) -> FoodExit {
        let mut out = FoodExit::new(food.to_string(), grams, on);
        out.family_name = family.map(str::to_string);
        out
    }

    #[test]
    fn stock_is_donations_minus_distributions() {
        let entries = vec![
            entry("Arroz", 20_000, date(2024, 6, 1)),
            entry("arroz ", 5_000, date(2024, 6, 8)),
            entry("Feijão", 8_000, date(2024, 6, 1)),
            entry("Óleo", 900, date(2024, 6, 1)),
        ];
        let exits = vec![
            exit("ARROZ", 12_500, date(2024, 6, 10), Some("Silva")),
            exit("Óleo", 900, date(2024, 6, 10), None),
        ];

        let levels = stock_levels(&entries, &exits).expect("stock");
        let view: Vec<(&str, i64, bool)> = levels
            .iter()
            .map(|s| (s.food_name.as_str(), s.quantity_grams, s.is_low()))
            .collect();
        assert_eq!(view, vec![("Arroz", 12_500, false), ("Feijão", 8_000, true)]);
        assert!(ensure_stock_covers(&levels, &["arroz", "Óleo"]).is_ok());
    }

    #[test]
    fn overdrawn_food_is_reported() {
        let entries = vec![entry("Arroz", 1_000, date(2024, 6, 1))];
        let exits = vec![exit("Arroz", 2_500, date(2024, 6, 2), None)];
        let levels = stock_levels(&entries, &exits).expect("stock");
        assert_eq!(levels[0].quantity_grams, -1_500);

        let err = ensure_stock_covers(&levels, &["arroz"]).expect_err("short");
        assert_eq!(err.to_string(), "not enough arroz in stock (short by 1.5 kg)");
        assert!(ensure_stock_covers(&levels, &["Feijão"]).is_ok());
    }

    #[test]
    fn month_totals_only_count_that_month() {
        let entries = vec![
            entry("Arroz", 5_000, date(2024, 6, 30)),
            entry("Arroz", 7_000, date(2024, 7, 1)),
        ];
        let exits = vec![exit("Arroz", 2_000, date(2024, 6, 15), None)];
        let june = month_movements(&entries, &exits, YearMonth::new(2024, 6).expect("month"))
            .expect("month");
        assert_eq!(june.donated_grams, 5_000);
        assert_eq!(june.distributed_grams, 2_000);
        assert_eq!(june.entries.len(), 1);
    }

    #[test]
    fn distributions_group_by_family_with_unassigned_last() {
        let exits = vec![
            exit("Feijão", 1_000, date(2024, 6, 12), Some("Silva")),
            exit("Arroz", 2_000, date(2024, 6, 3), None),
            exit("Arroz", 5_000, date(2024, 6, 5), Some("Silva")),
            exit("Leite", 1_000, date(2024, 6, 7), Some("Almeida")),
            exit("Sal", 500, date(2024, 6, 7), Some("  ")),
        ];
        let grouped = distributions_by_family(&exits).expect("grouped");
        let view: Vec<(&str, i64, usize)> = grouped
            .iter()
            .map(|g| (g.family.as_str(), g.total_grams, g.items.len()))
            .collect();
        assert_eq!(
            view,
            vec![("Almeida", 1_000, 1), ("Silva", 6_000, 2), (NO_FAMILY, 2_500, 2)]
        );
        assert_eq!(grouped[1].items[0].food_name, "Arroz");
    }

    #[test]
    fn family_counts_split_active() {
        let mut inactive = BeneficiaryFamily::new("Souza".to_string());
        inactive.is_active = false;
        let families = vec![BeneficiaryFamily::new("Silva".to_string()), inactive];
        assert_eq!(family_counts(&families), (2, 1));
    }

    #[test]
    fn kilograms_parse_to_grams() {
        assert_eq!(parse_kilograms("2,5").expect("kg"), 2_500);
        assert_eq!(parse_kilograms("0.125kg").expect("kg"), 125);
        assert_eq!(parse_kilograms("10").expect("kg"), 10_000);
        assert!(parse_kilograms("0").is_err());
        assert!(parse_kilograms("1,2345").is_err());
        assert!(parse_kilograms("99999999999999999").is_err());
        assert_eq!(format_kilograms(2_500), "2.5");
        assert_eq!(format_kilograms(10_000), "10.0");
        assert_eq!(format_kilograms(125), "0.125");
        assert_eq!(format_kilograms(-1_500), "-1.5");
    }
}
