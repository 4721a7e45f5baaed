use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  Datelike,
  Duration,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "congregate-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "CONGREGATE_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "CONGREGATE_TIME_CONFIG";
pub const DEFAULT_TIMEZONE: &str =
  "America/Sao_Paulo";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Resolves the calendar timezone.
///
/// Order: explicit config value, `CONGREGATE_TIMEZONE`, the
/// `congregate-time.toml` file, then [`DEFAULT_TIMEZONE`].
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_TIMEZONE,
    "DEFAULT_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

#[must_use]
pub fn today_in(tz: Tz) -> NaiveDate {
  Utc::now()
    .with_timezone(&tz)
    .date_naive()
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured calendar timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Weekday number with 0 = Sunday, the
/// convention used for stored
/// recurrence days.
#[must_use]
pub fn weekday_number(
  date: NaiveDate
) -> u8 {
  date
    .weekday()
    .num_days_from_sunday()
    as u8
}

pub fn weekday_from_number(
  day: u8
) -> Option<Weekday> {
  match day {
    | 0 => Some(Weekday::Sun),
    | 1 => Some(Weekday::Mon),
    | 2 => Some(Weekday::Tue),
    | 3 => Some(Weekday::Wed),
    | 4 => Some(Weekday::Thu),
    | 5 => Some(Weekday::Fri),
    | 6 => Some(Weekday::Sat),
    | _ => None
  }
}

pub fn weekday_label(
  weekday: Weekday
) -> &'static str {
  match weekday {
    | Weekday::Sun => "Sunday",
    | Weekday::Mon => "Monday",
    | Weekday::Tue => "Tuesday",
    | Weekday::Wed => "Wednesday",
    | Weekday::Thu => "Thursday",
    | Weekday::Fri => "Friday",
    | Weekday::Sat => "Saturday"
  }
}

pub fn first_day_of_month(
  year: i32,
  month: u32
) -> anyhow::Result<NaiveDate> {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .ok_or_else(|| {
    anyhow!(
      "invalid month: \
       {year}-{month:02}"
    )
  })
}

pub fn last_day_of_month(
  year: i32,
  month: u32
) -> anyhow::Result<NaiveDate> {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  first_day_of_month(
    next_year, next_month
  )?
  .pred_opt()
  .ok_or_else(|| {
    anyhow!(
      "no last day for \
       {year}-{month:02}"
    )
  })
}

pub fn days_in_month(
  year: i32,
  month: u32
) -> anyhow::Result<u32> {
  Ok(
    last_day_of_month(year, month)?
      .day()
  )
}

/// Longest look-ahead window accepted
/// for `upcoming` style views.
pub const MAX_HORIZON_DAYS: u32 = 3660;

/// Offset for week and grid math,
/// where `days` stays within a few
/// weeks. User-supplied offsets go
/// through [`try_add_days`].
#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  try_add_days(date, days)
    .unwrap_or(date)
}

pub fn try_add_days(
  date: NaiveDate,
  days: i64
) -> anyhow::Result<NaiveDate> {
  Duration::try_days(days)
    .and_then(|delta| {
      date.checked_add_signed(delta)
    })
    .ok_or_else(|| {
      anyhow!(
        "date out of range: {date} \
         {days:+} days"
      )
    })
}

pub fn check_horizon(
  days: u32
) -> anyhow::Result<u32> {
  if days > MAX_HORIZON_DAYS {
    return Err(anyhow!(
      "look-ahead of {days} days \
       exceeds the maximum of \
       {MAX_HORIZON_DAYS}"
    ));
  }
  Ok(days)
}

/// Last day of a `days`-long
/// look-ahead from `reference`.
pub fn horizon_end(
  reference: NaiveDate,
  days: u32
) -> anyhow::Result<NaiveDate> {
  try_add_days(
    reference,
    i64::from(check_horizon(days)?)
  )
}

#[must_use]
pub fn start_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  let day_idx = day
    .weekday()
    .num_days_from_monday()
    as i64;
  let start_idx = week_start
    .num_days_from_monday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}

/// A calendar month, the unit the
/// month/list views and their query
/// keys work in.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash
)]
pub struct YearMonth {
  pub year:  i32,
  pub month: u32
}

impl YearMonth {
  pub fn new(
    year: i32,
    month: u32
  ) -> anyhow::Result<Self> {
    if !(1..=12).contains(&month) {
      return Err(anyhow!(
        "month out of range: {month}"
      ));
    }
    Ok(Self {
      year,
      month
    })
  }

  #[must_use]
  pub fn of(date: NaiveDate) -> Self {
    Self {
      year:  date.year(),
      month: date.month()
    }
  }

  pub fn first_day(
    &self
  ) -> anyhow::Result<NaiveDate> {
    first_day_of_month(
      self.year, self.month
    )
  }

  pub fn last_day(
    &self
  ) -> anyhow::Result<NaiveDate> {
    last_day_of_month(
      self.year, self.month
    )
  }

  #[must_use]
  pub fn shift(
    &self,
    months: i32
  ) -> Self {
    let index = self.year as i64 * 12
      + (self.month as i64 - 1)
      + months as i64;
    Self {
      year:  index.div_euclid(12)
        as i32,
      month: index.rem_euclid(12)
        as u32
        + 1
    }
  }

  #[must_use]
  pub fn contains(
    &self,
    date: NaiveDate
  ) -> bool {
    date.year() == self.year
      && date.month() == self.month
  }
}

impl fmt::Display for YearMonth {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(
      f,
      "{:04}-{:02}",
      self.year, self.month
    )
  }
}

impl FromStr for YearMonth {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let (year, month) = s
      .trim()
      .split_once('-')
      .ok_or_else(|| {
        anyhow!(
          "expected YYYY-MM, got: {s}"
        )
      })?;
    let year: i32 =
      year.parse().with_context(|| {
        format!("invalid year in {s}")
      })?;
    let month: u32 =
      month.parse().with_context(
        || format!("invalid month in {s}")
      )?;
    Self::new(year, month)
  }
}

/// Parses a month selector relative to
/// `today`: `YYYY-MM`, month names
/// (current year), `this`, `next`,
/// `prev`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_month_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<YearMonth> {
  let lower =
    input.trim().to_ascii_lowercase();
  let current = YearMonth::of(today);

  match lower.as_str() {
    | "" | "this" | "now" => {
      return Ok(current);
    }
    | "next" => {
      return Ok(current.shift(1));
    }
    | "prev" | "last" | "previous" => {
      return Ok(current.shift(-1));
    }
    | _ => {}
  }

  if let Some(month) =
    parse_month_name(&lower)
  {
    return YearMonth::new(
      today.year(),
      month
    );
  }

  lower.parse::<YearMonth>().context(
    "supported month formats: \
     YYYY-MM, month names (e.g. june), \
     this, next, prev"
  )
}

/// Parses a date relative to `today`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" | "now" => {
      return Ok(today);
    }
    | "tomorrow" => {
      return Ok(add_days(today, 1));
    }
    | "yesterday" => {
      return Ok(add_days(today, -1));
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today,
      target_weekday
    ));
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: i64 = caps["num"]
      .parse()
      .context(
        "invalid relative number"
      )?;
    let days = match &caps["unit"] {
      | "w" => num.checked_mul(7),
      | _ => Some(num)
    }
    .ok_or_else(|| {
      anyhow!(
        "relative offset too large: \
         {token}"
      )
    })?;
    return try_add_days(
      today,
      if &caps["sign"] == "-" {
        -days
      } else {
        days
      }
    );
  }

  parse_iso_date(token).context(
    "supported formats: \
     today/tomorrow/yesterday, weekday \
     names (e.g. sunday), +Nd/-Nd, \
     +Nw/-Nw, YYYY-MM-DD, DD/MM/YYYY"
  )
}

/// Parses `YYYY-MM-DD` (optionally
/// followed by a time part) or
/// `DD/MM/YYYY`.
pub fn parse_iso_date(
  raw: &str
) -> anyhow::Result<NaiveDate> {
  let token = raw.trim();
  let head = token
    .get(..10)
    .filter(|head| {
      token.len() == 10
        || token[10..]
          .starts_with(['T', ' '])
    })
    .unwrap_or(token);

  if let Ok(date) =
    NaiveDate::parse_from_str(
      head, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  NaiveDate::parse_from_str(
    token, "%d/%m/%Y"
  )
  .map_err(|_| {
    anyhow!(
      "unrecognized date: {raw}"
    )
  })
}

/// Normalizes a clock time to `HH:MM`.
pub fn normalize_time(
  raw: &str
) -> anyhow::Result<String> {
  let (hour, minute) =
    parse_clock_time(raw)
      .ok_or_else(|| {
        anyhow!(
          "unrecognized time: {raw}"
        )
      })?;
  Ok(format!("{hour:02}:{minute:02}"))
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

/// Accepts weekday names or the 0-6
/// number (0 = Sunday).
pub fn parse_weekday(
  raw: &str
) -> anyhow::Result<Weekday> {
  let lower =
    raw.trim().to_ascii_lowercase();
  if let Some(day) =
    parse_weekday_name(&lower)
  {
    return Ok(day);
  }
  lower
    .parse::<u8>()
    .ok()
    .and_then(weekday_from_number)
    .ok_or_else(|| {
      anyhow!(
        "expected weekday name or \
         0-6, got: {raw}"
      )
    })
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})(:\d{2})?\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    let ampm = ampm_match
      .as_str()
      .to_ascii_lowercase();
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm.as_str() {
      | "am" => {
        if raw_hour == 12 {
          0
        } else {
          raw_hour
        }
      }
      | "pm" => {
        if raw_hour == 12 {
          12
        } else {
          raw_hour + 12
        }
      }
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => {
      Some(9)
    }
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    Weekday
  };

  use super::{
    MAX_HORIZON_DAYS,
    YearMonth,
    days_in_month,
    horizon_end,
    normalize_time,
    parse_date_expr,
    parse_iso_date,
    parse_month_expr,
    start_of_week,
    weekday_number
  };

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn sunday_is_weekday_zero() {
    assert_eq!(
      weekday_number(date(
        2024, 6, 2
      )),
      0
    );
    assert_eq!(
      weekday_number(date(
        2024, 6, 8
      )),
      6
    );
  }

  #[test]
  fn parses_weekday_name() {
    let parsed = parse_date_expr(
      "wednesday",
      date(2026, 2, 17)
    )
    .expect("parse weekday");
    assert_eq!(parsed, date(2026, 2, 18));
  }

  #[test]
  fn parses_relative_days() {
    let today = date(2024, 2, 27);
    assert_eq!(
      parse_date_expr("+3d", today)
        .expect("parse relative"),
      date(2024, 3, 1)
    );
    assert_eq!(
      parse_date_expr("-1w", today)
        .expect("parse relative"),
      date(2024, 2, 20)
    );
  }

  #[test]
  fn oversized_offsets_are_errors() {
    let today = date(2024, 2, 27);
    assert!(
      parse_date_expr(
        "+99999999999d",
        today
      )
      .is_err()
    );
    assert!(
      parse_date_expr(
        "+9999999999999999999w",
        today
      )
      .is_err()
    );
    assert_eq!(
      horizon_end(today, 3)
        .expect("horizon"),
      date(2024, 3, 1)
    );
    assert!(
      horizon_end(
        today,
        MAX_HORIZON_DAYS + 1
      )
      .is_err()
    );
    assert!(
      horizon_end(today, 4_000_000_000)
        .is_err()
    );
  }

  #[test]
  fn parses_iso_and_brazilian_dates() {
    assert_eq!(
      parse_iso_date("1990-05-17")
        .expect("iso"),
      date(1990, 5, 17)
    );
    assert_eq!(
      parse_iso_date(
        "1990-05-17T00:00:00+00:00"
      )
      .expect("timestamp"),
      date(1990, 5, 17)
    );
    assert_eq!(
      parse_iso_date("17/05/1990")
        .expect("dd/mm/yyyy"),
      date(1990, 5, 17)
    );
    assert!(
      parse_iso_date("1990-13-01")
        .is_err()
    );
  }

  #[test]
  fn month_shift_crosses_years() {
    let ym = YearMonth::new(2024, 1)
      .expect("valid month");
    assert_eq!(
      ym.shift(-1).to_string(),
      "2023-12"
    );
    assert_eq!(
      ym.shift(13).to_string(),
      "2025-02"
    );
  }

  #[test]
  fn parses_month_expressions() {
    let today = date(2024, 12, 5);
    assert_eq!(
      parse_month_expr("next", today)
        .expect("next")
        .to_string(),
      "2025-01"
    );
    assert_eq!(
      parse_month_expr("june", today)
        .expect("june")
        .to_string(),
      "2024-06"
    );
    assert!(
      parse_month_expr("2024-00", today)
        .is_err()
    );
  }

  #[test]
  fn february_length_follows_leap_years()
  {
    assert_eq!(
      days_in_month(2024, 2)
        .expect("feb 2024"),
      29
    );
    assert_eq!(
      days_in_month(2023, 2)
        .expect("feb 2023"),
      28
    );
  }

  #[test]
  fn week_start_walks_back() {
    let thu = date(2024, 2, 1);
    assert_eq!(
      start_of_week(thu, Weekday::Sun),
      date(2024, 1, 28)
    );
    assert_eq!(
      start_of_week(thu, Weekday::Mon),
      date(2024, 1, 29)
    );
  }

  #[test]
  fn normalizes_clock_times() {
    assert_eq!(
      normalize_time("9:30")
        .expect("time"),
      "09:30"
    );
    assert_eq!(
      normalize_time("19:00:00")
        .expect("time"),
      "19:00"
    );
    assert_eq!(
      normalize_time("7:15pm")
        .expect("time"),
      "19:15"
    );
    assert!(
      normalize_time("25:00").is_err()
    );
  }
}

pub mod iso_date_serde {
  use chrono::NaiveDate;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    date: &NaiveDate,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &date.format("%Y-%m-%d").to_string()
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<NaiveDate, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    super::parse_iso_date(&raw)
      .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::NaiveDate;
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      date: &Option<NaiveDate>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match date {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<NaiveDate>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw)
          if raw.trim().is_empty() =>
        {
          Ok(None)
        }
        | Some(raw) => {
          super::super::parse_iso_date(
            &raw
          )
          .map(Some)
          .map_err(
            serde::de::Error::custom
          )
        }
        | None => Ok(None)
      }
    }
  }
}
