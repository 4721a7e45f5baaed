use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Datelike,
  NaiveDate,
  Weekday
};

use crate::datetime::{
  YearMonth,
  add_days,
  start_of_week
};

pub const GRID_CELLS: usize = 42;

/// First column of rendered weeks.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default
)]
pub enum WeekStart {
  #[default]
  Sunday,
  Monday
}

impl WeekStart {
  #[must_use]
  pub fn weekday(self) -> Weekday {
    match self {
      | Self::Sunday => Weekday::Sun,
      | Self::Monday => Weekday::Mon
    }
  }

  /// Short column labels in display
  /// order.
  #[must_use]
  pub fn labels(
    self
  ) -> [&'static str; 7] {
    match self {
      | Self::Sunday => {
        [
          "Sun", "Mon", "Tue", "Wed",
          "Thu", "Fri", "Sat"
        ]
      }
      | Self::Monday => {
        [
          "Mon", "Tue", "Wed", "Thu",
          "Fri", "Sat", "Sun"
        ]
      }
    }
  }
}

impl FromStr for WeekStart {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "sunday" | "sun" | "0" => {
        Ok(Self::Sunday)
      }
      | "monday" | "mon" | "1" => {
        Ok(Self::Monday)
      }
      | other => {
        Err(anyhow!(
          "invalid week start: {other} \
           (expected sunday or monday)"
        ))
      }
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct GridCell {
  pub date:     NaiveDate,
  pub in_month: bool
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
  pub month:      YearMonth,
  pub week_start: WeekStart,
  pub cells:      Vec<GridCell>
}

impl MonthGrid {
  pub fn weeks(
    &self
  ) -> impl Iterator<Item = &[GridCell]>
  {
    self.cells.chunks(7)
  }

  pub fn first(
    &self
  ) -> Option<NaiveDate> {
    self.cells.first().map(|c| c.date)
  }

  pub fn last(
    &self
  ) -> Option<NaiveDate> {
    self.cells.last().map(|c| c.date)
  }
}

fn cells_from(
  month: YearMonth,
  start: NaiveDate,
  count: i64
) -> Vec<GridCell> {
  (0..count)
    .map(|offset| {
      let date = add_days(start, offset);
      GridCell {
        date,
        in_month: month.contains(date)
      }
    })
    .collect()
}

/// Six full weeks covering `month`:
/// leading days of the prior month, the
/// month itself, then trailing days of
/// the next.
#[tracing::instrument]
pub fn month_grid(
  month: YearMonth,
  week_start: WeekStart
) -> anyhow::Result<MonthGrid> {
  let first = month.first_day()?;
  let grid_start = start_of_week(
    first,
    week_start.weekday()
  );
  Ok(MonthGrid {
    month,
    week_start,
    cells: cells_from(
      month,
      grid_start,
      GRID_CELLS as i64
    )
  })
}

/// Leading days plus the month's days,
/// without trailing padding. Used by the
/// year overview.
pub fn mini_month(
  month: YearMonth,
  week_start: WeekStart
) -> anyhow::Result<MonthGrid> {
  let first = month.first_day()?;
  let last = month.last_day()?;
  let grid_start = start_of_week(
    first,
    week_start.weekday()
  );
  let count = last
    .signed_duration_since(grid_start)
    .num_days()
    + 1;
  Ok(MonthGrid {
    month,
    week_start,
    cells: cells_from(
      month, grid_start, count
    )
  })
}

pub fn year_overview(
  year: i32,
  week_start: WeekStart
) -> anyhow::Result<Vec<MonthGrid>> {
  (1..=12)
    .map(|month| {
      mini_month(
        YearMonth::new(year, month)?,
        week_start
      )
    })
    .collect()
}

/// Days of `grid` inside its month.
pub fn month_days(
  grid: &MonthGrid
) -> impl Iterator<Item = NaiveDate> + '_
{
  grid
    .cells
    .iter()
    .filter(|cell| cell.in_month)
    .map(|cell| cell.date)
}

#[must_use]
pub fn is_weekend(
  date: NaiveDate
) -> bool {
  matches!(
    date.weekday(),
    Weekday::Sat | Weekday::Sun
  )
}

#[cfg(test)]
mod tests {
  use chrono::{
    Datelike,
    NaiveDate,
    Weekday
  };

  use super::{
    GRID_CELLS,
    WeekStart,
    mini_month,
    month_days,
    month_grid,
    year_overview
  };
  use crate::datetime::YearMonth;

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn feb_2024() -> YearMonth {
    YearMonth::new(2024, 2)
      .expect("valid month")
  }

  #[test]
  fn february_2024_monday_start() {
    let grid = month_grid(
      feb_2024(),
      WeekStart::Monday
    )
    .expect("grid");
    assert_eq!(grid.cells.len(), GRID_CELLS);
    assert_eq!(
      grid.first(),
      Some(date(2024, 1, 29))
    );
    assert_eq!(
      grid.last(),
      Some(date(2024, 3, 10))
    );
    let leading: Vec<NaiveDate> = grid
      .cells
      .iter()
      .take_while(|c| !c.in_month)
      .map(|c| c.date)
      .collect();
    assert_eq!(
      leading,
      vec![
        date(2024, 1, 29),
        date(2024, 1, 30),
        date(2024, 1, 31)
      ]
    );
    assert_eq!(
      month_days(&grid).count(),
      29
    );
  }

  #[test]
  fn february_2024_sunday_start() {
    let grid = month_grid(
      feb_2024(),
      WeekStart::Sunday
    )
    .expect("grid");
    assert_eq!(
      grid.first(),
      Some(date(2024, 1, 28))
    );
    assert_eq!(
      grid.last(),
      Some(date(2024, 3, 9))
    );
    assert!(grid.weeks().all(|week| {
      week.len() == 7
        && week[0].date.weekday()
          == Weekday::Sun
    }));
  }

  #[test]
  fn month_starting_on_week_start_has_no_leading_days()
  {
    let sept = YearMonth::new(2024, 9)
      .expect("valid month");
    let grid =
      month_grid(sept, WeekStart::Sunday)
        .expect("grid");
    assert_eq!(
      grid.first(),
      Some(date(2024, 9, 1))
    );
    assert!(grid.cells[0].in_month);
  }

  #[test]
  fn mini_month_stops_at_month_end() {
    let mini =
      mini_month(feb_2024(), WeekStart::Sunday)
        .expect("mini");
    assert_eq!(mini.cells.len(), 33);
    assert_eq!(
      mini.last(),
      Some(date(2024, 2, 29))
    );
  }

  #[test]
  fn year_overview_has_twelve_months() {
    let months =
      year_overview(2024, WeekStart::Sunday)
        .expect("overview");
    assert_eq!(months.len(), 12);
    assert_eq!(
      months[11].month.to_string(),
      "2024-12"
    );
  }

  #[test]
  fn parses_week_start() {
    assert_eq!(
      "Monday"
        .parse::<WeekStart>()
        .expect("monday"),
      WeekStart::Monday
    );
    assert!(
      "friday"
        .parse::<WeekStart>()
        .is_err()
    );
  }
}
