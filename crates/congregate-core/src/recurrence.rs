use std::fmt;

use anyhow::anyhow;
use chrono::{
  Datelike,
  NaiveDate,
  Weekday
};
use tracing::trace;

use crate::datetime::{
  weekday_from_number,
  weekday_label,
  weekday_number
};
use crate::model::{
  CalendarEvent,
  ProjectedOccurrence
};

/// Stored weekday number, 0 = Sunday
/// through 6 = Saturday.
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
pub struct RecurrenceDay(u8);

impl RecurrenceDay {
  pub fn new(
    day: u8
  ) -> anyhow::Result<Self> {
    if day > 6 {
      return Err(anyhow!(
        "recurrence_day out of range \
         0-6: {day}"
      ));
    }
    Ok(Self(day))
  }

  #[must_use]
  pub fn of(date: NaiveDate) -> Self {
    Self(weekday_number(date))
  }

  #[must_use]
  pub fn number(self) -> u8 {
    self.0
  }

  #[must_use]
  pub fn weekday(self) -> Weekday {
    weekday_from_number(self.0)
      .unwrap_or(Weekday::Sun)
  }
}

impl From<Weekday> for RecurrenceDay {
  fn from(day: Weekday) -> Self {
    Self(
      day.num_days_from_sunday() as u8
    )
  }
}

impl fmt::Display for RecurrenceDay {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(weekday_label(
      self.weekday()
    ))
  }
}

/// The validated recurrence part of a
/// calendar event.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct RecurrenceRule {
  pub day:  RecurrenceDay,
  pub year: Option<i32>
}

impl RecurrenceRule {
  pub fn from_event(
    event: &CalendarEvent
  ) -> anyhow::Result<Self> {
    if !event.is_recurring {
      return Err(anyhow!(
        "event {} is not recurring",
        event.id
      ));
    }
    let raw = event
      .recurrence_day
      .ok_or_else(|| {
        anyhow!(
          "recurring event {} has no \
           recurrence_day",
          event.id
        )
      })?;
    let day = RecurrenceDay::new(raw)
      .map_err(|err| {
        anyhow!(
          "event {}: {err}",
          event.id
        )
      })?;
    Ok(Self {
      day,
      year: event.recurrence_year
    })
  }

  #[must_use]
  pub fn matches(
    &self,
    date: NaiveDate
  ) -> bool {
    RecurrenceDay::of(date) == self.day
      && self
        .year
        .is_none_or(|y| date.year() == y)
  }
}

pub fn occurs_on(
  event: &CalendarEvent,
  date: NaiveDate
) -> anyhow::Result<bool> {
  Ok(
    RecurrenceRule::from_event(event)?
      .matches(date)
  )
}

/// Every date in `[start, end]` on
/// which `event` recurs, ascending.
///
/// A year pin is a hard filter: a pinned
/// event yields nothing outside its
/// year.
#[tracing::instrument(skip(event), fields(id = %event.id))]
pub fn project(
  event: &CalendarEvent,
  start: NaiveDate,
  end: NaiveDate
) -> anyhow::Result<
  Vec<ProjectedOccurrence>
> {
  let rule =
    RecurrenceRule::from_event(event)?;

  let mut out = Vec::new();
  let mut day = start;
  while day <= end {
    if rule.matches(day) {
      trace!(date = %day, "recurring occurrence");
      out.push(
        ProjectedOccurrence::recurring(
          event, day
        )
      );
    }
    let Some(next) = day.succ_opt()
    else {
      break;
    };
    day = next;
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use chrono::{
    Datelike,
    NaiveDate
  };

  use super::{
    RecurrenceDay,
    occurs_on,
    project
  };
  use crate::datetime::add_days;
  use crate::model::CalendarEvent;

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn weekly(
    day: u8,
    year: Option<i32>
  ) -> CalendarEvent {
    let mut event =
      CalendarEvent::new_recurring(
        "Culto".to_string(),
        date(2024, 1, 7),
        day,
        year
      );
    event.id = "culto".to_string();
    event
  }

  #[test]
  fn projects_every_matching_weekday() {
    let event = weekly(0, None);
    let out = project(
      &event,
      date(2024, 6, 1),
      date(2024, 6, 30)
    )
    .expect("project");

    let days: Vec<u32> = out
      .iter()
      .map(|o| o.date.day())
      .collect();
    assert_eq!(
      days,
      vec![2, 9, 16, 23, 30]
    );
    assert_eq!(
      out[0].id,
      "culto-2024-06-02"
    );
    assert_eq!(out[0].source_id, "culto");
    assert!(
      out.iter().all(|o| {
        o.is_recurring_instance
      })
    );
  }

  #[test]
  fn count_is_floor_or_ceil_of_weeks() {
    let start = date(2024, 3, 5);
    for len in 1_i64..60 {
      let end = add_days(start, len - 1);
      for day in 0..7 {
        let out = project(
          &weekly(day, None),
          start,
          end
        )
        .expect("project");
        let floor = (len / 7) as usize;
        assert!(
          out.len() == floor
            || out.len() == floor + 1,
          "len {len} day {day}: {}",
          out.len()
        );
        assert!(out.iter().all(|o| {
          RecurrenceDay::of(o.date)
            .number()
            == day
        }));
      }
    }
  }

  #[test]
  fn year_pin_is_a_hard_filter() {
    let pinned = weekly(3, Some(2025));
    let outside = project(
      &pinned,
      date(2024, 1, 1),
      date(2024, 12, 31)
    )
    .expect("project");
    assert!(outside.is_empty());

    let inside = project(
      &pinned,
      date(2025, 3, 1),
      date(2025, 3, 31)
    )
    .expect("project");
    let unpinned = project(
      &weekly(3, None),
      date(2025, 3, 1),
      date(2025, 3, 31)
    )
    .expect("project");
    assert_eq!(
      inside.len(),
      unpinned.len()
    );

    let straddle = project(
      &pinned,
      date(2024, 12, 20),
      date(2025, 1, 10)
    )
    .expect("project");
    assert!(straddle.iter().all(|o| {
      o.date.year() == 2025
    }));
    assert_eq!(straddle.len(), 2);
  }

  #[test]
  fn out_of_range_day_is_an_error() {
    let mut event = weekly(0, None);
    event.recurrence_day = Some(7);
    assert!(
      project(
        &event,
        date(2024, 6, 1),
        date(2024, 6, 30)
      )
      .is_err()
    );

    event.recurrence_day = None;
    assert!(
      occurs_on(&event, date(2024, 6, 2))
        .is_err()
    );
  }

  #[test]
  fn inverted_interval_is_empty() {
    let out = project(
      &weekly(0, None),
      date(2024, 6, 30),
      date(2024, 6, 1)
    )
    .expect("project");
    assert!(out.is_empty());
  }
}
