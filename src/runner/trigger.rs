//! Calendar-aware trigger rules.
//!
//! A trigger answers one question: given "now", what is the latest nominal
//! slot at or before it? The runner keys "already fired" off that canonical
//! slot timestamp, so evaluating the check at arbitrary real-world intervals
//! never double-fires a slot, and a long scheduler pause fires at most the
//! single most recent missed slot.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::{IngestdError, Result};

/// Days-of-week bitset, Monday = bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn all() -> Self {
        Self(0b0111_1111)
    }

    /// Monday through Friday.
    pub fn weekdays() -> Self {
        Self(0b0001_1111)
    }

    pub fn from_slice(days: &[Weekday]) -> Self {
        let mut bits = 0u8;
        for day in days {
            bits |= 1 << day.num_days_from_monday();
        }
        Self(bits)
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// When a recurring job nominally fires, in a fixed named timezone.
#[derive(Debug, Clone)]
pub enum TriggerRule {
    /// Every `minutes`, restricted to the inclusive `[start, end]`
    /// time-of-day window on the given days.
    Every {
        minutes: u32,
        start: NaiveTime,
        end: NaiveTime,
        days: WeekdaySet,
        tz: Tz,
    },
    /// Once per day at a fixed local time on the given days.
    DailyAt {
        time: NaiveTime,
        days: WeekdaySet,
        tz: Tz,
    },
}

impl TriggerRule {
    pub fn every_minutes(
        minutes: u32,
        start: NaiveTime,
        end: NaiveTime,
        days: WeekdaySet,
        tz: Tz,
    ) -> Result<Self> {
        if minutes == 0 {
            return Err(IngestdError::InvalidTrigger(
                "period must be at least one minute".to_string(),
            ));
        }
        if start > end {
            return Err(IngestdError::InvalidTrigger(format!(
                "window start {} is after end {}",
                start, end
            )));
        }
        if days.is_empty() {
            return Err(IngestdError::InvalidTrigger(
                "day-of-week set is empty".to_string(),
            ));
        }
        Ok(Self::Every {
            minutes,
            start,
            end,
            days,
            tz,
        })
    }

    pub fn daily_at(time: NaiveTime, days: WeekdaySet, tz: Tz) -> Result<Self> {
        if days.is_empty() {
            return Err(IngestdError::InvalidTrigger(
                "day-of-week set is empty".to_string(),
            ));
        }
        Ok(Self::DailyAt { time, days, tz })
    }

    /// The latest nominal slot at or before `now`, as a canonical UTC
    /// instant, or `None` if no slot has ever occurred (within the lookback
    /// horizon).
    ///
    /// Local times that do not exist on a DST-transition day are skipped;
    /// ambiguous local times resolve to the earlier offset.
    pub fn due_slot(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (days, tz) = match self {
            Self::Every { days, tz, .. } => (days, tz),
            Self::DailyAt { days, tz, .. } => (days, tz),
        };
        let today = now.with_timezone(tz).date_naive();

        // Two weeks covers any day-of-week set with at least one member.
        for offset in 0..14 {
            let date = today - Duration::days(offset);
            if !days.contains(date.weekday()) {
                continue;
            }
            let slot = self
                .slots()
                .rev()
                .filter_map(|t| tz.from_local_datetime(&date.and_time(t)).earliest())
                .map(|local| local.with_timezone(&Utc))
                .find(|utc| *utc <= now);
            if let Some(slot) = slot {
                return Some(slot);
            }
        }
        None
    }

    /// Nominal slot times-of-day within one day, in ascending order.
    fn slots(&self) -> impl DoubleEndedIterator<Item = NaiveTime> {
        let (start, step_minutes, count) = match *self {
            Self::Every {
                minutes,
                start,
                end,
                ..
            } => {
                let span = (end - start).num_minutes();
                (start, i64::from(minutes), span / i64::from(minutes) + 1)
            }
            Self::DailyAt { time, .. } => (time, 1, 1),
        };
        (0..count).map(move |i| start + Duration::minutes(i * step_minutes))
    }
}
