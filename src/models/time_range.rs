use chrono::{DateTime, Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// Anchor for building a range: an absolute instant or a signed offset from now
///
/// Offsets count days for [`TimeRange::day`] and months for [`TimeRange::month`];
/// `0` is the current day/month, negative values lie in the past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePoint {
    At(NaiveDateTime),
    Offset(i64),
}

impl From<NaiveDateTime> for TimePoint {
    fn from(value: NaiveDateTime) -> Self {
        TimePoint::At(value)
    }
}

impl From<NaiveDate> for TimePoint {
    fn from(value: NaiveDate) -> Self {
        TimePoint::At(value.and_time(NaiveTime::MIN))
    }
}

impl From<i32> for TimePoint {
    fn from(value: i32) -> Self {
        TimePoint::Offset(value as i64)
    }
}

impl From<i64> for TimePoint {
    fn from(value: i64) -> Self {
        TimePoint::Offset(value)
    }
}

/// Closed date window `[start, end]`, always `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TimeRange {
    /// Builds a range from explicit bounds, `None` if `start > end`
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The calendar day containing `point`, from 00:00:00.000000 to 23:59:59.999999
    ///
    /// An integer offset is resolved against the wall clock at call time.
    /// Offsets past the calendar limits clamp to the first or last
    /// representable day.
    pub fn day(point: impl Into<TimePoint>) -> Self {
        let date = match point.into() {
            TimePoint::At(at) => at.date(),
            TimePoint::Offset(days) => Duration::try_days(days)
                .and_then(|offset| now().checked_add_signed(offset))
                .map(|at| at.date())
                .unwrap_or(if days >= 0 { NaiveDate::MAX } else { NaiveDate::MIN }),
        };
        Self::covering(date, date)
    }

    /// The calendar month containing `point`
    pub fn month(point: impl Into<TimePoint>) -> Self {
        let anchor = match point.into() {
            TimePoint::At(at) => at,
            TimePoint::Offset(months) => shift_months(now(), months),
        };
        let first = anchor.date().with_day(1).unwrap_or(anchor.date());
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX);
        Self::covering(first, last)
    }

    /// Range spanning whole days from `first` through `last`
    pub fn covering(first: NaiveDate, last: NaiveDate) -> Self {
        let (first, last) = if first <= last {
            (first, last)
        } else {
            (last, first)
        };
        Self {
            start: first.and_time(NaiveTime::MIN),
            end: end_of_day(last),
        }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at <= self.end
    }

    /// Calendar days touched by the range, in ascending order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.end.date();
        self.start
            .date()
            .iter_days()
            .take_while(move |day| *day <= last)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_micro_opt(23, 59, 59, 999_999)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN))
}

fn shift_months(at: NaiveDateTime, months: i64) -> NaiveDateTime {
    let amount = Months::new(months.unsigned_abs().min(u32::MAX as u64) as u32);
    let shifted = if months >= 0 {
        at.checked_add_months(amount)
    } else {
        at.checked_sub_months(amount)
    };
    shifted.unwrap_or(if months >= 0 {
        NaiveDateTime::MAX
    } else {
        NaiveDateTime::MIN
    })
}

/// Parses the `timestamp` field of a reading
///
/// Accepts RFC 3339, ISO 8601 with `T` or space separator and optional
/// fraction, and bare dates. Offsets are dropped after conversion to the
/// writer's wall clock.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}
