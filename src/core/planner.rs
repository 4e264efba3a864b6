//! Query planning shared by every adapter.
//!
//! A [`QuerySpec`] is reduced to either a latest-snapshot request or a concrete
//! UTC window. Adapters then split windows into the upstream's own units
//! (local operating days, rolling files) with the helpers below.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, QueryMode, QuerySpec};

/// How an upstream source buckets its data into days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBoundary {
    Utc,
    /// The BA's local operating day.
    Local,
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Latest,
    Window(TimeWindow),
}

pub fn plan(query: &QuerySpec, tz: Tz, boundary: DayBoundary, now: DateTime<Utc>) -> Result<Plan> {
    query.validate()?;
    Ok(match &query.mode {
        QueryMode::Latest => Plan::Latest,
        QueryMode::Yesterday => Plan::Window(yesterday_window(tz, boundary, now)),
        QueryMode::Range { start_at, end_at } => Plan::Window(TimeWindow { start: *start_at, end: *end_at }),
    })
}

/// First instant of `date` in `tz`, as UTC.
pub fn day_start(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    // A handful of zones skip local midnight on DST days; walk forward to the first valid time.
    for hour in 0..3 {
        let candidate = midnight + Duration::hours(hour);
        if let Some(t) = tz.from_local_datetime(&candidate).earliest() {
            return t.with_timezone(&Utc);
        }
    }
    Utc.from_utc_datetime(&midnight)
}

pub fn yesterday_window(tz: Tz, boundary: DayBoundary, now: DateTime<Utc>) -> TimeWindow {
    let zone = match boundary {
        DayBoundary::Local => tz,
        DayBoundary::Utc => Tz::UTC,
    };
    let today = now.with_timezone(&zone).date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);
    TimeWindow {
        start: day_start(yesterday, zone),
        end: day_start(today, zone),
    }
}

/// Calendar days in `tz` that overlap the window, in chronological order.
pub fn local_days(window: &TimeWindow, tz: Tz) -> Vec<NaiveDate> {
    let first = window.start.with_timezone(&tz).date_naive();
    let last = (window.end - Duration::nanoseconds(1)).with_timezone(&tz).date_naive();
    first.iter_days().take_while(|d| *d <= last).collect()
}

pub fn clip(points: Vec<DataPoint>, window: &TimeWindow) -> Vec<DataPoint> {
    points.into_iter().filter(|p| window.contains(p.timestamp)).collect()
}

/// Checks a rolling upstream file against the requested window.
///
/// No overlap at all fails with `RangeUnavailable`. A partial overlap is served
/// and the missing span is logged.
pub fn check_coverage(
    ba: &'static str,
    window: &TimeWindow,
    points: &[DataPoint],
    step: Duration,
) -> Result<()> {
    let (Some(first), Some(last)) = (
        points.iter().map(|p| p.timestamp).min(),
        points.iter().map(|p| p.timestamp).max(),
    ) else {
        return Err(GenMixError::range(ba, "upstream file contained no data"));
    };

    if window.end <= first || window.start > last {
        return Err(GenMixError::range(
            ba,
            format!(
                "requested [{}, {}) but upstream only covers [{}, {}]",
                window.start, window.end, first, last
            ),
        ));
    }
    if window.start < first {
        tracing::warn!(ba, requested_start = %window.start, available_from = %first,
            "partial coverage: upstream no longer retains the start of the window");
    }
    if window.end > last + step {
        tracing::warn!(ba, requested_end = %window.end, available_to = %last,
            "partial coverage: upstream has not published the end of the window yet");
    }
    Ok(())
}
