use async_trait::async_trait;
use chrono::{Duration, DurationRound, NaiveDate, Timelike};
use scraper::{Html, Selector};

use super::http::UpstreamRequest;
use super::{fetch_days, reference_ba, select_market, GenerationSource, SourceContext};
use crate::core::normalize::{FuelMap, RawRow, RawTimestamp, RawValue, Unmapped};
use crate::core::planner::{clip, local_days, plan, DayBoundary, Plan};
use crate::core::timeseries::{latest_snapshot, merge_batches};
use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market, QuerySpec};
use crate::reference::BalancingAuthority;

const CODE: &str = "ERCOT";
const DEFAULT_BASE_URL: &str = "https://www.ercot.com/content/cdr/html";

/// Minutes past the hour at which the previous hour's wind actuals appear.
pub const WIND_PUBLISH_MINUTE: u32 = 32;

const HOUR_COLUMN: &str = "Hour Ending";
const LOAD_COLUMNS: &[&str] = &["TOTAL", "ERCOT"];
const WIND_COLUMNS: &[&str] = &["System Wide", "Total Wind Output", "ACTUAL_SYSTEM_WIDE"];

const FUELS: FuelMap = FuelMap {
    entries: &[("wind", "wind"), ("nonwind", "nonwind")],
    ignored: &[],
    unmapped: Unmapped::Drop,
};

/// One `Hour Ending` row of an ERCOT hourly table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HourlyValue {
    pub hour_ending: u32,
    /// Second occurrence of the hour on the DST fall-back day (marked `02*`).
    pub repeated: bool,
    pub value: String,
}

/// ERCOT hourly load and wind actuals. Only `wind` and `nonwind` are published.
pub struct ErcotSource {
    ba: &'static BalancingAuthority,
    ctx: SourceContext,
    base_url: String,
}

impl ErcotSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let base_url = ctx.base_url(CODE, DEFAULT_BASE_URL);
        Ok(Self { ba: reference_ba(CODE)?, ctx, base_url })
    }

    fn table_url(&self, day: NaiveDate, table: &str) -> String {
        format!("{}/{}_{}.html", self.base_url.trim_end_matches('/'), day.format("%Y%m%d"), table)
    }

    /// Raw rows for one operating day, or `None` when either table is not published.
    async fn fetch_day_rows(&self, day: NaiveDate) -> Result<Option<Vec<RawRow>>> {
        let load_req = UpstreamRequest::get(self.table_url(day, "actual_loads_of_forecast_zones"));
        let wind_req = UpstreamRequest::get(self.table_url(day, "hourly_wind_output"));
        let (load, wind) = futures::try_join!(
            self.ctx.fetch_optional(CODE, &load_req),
            self.ctx.fetch_optional(CODE, &wind_req)
        )?;
        let (Some(load), Some(wind)) = (load, wind) else {
            return Ok(None);
        };

        let load = parse_hourly_table(&load, LOAD_COLUMNS)?;
        let wind = parse_hourly_table(&wind, WIND_COLUMNS)?;
        Ok(Some(derive_rows(day, &load, &wind)))
    }

    async fn fetch_day(&self, day: NaiveDate, market: Market) -> Result<Option<Vec<DataPoint>>> {
        match self.fetch_day_rows(day).await? {
            Some(rows) => self.ctx.normalize(self.ba, &FUELS, market, rows).map(Some),
            None => Ok(None),
        }
    }

    async fn fetch_latest(&self, market: Market) -> Result<Vec<DataPoint>> {
        let now = self.ctx.clock.now();
        let local_now = now.with_timezone(&self.ba.timezone);
        if local_now.minute() < WIND_PUBLISH_MINUTE {
            tracing::debug!(ba = CODE, minute = local_now.minute(), "wind actuals not yet published for the last hour");
            return Ok(Vec::new());
        }

        // Start of the hour that just completed. HE24 lands on the previous operating day.
        let current_hour = now
            .duration_trunc(Duration::hours(1))
            .map_err(|e| GenMixError::InvalidQuery(format!("cannot truncate {}: {}", now, e)))?;
        let target = current_hour - Duration::hours(1);
        let day = target.with_timezone(&self.ba.timezone).date_naive();

        let Some(rows) = self.fetch_day_rows(day).await? else {
            return Err(GenMixError::upstream(
                CODE,
                format!("hourly tables for {} not published {} minutes past the hour", day, local_now.minute()),
            ));
        };
        let points: Vec<DataPoint> = self
            .ctx
            .normalize(self.ba, &FUELS, market, rows)?
            .into_iter()
            .filter(|p| p.timestamp == target)
            .collect();
        if points.is_empty() {
            return Err(GenMixError::upstream(CODE, format!("completed hour {} missing from {} tables", target, day)));
        }
        Ok(latest_snapshot(points))
    }
}

#[async_trait]
impl GenerationSource for ErcotSource {
    fn ba(&self) -> &'static BalancingAuthority {
        self.ba
    }

    fn context(&self) -> &SourceContext {
        &self.ctx
    }

    async fn fetch_generation(&self, query: &QuerySpec) -> Result<Vec<DataPoint>> {
        let market = select_market(CODE, query.market, &[Market::RealTimeHourly])?;
        let tz = self.ba.timezone;
        match plan(query, tz, DayBoundary::Local, self.ctx.clock.now())? {
            Plan::Latest => self.fetch_latest(market).await,
            Plan::Window(window) => {
                let days = local_days(&window, tz);
                let batches = fetch_days(CODE, days, |day| self.fetch_day(day, market)).await?;
                Ok(clip(merge_batches(batches), &window))
            }
        }
    }
}

/// Accepts `1`, `01`, `01:00`, `24:00` and the fall-back marker `02*`.
pub(crate) fn parse_hour_ending(raw: &str) -> Option<(u32, bool)> {
    let raw = raw.trim();
    let repeated = raw.ends_with('*');
    let hour = raw.trim_end_matches('*').split(':').next()?.trim().parse::<u32>().ok()?;
    (1..=24).contains(&hour).then_some((hour, repeated))
}

/// Reads the `Hour Ending` column and the first matching value column of an HTML table.
pub(crate) fn parse_hourly_table(body: &str, value_columns: &[&str]) -> Result<Vec<HourlyValue>> {
    let document = Html::parse_document(body);
    let row_selector = Selector::parse("tr").map_err(|e| GenMixError::malformed(CODE, format!("{:?}", e)))?;
    let cell_selector = Selector::parse("th, td").map_err(|e| GenMixError::malformed(CODE, format!("{:?}", e)))?;

    let mut columns: Option<(usize, usize)> = None;
    let mut values = Vec::new();

    for tr in document.select(&row_selector) {
        let cells: Vec<String> = tr
            .select(&cell_selector)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();

        match columns {
            None => {
                let hour = cells.iter().position(|c| c.eq_ignore_ascii_case(HOUR_COLUMN));
                let value = cells
                    .iter()
                    .position(|c| value_columns.iter().any(|name| c.eq_ignore_ascii_case(name)));
                if let (Some(hour), Some(value)) = (hour, value) {
                    columns = Some((hour, value));
                }
            }
            Some((hour_col, value_col)) => {
                let Some((hour_ending, repeated)) = cells.get(hour_col).and_then(|c| parse_hour_ending(c)) else {
                    continue;
                };
                values.push(HourlyValue {
                    hour_ending,
                    repeated,
                    value: cells.get(value_col).cloned().unwrap_or_default(),
                });
            }
        }
    }

    if columns.is_none() {
        return Err(GenMixError::malformed(
            CODE,
            format!("no table with '{}' and one of {:?}", HOUR_COLUMN, value_columns),
        ));
    }
    Ok(values)
}

/// Pairs load and wind by hour and emits `wind` and `nonwind = load - wind`.
pub(crate) fn derive_rows(day: NaiveDate, load: &[HourlyValue], wind: &[HourlyValue]) -> Vec<RawRow> {
    let mut rows = Vec::new();
    for l in load {
        let Some(w) = wind.iter().find(|w| w.hour_ending == l.hour_ending && w.repeated == l.repeated) else {
            continue;
        };
        let mut timestamp = RawTimestamp::hour_ending(day, l.hour_ending);
        if l.repeated {
            timestamp = timestamp.repeated();
        }
        let wind_value = RawValue::Text(w.value.clone());
        let nonwind = match (RawValue::Text(l.value.clone()).resolve(), wind_value.resolve()) {
            (Some(load_mw), Some(wind_mw)) => RawValue::Number(load_mw - wind_mw),
            _ => RawValue::Text(String::new()),
        };
        rows.push(RawRow { label: "wind".into(), value: wind_value, timestamp: timestamp.clone(), market: None });
        rows.push(RawRow { label: "nonwind".into(), value: nonwind, timestamp, market: None });
    }
    rows
}
