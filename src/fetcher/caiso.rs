use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use scraper::{Html, Selector};

use super::http::UpstreamRequest;
use super::{fetch_days, reference_ba, select_market, GenerationSource, SourceContext};
use crate::core::normalize::{FuelMap, RawRow, RawTimestamp, RawValue, Unmapped};
use crate::core::planner::{clip, local_days, plan, DayBoundary, Plan};
use crate::core::timeseries::{latest_snapshot, merge_batches};
use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market, QuerySpec};
use crate::reference::BalancingAuthority;

const CODE: &str = "CAISO";
/// Settings key for the outlook page, separate from the daily report base.
const OUTLOOK_KEY: &str = "CAISO_OUTLOOK";
const DEFAULT_REPORT_BASE: &str = "http://content.caiso.com/green/renewrpt";
const DEFAULT_OUTLOOK_URL: &str = "http://www.caiso.com/outlook/SystemStatus.html";
const OUTLOOK_TIME_FORMAT: &str = "%m/%d/%Y %H:%M";

const DAILY_FUELS: FuelMap = FuelMap {
    entries: &[
        ("GEOTHERMAL", "geo"),
        ("BIOMASS", "biomass"),
        ("BIOGAS", "biogas"),
        ("SMALL HYDRO", "smhydro"),
        ("WIND TOTAL", "wind"),
        ("SOLAR PV", "solarpv"),
        ("SOLAR THERMAL", "solarth"),
        ("SOLAR", "solar"),
        ("NUCLEAR", "nuclear"),
        ("THERMAL", "thermal"),
        ("HYDRO", "hydro"),
    ],
    // Subtotal and interchange columns.
    ignored: &["RENEWABLES", "IMPORTS"],
    unmapped: Unmapped::Drop,
};

const OUTLOOK_FUELS: FuelMap = FuelMap {
    entries: &[("solar", "solar"), ("wind", "wind"), ("renewable", "renewable"), ("other", "other")],
    ignored: &[],
    unmapped: Unmapped::Drop,
};

/// CAISO: Daily Renewables Watch for history, Today's Outlook page for the latest snapshot.
pub struct CaisoSource {
    ba: &'static BalancingAuthority,
    ctx: SourceContext,
    report_base: String,
    outlook_url: String,
}

impl CaisoSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let report_base = ctx.base_url(CODE, DEFAULT_REPORT_BASE);
        let outlook_url = ctx.base_url(OUTLOOK_KEY, DEFAULT_OUTLOOK_URL);
        Ok(Self { ba: reference_ba(CODE)?, ctx, report_base, outlook_url })
    }

    fn report_url(&self, day: NaiveDate) -> String {
        format!(
            "{}/{}_DailyRenewablesWatch.txt",
            self.report_base.trim_end_matches('/'),
            day.format("%Y%m%d")
        )
    }

    async fn fetch_report(&self, day: NaiveDate, market: Market) -> Result<Option<Vec<DataPoint>>> {
        let request = UpstreamRequest::get(self.report_url(day));
        let Some(body) = self.ctx.fetch_optional(CODE, &request).await? else {
            return Ok(None);
        };
        let rows = parse_daily_report(&body, day)?;
        self.ctx.normalize(self.ba, &DAILY_FUELS, market, rows).map(Some)
    }

    async fn fetch_outlook(&self, market: Market) -> Result<Vec<DataPoint>> {
        let body = self.ctx.fetch_text(CODE, &UpstreamRequest::get(self.outlook_url.clone())).await?;
        let rows = parse_outlook(&body)?;
        self.ctx.normalize(self.ba, &OUTLOOK_FUELS, market, rows)
    }
}

#[async_trait]
impl GenerationSource for CaisoSource {
    fn ba(&self) -> &'static BalancingAuthority {
        self.ba
    }

    fn context(&self) -> &SourceContext {
        &self.ctx
    }

    fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(120)
    }

    async fn fetch_generation(&self, query: &QuerySpec) -> Result<Vec<DataPoint>> {
        let tz = self.ba.timezone;
        match plan(query, tz, DayBoundary::Local, self.ctx.clock.now())? {
            Plan::Latest => {
                let market = select_market(CODE, query.market, &[Market::RealTime10Min])?;
                Ok(latest_snapshot(self.fetch_outlook(market).await?))
            }
            Plan::Window(window) => {
                let market = select_market(CODE, query.market, &[Market::RealTimeHourly])?;
                let days = local_days(&window, tz);
                let batches = fetch_days(CODE, days, |day| self.fetch_report(day, market)).await?;
                Ok(clip(merge_batches(batches), &window))
            }
        }
    }
}

/// Parses both hourly tables of a Daily Renewables Watch file.
///
/// Each table starts with a tab-separated header whose first named cell is
/// `Hour`; data rows carry hour-ending 1..=24 in the same column. Hour ending
/// `n` is stamped at local `n-1:00` on `day`.
pub(crate) fn parse_daily_report(body: &str, day: NaiveDate) -> Result<Vec<RawRow>> {
    let mut rows = Vec::new();
    let mut tables = 0;
    // (hour column, [(column, label)])
    let mut layout: Option<(usize, Vec<(usize, String)>)> = None;

    for line in body.lines() {
        let cells: Vec<&str> = line.split('\t').map(str::trim).collect();

        if let Some(hour_col) = cells.iter().position(|c| c.eq_ignore_ascii_case("Hour")) {
            let labels = cells
                .iter()
                .enumerate()
                .filter(|(idx, c)| *idx != hour_col && !c.is_empty())
                .map(|(idx, c)| (idx, c.to_string()))
                .collect();
            layout = Some((hour_col, labels));
            tables += 1;
            continue;
        }

        let Some(hour_col) = layout.as_ref().map(|(col, _)| *col) else { continue };
        let Some(hour_ending) = cells.get(hour_col).and_then(|c| c.parse::<u32>().ok()) else {
            if cells.iter().all(|c| c.is_empty()) {
                layout = None;
            }
            continue;
        };
        let Some((_, labels)) = &layout else { continue };
        let timestamp = RawTimestamp::hour_ending(day, hour_ending);

        for (idx, label) in labels {
            let value = cells.get(*idx).copied().unwrap_or_default();
            rows.push(RawRow::text(label.clone(), value, timestamp.clone()));
        }
    }

    if tables == 0 {
        return Err(GenMixError::malformed(CODE, "no hourly tables found"));
    }
    Ok(rows)
}

/// Scrapes the outlook page and derives `renewable` and `other` from the totals.
pub(crate) fn parse_outlook(body: &str) -> Result<Vec<RawRow>> {
    let document = Html::parse_document(body);
    let text_of = |id: &str| -> Result<String> {
        let selector = Selector::parse(&format!("#{}", id))
            .map_err(|e| GenMixError::malformed(CODE, format!("bad selector #{}: {:?}", id, e)))?;
        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .ok_or_else(|| GenMixError::malformed(CODE, format!("missing element #{}", id)))
    };
    let mw_of = |id: &str| -> Result<f64> {
        let raw = text_of(id)?;
        RawValue::Text(raw.clone())
            .resolve()
            .ok_or_else(|| GenMixError::malformed(CODE, format!("#{} is not a MW value: '{}'", id, raw)))
    };

    let raw_time = text_of("docdate")?;
    let timestamp = NaiveDateTime::parse_from_str(&raw_time, OUTLOOK_TIME_FORMAT)
        .map(RawTimestamp::Local)
        .map_err(|_| GenMixError::malformed(CODE, format!("unreadable docdate '{}'", raw_time)))?;

    let demand = mw_of("currentsystemdemand")?;
    let renewables = mw_of("totalrenewables")?;
    let solar = mw_of("currentsolar")?;
    let wind = mw_of("currentwind")?;

    Ok(vec![
        RawRow::number("solar", solar, timestamp.clone()),
        RawRow::number("wind", wind, timestamp.clone()),
        RawRow::number("renewable", renewables - solar - wind, timestamp.clone()),
        RawRow::number("other", demand - renewables, timestamp),
    ])
}
