use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use super::http::UpstreamRequest;
use super::{reference_ba, select_market, GenerationSource, SourceContext};
use crate::core::normalize::{FuelMap, RawRow, RawTimestamp, Unmapped};
use crate::core::planner::{check_coverage, clip, plan, DayBoundary, Plan};
use crate::core::timeseries::latest_snapshot;
use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market, QuerySpec};
use crate::reference::BalancingAuthority;

const CODE: &str = "SPP";
const DEFAULT_BASE_URL: &str = "http://www.spp.org/GenerationMix/";
const TIMESTAMP_COLUMN: &str = "GMTTime";

// Newer files split each fuel into "Market" and "Self" scheduled columns; both count.
const FUELS: FuelMap = FuelMap {
    entries: &[
        ("Coal", "coal"),
        ("Coal Market", "coal"),
        ("Coal Self", "coal"),
        ("Diesel Fuel Oil", "oil"),
        ("Diesel Fuel Oil Market", "oil"),
        ("Diesel Fuel Oil Self", "oil"),
        ("Hydro", "hydro"),
        ("Hydro Market", "hydro"),
        ("Hydro Self", "hydro"),
        ("Natural Gas", "natgas"),
        ("Natural Gas Market", "natgas"),
        ("Natural Gas Self", "natgas"),
        ("Nuclear", "nuclear"),
        ("Nuclear Market", "nuclear"),
        ("Nuclear Self", "nuclear"),
        ("Solar", "solar"),
        ("Solar Market", "solar"),
        ("Solar Self", "solar"),
        ("Wind", "wind"),
        ("Wind Market", "wind"),
        ("Wind Self", "wind"),
        ("Waste Disposal Services", "refuse"),
        ("Waste Disposal Services Market", "refuse"),
        ("Waste Disposal Services Self", "refuse"),
        ("Other", "other"),
    ],
    ignored: &["Load", "Load Market", "Load Self"],
    unmapped: Unmapped::Bucket("other"),
};

/// Southwest Power Pool generation mix rolling files (hourly and five-minute).
pub struct SppSource {
    ba: &'static BalancingAuthority,
    ctx: SourceContext,
    base_url: String,
}

impl SppSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let base_url = ctx.base_url(CODE, DEFAULT_BASE_URL);
        Ok(Self { ba: reference_ba(CODE)?, ctx, base_url })
    }

    fn file_url(&self, market: Market) -> String {
        let file = match market {
            Market::RealTime5Min => "GenMix5Minute.csv",
            _ => "GenMix_Hourly.csv",
        };
        format!("{}/{}", self.base_url.trim_end_matches('/'), file)
    }

    async fn fetch_file(&self, market: Market) -> Result<Vec<DataPoint>> {
        let body = self.ctx.fetch_text(CODE, &UpstreamRequest::get(self.file_url(market))).await?;
        let rows = parse_generation_mix(&body)?;
        self.ctx.normalize(self.ba, &FUELS, market, rows)
    }
}

#[async_trait]
impl GenerationSource for SppSource {
    fn ba(&self) -> &'static BalancingAuthority {
        self.ba
    }

    fn context(&self) -> &SourceContext {
        &self.ctx
    }

    async fn fetch_generation(&self, query: &QuerySpec) -> Result<Vec<DataPoint>> {
        let market = select_market(CODE, query.market, &[Market::RealTimeHourly, Market::RealTime5Min])?;
        match plan(query, self.ba.timezone, DayBoundary::Utc, self.ctx.clock.now())? {
            Plan::Latest => Ok(latest_snapshot(self.fetch_file(market).await?)),
            Plan::Window(window) => {
                let points = self.fetch_file(market).await?;
                check_coverage(CODE, &window, &points, market.frequency().interval())?;
                Ok(clip(points, &window))
            }
        }
    }
}

/// Wide CSV: one row per interval, one column per fuel.
pub(crate) fn parse_generation_mix(body: &str) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| GenMixError::malformed(CODE, format!("unreadable CSV header: {}", e)))?
        .clone();
    let ts_col = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(TIMESTAMP_COLUMN))
        .ok_or_else(|| GenMixError::malformed(CODE, format!("missing column {}", TIMESTAMP_COLUMN)))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| GenMixError::malformed(CODE, format!("unreadable CSV row: {}", e)))?;
        let raw_ts = record.get(ts_col).unwrap_or_default();
        if raw_ts.is_empty() {
            continue;
        }
        let timestamp = parse_gmt(raw_ts);
        for (idx, label) in headers.iter().enumerate() {
            if idx == ts_col || label.is_empty() {
                continue;
            }
            rows.push(RawRow::text(label, record.get(idx).unwrap_or_default(), timestamp.clone()));
        }
    }
    Ok(rows)
}

fn parse_gmt(raw: &str) -> RawTimestamp {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return RawTimestamp::Utc(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| RawTimestamp::Utc(naive.and_utc()))
        .unwrap_or_else(|| RawTimestamp::Invalid(raw.to_string()))
}
