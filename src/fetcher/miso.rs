use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::http::UpstreamRequest;
use super::{reference_ba, select_market, GenerationSource, SourceContext};
use crate::core::normalize::{FuelMap, RawRow, RawTimestamp, Unmapped};
use crate::core::planner::{plan, DayBoundary, Plan};
use crate::core::timeseries::latest_snapshot;
use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market, QuerySpec};
use crate::reference::BalancingAuthority;

const CODE: &str = "MISO";
const DEFAULT_URL: &str = "https://www.misoenergy.org/ria/FuelMix.aspx?CSV=True";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p";

const FUELS: FuelMap = FuelMap {
    entries: &[
        ("Coal", "coal"),
        ("Natural Gas", "natgas"),
        ("Nuclear", "nuclear"),
        ("Wind", "wind"),
        ("Solar", "solar"),
        ("Hydro", "hydro"),
        ("Other", "other"),
    ],
    ignored: &[],
    unmapped: Unmapped::Bucket("other"),
};

/// MISO real-time fuel mix. Only the current interval is published.
pub struct MisoSource {
    ba: &'static BalancingAuthority,
    ctx: SourceContext,
    url: String,
}

impl MisoSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let url = ctx.base_url(CODE, DEFAULT_URL);
        Ok(Self { ba: reference_ba(CODE)?, ctx, url })
    }
}

#[async_trait]
impl GenerationSource for MisoSource {
    fn ba(&self) -> &'static BalancingAuthority {
        self.ba
    }

    fn context(&self) -> &SourceContext {
        &self.ctx
    }

    async fn fetch_generation(&self, query: &QuerySpec) -> Result<Vec<DataPoint>> {
        let market = select_market(CODE, query.market, &[Market::RealTime5Min])?;
        match plan(query, self.ba.timezone, DayBoundary::Local, self.ctx.clock.now())? {
            Plan::Latest => {
                let body = self.ctx.fetch_text(CODE, &UpstreamRequest::get(self.url.clone())).await?;
                let rows = parse_fuel_mix(&body)?;
                let points = self.ctx.normalize(self.ba, &FUELS, market, rows)?;
                Ok(latest_snapshot(points))
            }
            Plan::Window(_) => Err(GenMixError::range(CODE, "only the current interval is published")),
        }
    }
}

/// Long-format CSV: one row per `(INTERVALEST, CATEGORY)` with the MW in `ACT`.
pub(crate) fn parse_fuel_mix(body: &str) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| GenMixError::malformed(CODE, format!("unreadable CSV header: {}", e)))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| GenMixError::malformed(CODE, format!("missing column {}", name)))
    };
    let (ts_col, fuel_col, mw_col) = (column("INTERVALEST")?, column("CATEGORY")?, column("ACT")?);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| GenMixError::malformed(CODE, format!("unreadable CSV row: {}", e)))?;
        let raw_ts = record.get(ts_col).unwrap_or_default();
        let timestamp = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT)
            .map(RawTimestamp::Local)
            .unwrap_or_else(|_| RawTimestamp::Invalid(raw_ts.to_string()));
        rows.push(RawRow::text(
            record.get(fuel_col).unwrap_or_default(),
            record.get(mw_col).unwrap_or_default(),
            timestamp,
        ));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::Normalizer;
    use crate::reference::StaticReference;
    use chrono::{TimeZone, Utc};

    const FIXTURE: &str = "INTERVALEST,CATEGORY,ACT\n\
        2026-10-17 10:05:00 AM,Coal,\"25,010\"\n\
        2026-10-17 10:05:00 AM,Natural Gas,30100.5\n\
        2026-10-17 10:05:00 AM,Wind,9800\n\
        2026-10-17 10:05:00 AM,Storage,-40\n";

    #[test]
    fn test_parse_and_localize_fixed_est() {
        let rows = parse_fuel_mix(FIXTURE).unwrap();
        assert_eq!(rows.len(), 4);

        let ba = StaticReference::ba(CODE).unwrap();
        let (points, report) = Normalizer::new(ba, &FUELS, Market::RealTime5Min, &StaticReference)
            .normalize(rows)
            .unwrap();
        assert_eq!(report.bucketed, 1);
        // EST is UTC-5 even in October.
        let expected = Utc.with_ymd_and_hms(2026, 10, 17, 15, 5, 0).unwrap();
        assert!(points.iter().all(|p| p.timestamp == expected));
        let coal = points.iter().find(|p| p.fuel_name == "coal").unwrap();
        assert_eq!(coal.gen_mw, 25010.0);
        let other = points.iter().find(|p| p.fuel_name == "other").unwrap();
        assert_eq!(other.gen_mw, -40.0);
    }

    #[test]
    fn test_pm_timestamps() {
        let body = "INTERVALEST,CATEGORY,ACT\n2026-10-17 12:30:00 PM,Coal,1\n2026-10-17 12:30:00 AM,Coal,2\n";
        let rows = parse_fuel_mix(body).unwrap();
        let hours: Vec<String> = rows
            .iter()
            .map(|r| match &r.timestamp {
                RawTimestamp::Local(t) => t.format("%H:%M").to_string(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(hours, vec!["12:30", "00:30"]);
    }

    #[test]
    fn test_missing_column_is_malformed() {
        let err = parse_fuel_mix("INTERVALEST,CATEGORY\n2026-10-17 10:05:00 AM,Coal\n").unwrap_err();
        assert_eq!(err.to_string(), "MISO returned a malformed payload: missing column ACT");
    }
}
