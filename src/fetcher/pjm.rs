use async_trait::async_trait;
use chrono::NaiveDateTime;
use scraper::{Html, Selector};
use serde_json::Value;

use super::http::UpstreamRequest;
use super::{reference_ba, select_market, GenerationSource, SourceContext};
use crate::core::normalize::{FuelMap, RawRow, RawTimestamp, RawValue, Unmapped};
use crate::core::planner::{plan, DayBoundary, Plan};
use crate::core::timeseries::latest_snapshot;
use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market, QuerySpec};
use crate::reference::BalancingAuthority;

const CODE: &str = "PJM";
const DEFAULT_URL: &str = "https://www.pjm.com/markets-and-operations.aspx";
const SNAPSHOT_SELECTOR: &str = "script#pjm-rt-snapshot";
const RTO_AREA: &str = "PJM RTO";
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

const FUELS: FuelMap = FuelMap {
    entries: &[("wind", "wind"), ("nonwind", "nonwind")],
    ignored: &[],
    unmapped: Unmapped::Drop,
};

/// PJM real-time snapshot embedded in the markets & operations page.
pub struct PjmSource {
    ba: &'static BalancingAuthority,
    ctx: SourceContext,
    url: String,
}

impl PjmSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let url = ctx.base_url(CODE, DEFAULT_URL);
        Ok(Self { ba: reference_ba(CODE)?, ctx, url })
    }
}

#[async_trait]
impl GenerationSource for PjmSource {
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
                let rows = parse_snapshot(&body)?;
                Ok(latest_snapshot(self.ctx.normalize(self.ba, &FUELS, market, rows)?))
            }
            Plan::Window(_) => Err(GenMixError::range(CODE, "only the current snapshot is published")),
        }
    }
}

fn mw_value(value: &Value) -> RawValue {
    match value {
        Value::Number(n) => n.as_f64().map(RawValue::Number).unwrap_or(RawValue::Text(n.to_string())),
        Value::String(s) => RawValue::Text(s.clone()),
        _ => RawValue::Text(String::new()),
    }
}

/// Extracts the embedded JSON and derives `wind` and `nonwind = RTO load - wind`.
pub(crate) fn parse_snapshot(body: &str) -> Result<Vec<RawRow>> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(SNAPSHOT_SELECTOR)
        .map_err(|e| GenMixError::malformed(CODE, format!("bad selector: {:?}", e)))?;
    let script = document
        .select(&selector)
        .next()
        .ok_or_else(|| GenMixError::malformed(CODE, "snapshot script not found"))?;

    let json: Value = serde_json::from_str(script.text().collect::<String>().trim())
        .map_err(|e| GenMixError::malformed(CODE, format!("invalid snapshot JSON: {}", e)))?;

    let raw_ts = json["timestamp"]
        .as_str()
        .ok_or_else(|| GenMixError::malformed(CODE, "snapshot has no timestamp"))?;
    let timestamp = TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw_ts, fmt).ok())
        .map(RawTimestamp::Local)
        .unwrap_or_else(|| RawTimestamp::Invalid(raw_ts.to_string()));

    let loads = json["instantaneousLoad"]
        .as_array()
        .ok_or_else(|| GenMixError::malformed(CODE, "snapshot has no instantaneousLoad list"))?;
    let rto_load = loads
        .iter()
        .find(|entry| entry["area"].as_str().is_some_and(|a| a.trim().eq_ignore_ascii_case(RTO_AREA)))
        .map(|entry| mw_value(&entry["mw"]))
        .ok_or_else(|| GenMixError::malformed(CODE, format!("no '{}' load entry", RTO_AREA)))?;
    let wind = mw_value(&json["windGeneration"]["mw"]);

    let nonwind = match (rto_load.resolve(), wind.resolve()) {
        (Some(load), Some(wind)) => RawValue::Number(load - wind),
        _ => RawValue::Text(String::new()),
    };

    Ok(vec![
        RawRow { label: "wind".into(), value: wind, timestamp: timestamp.clone(), market: None },
        RawRow { label: "nonwind".into(), value: nonwind, timestamp, market: None },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::Normalizer;
    use crate::reference::StaticReference;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn page(snapshot: &Value) -> String {
        format!(
            "<html><head><script id=\"pjm-rt-snapshot\" type=\"application/json\">{}</script></head><body></body></html>",
            snapshot
        )
    }

    fn snapshot() -> Value {
        json!({
            "timestamp": "2026-10-17 10:35",
            "instantaneousLoad": [
                {"area": "Mid-Atlantic", "mw": "30,000"},
                {"area": "PJM RTO", "mw": "85,123"}
            ],
            "windGeneration": {"mw": "3,210"}
        })
    }

    #[test]
    fn test_derives_wind_and_nonwind() {
        let rows = parse_snapshot(&page(&snapshot())).unwrap();
        let ba = StaticReference::ba(CODE).unwrap();
        let (points, _) = Normalizer::new(ba, &FUELS, Market::RealTime5Min, &StaticReference)
            .normalize(rows)
            .unwrap();
        assert_eq!(points.len(), 2);
        // 10:35 EDT is 14:35 UTC.
        let expected = Utc.with_ymd_and_hms(2026, 10, 17, 14, 35, 0).unwrap();
        assert!(points.iter().all(|p| p.timestamp == expected));
        assert_eq!(points[0].fuel_name, "nonwind");
        assert_eq!(points[0].gen_mw, 81913.0);
        assert_eq!(points[1].gen_mw, 3210.0);
    }

    #[test]
    fn test_missing_rto_is_malformed() {
        let mut snap = snapshot();
        snap["instantaneousLoad"] = json!([{"area": "Western", "mw": "1"}]);
        assert!(matches!(parse_snapshot(&page(&snap)), Err(GenMixError::MalformedPayload { .. })));
    }

    #[test]
    fn test_page_without_snapshot_is_malformed() {
        assert!(matches!(
            parse_snapshot("<html><body>Service unavailable</body></html>"),
            Err(GenMixError::MalformedPayload { .. })
        ));
    }
}
