use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use futures::future::try_join_all;
use serde_json::Value;

use super::http::UpstreamRequest;
use super::{reference_ba, select_market, GenerationSource, SourceContext};
use crate::core::normalize::{FuelMap, RawRow, RawTimestamp, RawValue, Unmapped};
use crate::core::planner::{clip, local_days, plan, DayBoundary, Plan};
use crate::core::timeseries::{latest_snapshot, merge_batches};
use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market, QuerySpec};
use crate::reference::BalancingAuthority;

const CODE: &str = "ISONE";
const DEFAULT_URL: &str = "https://www.iso-ne.com/ws/wsclient";

const FUELS: FuelMap = FuelMap {
    entries: &[
        ("Coal", "coal"),
        ("Hydro", "hydro"),
        ("Natural Gas", "natgas"),
        ("Nuclear", "nuclear"),
        ("Oil", "oil"),
        ("Solar", "solar"),
        ("Wind", "wind"),
        ("Wood", "biomass"),
        ("Refuse", "refuse"),
        ("Landfill Gas", "biogas"),
    ],
    ignored: &[],
    unmapped: Unmapped::Bucket("other"),
};

/// ISO New England five-minute fuel mix from the `genfuelmix` web service.
pub struct IsoneSource {
    ba: &'static BalancingAuthority,
    ctx: SourceContext,
    url: String,
}

impl IsoneSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let url = ctx.base_url(CODE, DEFAULT_URL);
        Ok(Self { ba: reference_ba(CODE)?, ctx, url })
    }

    fn day_request(&self, day: NaiveDate) -> UpstreamRequest {
        let date = day.format("%m/%d/%Y").to_string();
        UpstreamRequest::post_form(
            self.url.clone(),
            vec![
                ("_nstmp_requestType".to_string(), "genfuelmix".to_string()),
                ("_nstmp_startDate".to_string(), date.clone()),
                ("_nstmp_endDate".to_string(), date),
            ],
        )
    }

    async fn fetch_day(&self, day: NaiveDate, market: Market) -> Result<Vec<DataPoint>> {
        let body = self.ctx.fetch_text(CODE, &self.day_request(day)).await?;
        let rows = parse_fuel_mix(&body)?;
        self.ctx.normalize(self.ba, &FUELS, market, rows)
    }
}

#[async_trait]
impl GenerationSource for IsoneSource {
    fn ba(&self) -> &'static BalancingAuthority {
        self.ba
    }

    fn context(&self) -> &SourceContext {
        &self.ctx
    }

    async fn fetch_generation(&self, query: &QuerySpec) -> Result<Vec<DataPoint>> {
        let market = select_market(CODE, query.market, &[Market::RealTime5Min])?;
        let now = self.ctx.clock.now();
        let tz = self.ba.timezone;

        match plan(query, tz, DayBoundary::Local, now)? {
            Plan::Latest => {
                let today = now.with_timezone(&tz).date_naive();
                let mut points = self.fetch_day(today, market).await?;
                // Just after local midnight the new day has no intervals yet.
                if points.is_empty() {
                    if let Some(prev) = today.pred_opt() {
                        points = self.fetch_day(prev, market).await?;
                    }
                }
                Ok(latest_snapshot(points))
            }
            Plan::Window(window) => {
                let days = local_days(&window, tz);
                let batches = try_join_all(days.iter().map(|day| self.fetch_day(*day, market))).await?;
                Ok(clip(merge_batches(batches), &window))
            }
        }
    }
}

/// Parses the `genfuelmix` JSON. The service answers either with a one-element
/// array or a bare object, and with `""` in place of an empty list.
pub(crate) fn parse_fuel_mix(body: &str) -> Result<Vec<RawRow>> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| GenMixError::malformed(CODE, format!("invalid JSON: {}", e)))?;

    let entry = match &json {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return Ok(Vec::new()),
        },
        other => other,
    };

    let data = entry
        .get("data")
        .ok_or_else(|| GenMixError::malformed(CODE, "missing 'data' object"))?;

    let mixes = match data.get("GenFuelMixes") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(mixes) => mixes,
    };

    let items: Vec<&Value> = match mixes.get("GenFuelMix") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => return Err(GenMixError::malformed(CODE, "missing 'GenFuelMix' list")),
    };

    Ok(items.into_iter().map(parse_item).collect())
}

fn parse_item(item: &Value) -> RawRow {
    let label = item["FuelCategory"].as_str().unwrap_or_default();
    let value = match &item["GenMw"] {
        Value::Number(n) => n.as_f64().map(RawValue::Number).unwrap_or(RawValue::Text(n.to_string())),
        Value::String(s) => RawValue::Text(s.clone()),
        _ => RawValue::Text(String::new()),
    };
    let begin = item["BeginDate"].as_str().unwrap_or_default();
    let timestamp = DateTime::parse_from_rfc3339(begin)
        .map(RawTimestamp::Offset)
        .unwrap_or_else(|_| RawTimestamp::Invalid(begin.to_string()));

    RawRow { label: label.to_string(), value, timestamp, market: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::StaticReference;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn fixture() -> String {
        json!([{
            "data": {
                "GenFuelMixes": {
                    "GenFuelMix": [
                        {"BeginDate": "2026-10-17T10:00:00.000-04:00", "FuelCategory": "Natural Gas", "GenMw": 5123, "FuelCategoryRollup": "Natural Gas", "MarginalFlag": "Y"},
                        {"BeginDate": "2026-10-17T10:00:00.000-04:00", "FuelCategory": "Wood", "GenMw": 210.5},
                        {"BeginDate": "2026-10-17T10:00:00.000-04:00", "FuelCategory": "Other", "GenMw": 12},
                        {"BeginDate": "2026-10-17T10:05:00.000-04:00", "FuelCategory": "Natural Gas", "GenMw": 5150}
                    ]
                }
            }
        }])
        .to_string()
    }

    #[test]
    fn test_parse_array_root() {
        let rows = parse_fuel_mix(&fixture()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].label, "Natural Gas");
        assert_eq!(rows[0].value, RawValue::Number(5123.0));
        assert!(matches!(rows[0].timestamp, RawTimestamp::Offset(_)));
    }

    #[test]
    fn test_parse_object_root_and_single_item() {
        let body = json!({
            "data": {"GenFuelMixes": {"GenFuelMix": {"BeginDate": "2026-10-17T10:00:00-04:00", "FuelCategory": "Wind", "GenMw": "301"}}}
        })
        .to_string();
        let rows = parse_fuel_mix(&body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, RawValue::Text("301".into()));
    }

    #[test]
    fn test_empty_day_is_empty_not_malformed() {
        let body = json!([{"data": {"GenFuelMixes": ""}}]).to_string();
        assert!(parse_fuel_mix(&body).unwrap().is_empty());
        assert!(parse_fuel_mix("[]").unwrap().is_empty());
    }

    #[test]
    fn test_schema_mismatch_is_malformed() {
        assert!(matches!(parse_fuel_mix("<html>"), Err(GenMixError::MalformedPayload { .. })));
        let body = json!({"error": "bad request"}).to_string();
        assert!(matches!(parse_fuel_mix(&body), Err(GenMixError::MalformedPayload { .. })));
    }

    #[test]
    fn test_normalizes_to_utc_and_buckets_other() {
        let rows = parse_fuel_mix(&fixture()).unwrap();
        let ba = StaticReference::ba(CODE).unwrap();
        let (points, report) = crate::core::normalize::Normalizer::new(ba, &FUELS, Market::RealTime5Min, &StaticReference)
            .normalize(rows)
            .unwrap();
        assert_eq!(report.bucketed, 1);
        let first = Utc.with_ymd_and_hms(2026, 10, 17, 14, 0, 0).unwrap();
        let at_first: Vec<&str> = points.iter().filter(|p| p.timestamp == first).map(|p| p.fuel_name.as_str()).collect();
        assert_eq!(at_first, vec!["biomass", "natgas", "other"]);

        let snapshot = latest_snapshot(points);
        assert!(snapshot.iter().all(|p| p.timestamp == first));
    }

    #[test]
    fn test_day_request_form() {
        let ctx = SourceContext::live(crate::config::Settings::default()).unwrap();
        let source = IsoneSource::new(ctx).unwrap();
        let req = source.day_request(NaiveDate::from_ymd_opt(2026, 10, 7).unwrap());
        let form = req.form.unwrap();
        assert!(form.contains(&("_nstmp_startDate".to_string(), "10/07/2026".to_string())));
        assert_eq!(req.url, DEFAULT_URL);
    }
}
