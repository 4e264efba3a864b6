//! Raw-row to canonical-point normalization.
//!
//! Every adapter parses its payload into [`RawRow`]s and hands them to a
//! [`Normalizer`], which maps fuel labels, localizes timestamps, attaches the
//! market/frequency pair and validates each row. Bad rows are dropped and
//! counted in a [`NormalizeReport`]; they never abort the batch.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market};
use crate::reference::{BalancingAuthority, ReferenceStore};

#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    /// Wall-clock time in the BA's zone.
    Local(NaiveDateTime),
    /// Wall-clock time flagged upstream as the repeat of a fall-back hour.
    LocalRepeated(NaiveDateTime),
    /// Upstream carried its own offset.
    Offset(DateTime<FixedOffset>),
    /// Upstream explicitly stamped GMT/UTC.
    Utc(DateTime<Utc>),
    /// Text that did not parse; counted as an invalid row.
    Invalid(String),
}

impl RawTimestamp {
    /// Hour-ending `n` on `day` is stamped at local `n-1:00`.
    pub fn hour_ending(day: NaiveDate, hour_ending: u32) -> Self {
        match hour_ending.checked_sub(1).and_then(|h| NaiveTime::from_hms_opt(h, 0, 0)) {
            Some(start) => RawTimestamp::Local(day.and_time(start)),
            None => RawTimestamp::Invalid(format!("{} HE{}", day, hour_ending)),
        }
    }

    /// Marks a local time as the second occurrence of its wall-clock hour.
    pub fn repeated(self) -> Self {
        match self {
            RawTimestamp::Local(naive) => RawTimestamp::LocalRepeated(naive),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Parses thousands separators and a trailing `MW` unit; anything else is invalid.
    pub fn resolve(&self) -> Option<f64> {
        let value = match self {
            RawValue::Number(v) => *v,
            RawValue::Text(s) => {
                let cleaned: String = s
                    .trim()
                    .trim_end_matches("MW")
                    .chars()
                    .filter(|c| *c != ',' && !c.is_whitespace())
                    .collect();
                cleaned.parse::<f64>().ok()?
            }
        };
        value.is_finite().then_some(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub label: String,
    pub value: RawValue,
    pub timestamp: RawTimestamp,
    pub market: Option<Market>,
}

impl RawRow {
    pub fn text(label: impl Into<String>, value: impl Into<String>, timestamp: RawTimestamp) -> Self {
        Self { label: label.into(), value: RawValue::Text(value.into()), timestamp, market: None }
    }

    pub fn number(label: impl Into<String>, value: f64, timestamp: RawTimestamp) -> Self {
        Self { label: label.into(), value: RawValue::Number(value), timestamp, market: None }
    }
}

/// What happens to upstream labels that have no explicit mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmapped {
    Drop,
    Bucket(&'static str),
}

/// Adapter-owned upstream label to canonical fuel table.
#[derive(Debug, Clone, Copy)]
pub struct FuelMap {
    pub entries: &'static [(&'static str, &'static str)],
    /// Labels that are not generation (load, subtotals) and are always dropped.
    pub ignored: &'static [&'static str],
    pub unmapped: Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mapping {
    Mapped(&'static str),
    Bucketed(&'static str),
    Dropped,
}

impl FuelMap {
    /// Labels compare trimmed and case-insensitively.
    pub fn get(&self, label: &str) -> Option<&'static str> {
        let label = label.trim();
        self.entries
            .iter()
            .find(|(upstream, _)| upstream.eq_ignore_ascii_case(label))
            .map(|(_, fuel)| *fuel)
    }

    fn lookup(&self, label: &str) -> Mapping {
        if self.ignored.iter().any(|l| l.eq_ignore_ascii_case(label.trim())) {
            return Mapping::Dropped;
        }
        match (self.get(label), self.unmapped) {
            (Some(fuel), _) => Mapping::Mapped(fuel),
            (None, Unmapped::Bucket(fuel)) => Mapping::Bucketed(fuel),
            (None, Unmapped::Drop) => Mapping::Dropped,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub rows: usize,
    pub emitted: usize,
    pub dropped_unmapped: usize,
    pub bucketed: usize,
    pub invalid: usize,
}

pub struct Normalizer<'a> {
    ba: &'a BalancingAuthority,
    fuels: &'a FuelMap,
    market: Market,
    reference: &'a dyn ReferenceStore,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        ba: &'a BalancingAuthority,
        fuels: &'a FuelMap,
        market: Market,
        reference: &'a dyn ReferenceStore,
    ) -> Self {
        Self { ba, fuels, market, reference }
    }

    pub fn normalize(&self, rows: Vec<RawRow>) -> Result<(Vec<DataPoint>, NormalizeReport)> {
        let mut report = NormalizeReport { rows: rows.len(), ..Default::default() };
        let ba_known = self.reference.resolve_ba(self.ba.abbrev).is_some();

        // (instant, upstream label, market) -> (fuel, value); repeated rows keep the last value.
        let mut slots: BTreeMap<(DateTime<Utc>, String, Market), (&'static str, f64)> = BTreeMap::new();
        let mut ambiguous_seen: HashSet<(String, NaiveDateTime)> = HashSet::new();

        for row in rows {
            let fuel = match self.fuels.lookup(&row.label) {
                Mapping::Mapped(fuel) => fuel,
                Mapping::Bucketed(fuel) => {
                    report.bucketed += 1;
                    fuel
                }
                Mapping::Dropped => {
                    report.dropped_unmapped += 1;
                    continue;
                }
            };

            // Resolve before value checks; every row of a repeated hour counts as a sighting.
            let Some(timestamp) = self.to_utc(&row.label, &row.timestamp, &mut ambiguous_seen) else {
                tracing::trace!(ba = self.ba.abbrev, timestamp = ?row.timestamp, "unusable timestamp");
                report.invalid += 1;
                continue;
            };

            let Some(value) = row.value.resolve() else {
                tracing::trace!(ba = self.ba.abbrev, label = %row.label, value = ?row.value, "unparseable value");
                report.invalid += 1;
                continue;
            };

            if !ba_known || self.reference.resolve_fuel(fuel).is_none() {
                tracing::warn!(ba = self.ba.abbrev, fuel, "fuel or BA missing from reference tables");
                report.invalid += 1;
                continue;
            }

            let market = row.market.unwrap_or(self.market);
            slots.insert((timestamp, row.label.trim().to_string(), market), (fuel, value));
        }

        // Distinct labels that share a canonical fuel are summed.
        let mut totals: BTreeMap<(DateTime<Utc>, &'static str, Market), f64> = BTreeMap::new();
        for ((timestamp, _, market), (fuel, value)) in slots {
            *totals.entry((timestamp, fuel, market)).or_insert(0.0) += value;
        }

        let points: Vec<DataPoint> = totals
            .into_iter()
            .map(|((timestamp, fuel, market), gen_mw)| DataPoint {
                ba_name: self.ba.abbrev.to_string(),
                fuel_name: fuel.to_string(),
                gen_mw,
                timestamp,
                freq: market.frequency(),
                market,
            })
            .collect();
        report.emitted = points.len();

        if report.invalid > 0 {
            tracing::warn!(ba = self.ba.abbrev, invalid = report.invalid, rows = report.rows,
                "dropped rows that failed validation");
        }
        tracing::debug!(ba = self.ba.abbrev, ?report, "normalized payload");

        if report.rows > 0 && report.emitted == 0 && report.invalid > 0 {
            return Err(GenMixError::malformed(
                self.ba.abbrev,
                format!("all {} rows failed validation", report.invalid),
            ));
        }
        Ok((points, report))
    }

    fn to_utc(
        &self,
        label: &str,
        raw: &RawTimestamp,
        ambiguous_seen: &mut HashSet<(String, NaiveDateTime)>,
    ) -> Option<DateTime<Utc>> {
        match raw {
            RawTimestamp::Utc(t) => Some(*t),
            RawTimestamp::Invalid(_) => None,
            RawTimestamp::Offset(t) => Some(t.with_timezone(&Utc)),
            RawTimestamp::Local(naive) => match self.ba.timezone.from_local_datetime(naive) {
                LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
                // Fall-back hour: first sighting is the earlier instant, the repeat is the later one.
                LocalResult::Ambiguous(a, b) => {
                    let (earlier, later) = if a <= b { (a, b) } else { (b, a) };
                    if ambiguous_seen.insert((label.trim().to_string(), *naive)) {
                        Some(earlier.with_timezone(&Utc))
                    } else {
                        Some(later.with_timezone(&Utc))
                    }
                }
                LocalResult::None => None,
            },
            RawTimestamp::LocalRepeated(naive) => match self.ba.timezone.from_local_datetime(naive) {
                LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
                LocalResult::Ambiguous(a, b) => Some(a.max(b).with_timezone(&Utc)),
                LocalResult::None => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Frequency;
    use crate::reference::StaticReference;

    const MAP: FuelMap = FuelMap {
        entries: &[("Wind", "wind"), ("Thermal", "thermal"), ("Fossil/Biomass", "thermal"), ("Typo", "windd")],
        ignored: &[],
        unmapped: Unmapped::Drop,
    };

    const BUCKET_MAP: FuelMap = FuelMap {
        entries: &[("Wind", "wind")],
        ignored: &["Load"],
        unmapped: Unmapped::Bucket("other"),
    };

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> RawTimestamp {
        RawTimestamp::Local(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap())
    }

    fn normalizer<'a>(ba: &'a str, map: &'a FuelMap, market: Market) -> Normalizer<'a> {
        Normalizer::new(StaticReference::ba(ba).unwrap(), map, market, &StaticReference)
    }

    #[test]
    fn test_localizes_naive_time_before_utc() {
        let n = normalizer("BPA", &MAP, Market::RealTime5Min);
        let (points, report) = n.normalize(vec![RawRow::text("Wind", "1,234", local(2026, 10, 17, 10, 5))]).unwrap();
        assert_eq!(report.emitted, 1);
        // PDT is UTC-7.
        assert_eq!(points[0].timestamp, Utc.with_ymd_and_hms(2026, 10, 17, 17, 5, 0).unwrap());
        assert_eq!(points[0].gen_mw, 1234.0);
        assert_eq!(points[0].freq, Frequency::FiveMinute);
    }

    #[test]
    fn test_offset_and_utc_timestamps_pass_through() {
        let n = normalizer("ISONE", &BUCKET_MAP, Market::RealTime5Min);
        let offset = DateTime::parse_from_rfc3339("2026-10-17T10:05:00-04:00").unwrap();
        let utc = Utc.with_ymd_and_hms(2026, 10, 17, 15, 0, 0).unwrap();
        let (points, _) = n
            .normalize(vec![
                RawRow::number("Wind", 10.0, RawTimestamp::Offset(offset)),
                RawRow::number("Wind", 11.0, RawTimestamp::Utc(utc)),
            ])
            .unwrap();
        assert_eq!(points[0].timestamp, Utc.with_ymd_and_hms(2026, 10, 17, 14, 5, 0).unwrap());
        assert_eq!(points[1].timestamp, utc);
    }

    #[test]
    fn test_unmapped_policies() {
        let drop = normalizer("BPA", &MAP, Market::RealTime5Min);
        let (points, report) = drop
            .normalize(vec![
                RawRow::text("Load", "6000", local(2026, 10, 17, 10, 0)),
                RawRow::text("Wind", "100", local(2026, 10, 17, 10, 0)),
            ])
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(report.dropped_unmapped, 1);

        let bucket = normalizer("SPP", &BUCKET_MAP, Market::RealTimeHourly);
        let (points, report) = bucket
            .normalize(vec![
                RawRow::text("Waste Heat", "5", local(2026, 10, 17, 10, 0)),
                RawRow::text("Mystery", "7", local(2026, 10, 17, 10, 0)),
            ])
            .unwrap();
        assert_eq!(report.bucketed, 2);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].fuel_name, "other");
        assert_eq!(points[0].gen_mw, 12.0);
    }

    #[test]
    fn test_labels_sharing_a_fuel_are_summed_and_repeats_keep_last() {
        let n = normalizer("BPA", &MAP, Market::RealTime5Min);
        let ts = local(2026, 10, 17, 10, 0);
        let (points, _) = n
            .normalize(vec![
                RawRow::text("Thermal", "100", ts.clone()),
                RawRow::text("Fossil/Biomass", "50", ts.clone()),
                RawRow::text("Thermal", "120", ts),
            ])
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].gen_mw, 170.0);
    }

    #[test]
    fn test_invalid_rows_are_counted_not_fatal() {
        let n = normalizer("BPA", &MAP, Market::RealTime5Min);
        let (points, report) = n
            .normalize(vec![
                RawRow::text("Wind", "n/a", local(2026, 10, 17, 10, 0)),
                RawRow::text("Typo", "5", local(2026, 10, 17, 10, 0)),
                RawRow::text("Wind", "-3.5", local(2026, 10, 17, 10, 5)),
            ])
            .unwrap();
        assert_eq!(report.invalid, 2);
        assert_eq!(points.len(), 1);
        // Negative values are not clamped.
        assert_eq!(points[0].gen_mw, -3.5);
    }

    #[test]
    fn test_entirely_invalid_batch_is_malformed() {
        let n = normalizer("BPA", &MAP, Market::RealTime5Min);
        let result = n.normalize(vec![RawRow::text("Wind", "", local(2026, 10, 17, 10, 0))]);
        assert!(matches!(result, Err(GenMixError::MalformedPayload { .. })));
    }

    #[test]
    fn test_empty_batch_is_not_an_error() {
        let n = normalizer("BPA", &MAP, Market::RealTime5Min);
        let (points, report) = n.normalize(vec![]).unwrap();
        assert!(points.is_empty());
        assert_eq!(report, NormalizeReport::default());
    }

    #[test]
    fn test_dst_gap_is_invalid_and_fall_back_hour_is_kept_twice() {
        let n = normalizer("BPA", &MAP, Market::RealTime5Min);
        // 2026-03-08 02:30 does not exist in Pacific time.
        let (_, report) = n
            .normalize(vec![
                RawRow::text("Wind", "1", local(2026, 3, 8, 2, 30)),
                RawRow::text("Wind", "2", local(2026, 3, 8, 4, 0)),
            ])
            .unwrap();
        assert_eq!(report.invalid, 1);

        // 2026-11-01 01:30 occurs twice.
        let (points, _) = n
            .normalize(vec![
                RawRow::text("Wind", "10", local(2026, 11, 1, 1, 30)),
                RawRow::text("Wind", "20", local(2026, 11, 1, 1, 30)),
            ])
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].timestamp - points[0].timestamp, chrono::Duration::hours(1));
        assert_eq!(points[0].gen_mw, 10.0);
        assert_eq!(points[1].gen_mw, 20.0);
    }

    #[test]
    fn test_unparseable_first_copy_still_claims_earlier_instant() {
        let n = normalizer("BPA", &MAP, Market::RealTime5Min);
        let (points, report) = n
            .normalize(vec![
                RawRow::text("Wind", "--", local(2026, 11, 1, 1, 30)),
                RawRow::text("Wind", "20", local(2026, 11, 1, 1, 30)),
            ])
            .unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(points.len(), 1);
        // 01:30 PST, the second occurrence.
        assert_eq!(points[0].timestamp, Utc.with_ymd_and_hms(2026, 11, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_repeated_marker_selects_later_instant_regardless_of_order() {
        let n = normalizer("BPA", &MAP, Market::RealTime5Min);
        let (points, _) = n
            .normalize(vec![
                RawRow::text("Wind", "20", local(2026, 11, 1, 1, 0).repeated()),
                RawRow::text("Wind", "10", local(2026, 11, 1, 1, 0)),
                RawRow::text("Wind", "30", local(2026, 10, 17, 1, 0).repeated()),
            ])
            .unwrap();
        let got: Vec<(DateTime<Utc>, f64)> = points.iter().map(|p| (p.timestamp, p.gen_mw)).collect();
        assert_eq!(
            got,
            vec![
                // Unambiguous times ignore the marker.
                (Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap(), 30.0),
                (Utc.with_ymd_and_hms(2026, 11, 1, 8, 0, 0).unwrap(), 10.0),
                (Utc.with_ymd_and_hms(2026, 11, 1, 9, 0, 0).unwrap(), 20.0),
            ]
        );
    }

    #[test]
    fn test_hour_ending_stamps_interval_start() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(RawTimestamp::hour_ending(day, 1), local(2026, 10, 17, 0, 0));
        assert_eq!(RawTimestamp::hour_ending(day, 24), local(2026, 10, 17, 23, 0));
        assert!(matches!(RawTimestamp::hour_ending(day, 0), RawTimestamp::Invalid(_)));
        assert!(matches!(RawTimestamp::hour_ending(day, 25), RawTimestamp::Invalid(_)));
    }

    #[test]
    fn test_raw_value_parsing() {
        assert_eq!(RawValue::Text(" 12,345.5 MW".into()).resolve(), Some(12345.5));
        assert_eq!(RawValue::Text("#N/A".into()).resolve(), None);
        assert_eq!(RawValue::Number(f64::NAN).resolve(), None);
    }
}
