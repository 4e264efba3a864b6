use crate::models::DataPoint;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Merges per-request batches into one series keyed by `(fuel, timestamp)`.
///
/// Batches are applied in order, so a later batch overwrites an earlier one on
/// overlap (e.g. a revised day file). Output is sorted by timestamp, then fuel.
pub fn merge_batches(batches: Vec<Vec<DataPoint>>) -> Vec<DataPoint> {
    let mut merged: BTreeMap<(DateTime<Utc>, String), DataPoint> = BTreeMap::new();
    for batch in batches {
        for dp in batch {
            merged.insert((dp.timestamp, dp.fuel_name.clone()), dp);
        }
    }
    merged.into_values().collect()
}

/// Sorts and removes duplicate `(fuel, timestamp)` pairs, keeping the last occurrence.
pub fn dedupe_sorted(points: Vec<DataPoint>) -> Vec<DataPoint> {
    merge_batches(vec![points])
}

/// Trailing intervals considered when picking the snapshot.
const SNAPSHOT_LOOKBACK: usize = 3;

/// Reduces a series to a single snapshot.
///
/// Only the newest few intervals compete: the newest one carrying as many
/// fuels as any of them wins. A fuel that stopped reporting earlier in the
/// series does not pull the snapshot back; a half-filled final row does not
/// beat the full row just before it.
pub fn latest_snapshot(points: Vec<DataPoint>) -> Vec<DataPoint> {
    let mut per_stamp: BTreeMap<DateTime<Utc>, BTreeSet<&str>> = BTreeMap::new();
    for dp in &points {
        per_stamp.entry(dp.timestamp).or_default().insert(dp.fuel_name.as_str());
    }
    let Some(newest) = per_stamp.keys().next_back().copied() else {
        return points;
    };

    let trailing: Vec<(DateTime<Utc>, &BTreeSet<&str>)> =
        per_stamp.iter().rev().take(SNAPSHOT_LOOKBACK).map(|(ts, fuels)| (*ts, fuels)).collect();
    let widest = trailing.iter().map(|(_, fuels)| fuels.len()).max().unwrap_or(0);
    let target = trailing
        .iter()
        .find(|(_, fuels)| fuels.len() == widest)
        .map(|(ts, _)| *ts)
        .unwrap_or(newest);

    let recent: BTreeSet<&str> = trailing.iter().flat_map(|(_, fuels)| fuels.iter().copied()).collect();
    if widest < recent.len() {
        tracing::warn!(%target, fuels = widest, recent = recent.len(), "no recent interval carries every fuel");
    }
    if target < newest {
        tracing::debug!(%target, %newest, "newest interval is incomplete; serving latest complete one");
    }

    let snapshot: Vec<DataPoint> = points.into_iter().filter(|p| p.timestamp == target).collect();
    dedupe_sorted(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, Market};
    use chrono::TimeZone;

    fn dp(fuel: &str, hour: u32, mw: f64) -> DataPoint {
        DataPoint {
            ba_name: "BPA".into(),
            fuel_name: fuel.into(),
            gen_mw: mw,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 17, hour, 0, 0).unwrap(),
            freq: Frequency::FiveMinute,
            market: Market::RealTime5Min,
        }
    }

    #[test]
    fn test_merge_later_batch_wins_and_sorts() {
        let merged = merge_batches(vec![
            vec![dp("wind", 2, 1.0), dp("hydro", 1, 5.0)],
            vec![dp("wind", 2, 9.0), dp("wind", 0, 3.0)],
        ]);
        let keys: Vec<(u32, &str, f64)> = merged
            .iter()
            .map(|p| (chrono::Timelike::hour(&p.timestamp), p.fuel_name.as_str(), p.gen_mw))
            .collect();
        assert_eq!(keys, vec![(0, "wind", 3.0), (1, "hydro", 5.0), (2, "wind", 9.0)]);
    }

    #[test]
    fn test_latest_snapshot_skips_incomplete_interval() {
        let points = vec![
            dp("wind", 1, 1.0),
            dp("hydro", 1, 2.0),
            dp("wind", 2, 3.0),
        ];
        let snap = latest_snapshot(points);
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|p| chrono::Timelike::hour(&p.timestamp) == 1));
    }

    #[test]
    fn test_latest_snapshot_without_common_timestamp() {
        let snap = latest_snapshot(vec![dp("wind", 1, 1.0), dp("hydro", 2, 2.0)]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].fuel_name, "hydro");
    }

    #[test]
    fn test_latest_snapshot_ignores_fuel_retired_earlier_in_day() {
        // Coal reports only in the first hour; the rest of the day carries wind and hydro.
        let mut points = vec![dp("coal", 0, 400.0)];
        for hour in 0..=10 {
            points.push(dp("wind", hour, 100.0 + hour as f64));
            points.push(dp("hydro", hour, 900.0));
        }
        let snap = latest_snapshot(points);
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|p| chrono::Timelike::hour(&p.timestamp) == 10));
        assert_eq!(snap.iter().find(|p| p.fuel_name == "wind").unwrap().gen_mw, 110.0);
    }

    #[test]
    fn test_latest_snapshot_empty() {
        assert!(latest_snapshot(vec![]).is_empty());
    }
}
