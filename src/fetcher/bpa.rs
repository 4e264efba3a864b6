use async_trait::async_trait;
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::io::Cursor;

use super::http::UpstreamRequest;
use super::{fetch_days, reference_ba, select_market, GenerationSource, SourceContext};
use crate::core::normalize::{FuelMap, RawRow, RawTimestamp, RawValue, Unmapped};
use crate::core::planner::{check_coverage, clip, local_days, plan, DayBoundary, Plan, TimeWindow};
use crate::core::timeseries::{latest_snapshot, merge_batches};
use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market, QuerySpec};
use crate::reference::BalancingAuthority;

const CODE: &str = "BPA";
const DEFAULT_URL: &str = "https://transmission.bpa.gov/business/operations/wind/baltwg.txt";
const HEADER_PREFIX: &str = "Date/Time";
const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Settings key for the yearly workbook location (`GENMIX_BPA_ARCHIVE_BASE_URL`).
const ARCHIVE_KEY: &str = "BPA_ARCHIVE";
const DEFAULT_ARCHIVE_URL: &str = "https://transmission.bpa.gov/business/operations/wind";
const ARCHIVE_FIRST_YEAR: i32 = 2011;
/// Windows starting earlier than this are served from the yearly workbooks.
const ROLLING_FILE_DAYS: i64 = 7;

/// Workbook headers are long descriptions; a keyword picks the upstream label fed to [`FUELS`].
const ARCHIVE_COLUMNS: &[(&str, &str)] = &[
    ("WIND", "Wind"),
    ("HYDRO", "Hydro"),
    ("THERMAL", "Thermal"),
    ("FOSSIL", "Fossil/Biomass"),
    ("NUCLEAR", "Nuclear"),
    ("LOAD", "Load"),
];
const ARCHIVE_SKIPPED: &[&str] = &["FORECAST", "BASEPOINT"];

const FUELS: FuelMap = FuelMap {
    entries: &[
        ("Wind", "wind"),
        ("Hydro", "hydro"),
        ("Thermal", "thermal"),
        ("Fossil/Biomass", "thermal"),
        ("Nuclear", "nuclear"),
    ],
    ignored: &["Load"],
    unmapped: Unmapped::Drop,
};

/// Bonneville balancing-authority data.
///
/// Recent windows come from the near-real-time file, which rolls over after
/// roughly seven days. Older windows come from the year-to-date workbooks,
/// one per calendar year, topped up from the rolling file when the window
/// reaches into it.
pub struct BpaSource {
    ba: &'static BalancingAuthority,
    ctx: SourceContext,
    url: String,
    archive_url: String,
}

impl BpaSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let url = ctx.base_url(CODE, DEFAULT_URL);
        let archive_url = ctx.base_url(ARCHIVE_KEY, DEFAULT_ARCHIVE_URL);
        Ok(Self { ba: reference_ba(CODE)?, ctx, url, archive_url })
    }

    fn archive_workbook_url(&self, year: i32) -> String {
        format!("{}/WindGenTotalLoadYTD_{}.xlsx", self.archive_url.trim_end_matches('/'), year)
    }

    async fn fetch_file(&self, market: Market) -> Result<Vec<DataPoint>> {
        let body = self.ctx.fetch_text(CODE, &UpstreamRequest::get(self.url.clone())).await?;
        let rows = parse_balancing_file(&body)?;
        self.ctx.normalize(self.ba, &FUELS, market, rows)
    }

    /// One yearly workbook, or `None` when it is not published.
    async fn fetch_archive(&self, year: i32, market: Market) -> Result<Option<Vec<DataPoint>>> {
        let request = UpstreamRequest::get(self.archive_workbook_url(year));
        let Some(bytes) = self.ctx.fetch_bytes_optional(CODE, &request).await? else {
            return Ok(None);
        };
        let rows = parse_archive_workbook(bytes)?;
        tracing::debug!(ba = CODE, year, rows = rows.len(), "parsed archive workbook");
        self.ctx.normalize(self.ba, &FUELS, market, rows).map(Some)
    }

    async fn fetch_window(&self, window: TimeWindow, market: Market) -> Result<Vec<DataPoint>> {
        let step = market.frequency().interval();
        let rolling_start = self.ctx.clock.now() - Duration::days(ROLLING_FILE_DAYS);
        if window.start >= rolling_start {
            let points = self.fetch_file(market).await?;
            check_coverage(CODE, &window, &points, step)?;
            return Ok(clip(points, &window));
        }

        let years = archive_years(&window, self.ba.timezone);
        if years.is_empty() {
            return Err(GenMixError::range(
                CODE,
                format!("yearly workbooks start in {}", ARCHIVE_FIRST_YEAR),
            ));
        }
        tracing::debug!(ba = CODE, ?years, "window predates the rolling file; reading yearly workbooks");
        let mut batches = fetch_days(CODE, years, |year| self.fetch_archive(year, market)).await?;
        if window.end > rolling_start {
            batches.push(self.fetch_file(market).await?);
        }

        let points = merge_batches(batches);
        check_coverage(CODE, &window, &points, step)?;
        Ok(clip(points, &window))
    }
}

#[async_trait]
impl GenerationSource for BpaSource {
    fn ba(&self) -> &'static BalancingAuthority {
        self.ba
    }

    fn context(&self) -> &SourceContext {
        &self.ctx
    }

    async fn fetch_generation(&self, query: &QuerySpec) -> Result<Vec<DataPoint>> {
        let market = select_market(CODE, query.market, &[Market::RealTime5Min])?;
        match plan(query, self.ba.timezone, DayBoundary::Local, self.ctx.clock.now())? {
            // The newest rows are often partially filled; the snapshot picks the latest complete one.
            Plan::Latest => Ok(latest_snapshot(self.fetch_file(market).await?)),
            Plan::Window(window) => self.fetch_window(window, market).await,
        }
    }
}

/// Tab-separated text with a free-form preamble before the `Date/Time` header.
pub(crate) fn parse_balancing_file(body: &str) -> Result<Vec<RawRow>> {
    let start = body
        .split_inclusive('\n')
        .scan(0usize, |offset, line| {
            let at = *offset;
            *offset += line.len();
            Some((at, line))
        })
        .find(|(_, line)| line.trim_start().starts_with(HEADER_PREFIX))
        .map(|(at, _)| at)
        .ok_or_else(|| GenMixError::malformed(CODE, "no Date/Time header line"))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body[start..].as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| GenMixError::malformed(CODE, format!("unreadable header: {}", e)))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| GenMixError::malformed(CODE, format!("unreadable row: {}", e)))?;
        let raw_ts = record.get(0).unwrap_or_default();
        if raw_ts.is_empty() {
            continue;
        }
        let timestamp = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT)
            .map(RawTimestamp::Local)
            .unwrap_or_else(|_| RawTimestamp::Invalid(raw_ts.to_string()));

        for (idx, label) in headers.iter().enumerate().skip(1) {
            // Blank cells are intervals not yet published.
            match record.get(idx) {
                Some(cell) if !cell.is_empty() => rows.push(RawRow::text(label, cell, timestamp.clone())),
                _ => {}
            }
        }
    }
    Ok(rows)
}

/// Calendar years (in BPA local time) overlapping `window` that have a workbook.
fn archive_years(window: &TimeWindow, tz: chrono_tz::Tz) -> Vec<i32> {
    let days = local_days(window, tz);
    let (Some(first), Some(last)) = (days.first(), days.last()) else {
        return Vec::new();
    };
    (first.year().max(ARCHIVE_FIRST_YEAR)..=last.year()).collect()
}

/// Reads every sheet of a yearly workbook that carries a `Date/Time` header row.
///
/// Sheets hold half a year each under a free-form title block. Header cells
/// are mapped to the rolling file's labels so both share one fuel table.
pub(crate) fn parse_archive_workbook(bytes: Vec<u8>) -> Result<Vec<RawRow>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| GenMixError::malformed(CODE, format!("unreadable workbook: {}", e)))?;

    let mut rows = Vec::new();
    let mut sheets_read = 0;
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| GenMixError::malformed(CODE, format!("unreadable sheet '{}': {}", name, e)))?;
        let mut lines = range.rows();
        let Some(header) = lines
            .by_ref()
            .find(|line| line.first().is_some_and(|c| c.to_string().trim().starts_with(HEADER_PREFIX)))
        else {
            tracing::trace!(ba = CODE, sheet = %name, "no Date/Time header; skipping sheet");
            continue;
        };
        sheets_read += 1;
        let labels: Vec<Option<&'static str>> = header.iter().map(|c| archive_label(&c.to_string())).collect();

        for line in lines {
            let Some(first) = line.first().filter(|c| !c.is_empty()) else {
                continue;
            };
            let timestamp = cell_datetime(first)
                .map(RawTimestamp::Local)
                .unwrap_or_else(|| RawTimestamp::Invalid(first.to_string()));

            for (idx, label) in labels.iter().enumerate().skip(1) {
                let Some(label) = label else { continue };
                let value = match line.get(idx) {
                    Some(Data::Float(v)) => RawValue::Number(*v),
                    Some(Data::Int(v)) => RawValue::Number(*v as f64),
                    Some(Data::String(text)) if !text.trim().is_empty() => RawValue::Text(text.clone()),
                    _ => continue,
                };
                rows.push(RawRow { label: (*label).to_string(), value, timestamp: timestamp.clone(), market: None });
            }
        }
    }

    if sheets_read == 0 {
        return Err(GenMixError::malformed(CODE, "workbook has no sheet with a Date/Time header"));
    }
    Ok(rows)
}

fn archive_label(header: &str) -> Option<&'static str> {
    let header = header.to_ascii_uppercase();
    if ARCHIVE_SKIPPED.iter().any(|word| header.contains(word)) {
        return None;
    }
    ARCHIVE_COLUMNS.iter().find(|(word, _)| header.contains(word)).map(|(_, label)| *label)
}

/// Date cells arrive as Excel serials, typed dates or text; all are rounded to the minute.
fn cell_datetime(cell: &Data) -> Option<NaiveDateTime> {
    let naive = match cell {
        Data::Float(serial) => from_excel_serial(*serial)?,
        Data::Int(serial) => from_excel_serial(*serial as f64)?,
        Data::String(text) => NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT).ok()?,
        other => other.as_datetime()?,
    };
    let rounded = naive + Duration::seconds(30);
    rounded.with_second(0).and_then(|t| t.with_nanosecond(0))
}

fn from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return None;
    }
    epoch.checked_add_signed(Duration::milliseconds(millis as i64))
}
