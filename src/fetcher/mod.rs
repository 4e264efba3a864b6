//! Source adapters, one per balancing authority.
//!
//! Every adapter implements [`GenerationSource`]: it plans the upstream
//! requests for a [`QuerySpec`], parses each payload into raw rows and hands
//! them to the shared normalizer. Adapters hold no per-call state and share
//! the transport, clock, reference store and settings through [`SourceContext`].

use async_trait::async_trait;
use futures::future::try_join_all;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::core::clock::{Clock, SystemClock};
use crate::core::normalize::{FuelMap, Normalizer, RawRow};
use crate::core::timeseries;
use crate::error::{GenMixError, Result};
use crate::models::{DataPoint, Market, QuerySpec};
use crate::reference::{BalancingAuthority, ReferenceStore, StaticReference};

pub mod factory;
pub mod http;

pub mod bpa;
pub mod caiso;
pub mod ercot;
pub mod isone;
pub mod miso;
pub mod pjm;
pub mod spp;

pub use factory::SourceFactory;
use http::{Fetch, HttpFetcher, UpstreamRequest};

/// Shared, immutable collaborators handed to every adapter.
#[derive(Clone)]
pub struct SourceContext {
    pub fetch: Arc<dyn Fetch>,
    pub clock: Arc<dyn Clock>,
    pub reference: Arc<dyn ReferenceStore>,
    pub settings: Arc<Settings>,
}

impl SourceContext {
    /// Live wiring: pooled HTTP client, wall clock, static reference tables.
    pub fn live(settings: Settings) -> Result<Self> {
        let fetch = Arc::new(HttpFetcher::new(&settings)?);
        Ok(Self {
            fetch,
            clock: Arc::new(SystemClock),
            reference: Arc::new(StaticReference),
            settings: Arc::new(settings),
        })
    }

    pub fn with_fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reference(mut self, reference: Arc<dyn ReferenceStore>) -> Self {
        self.reference = reference;
        self
    }

    pub fn base_url(&self, ba: &str, default: &str) -> String {
        self.settings.base_url(ba, default).to_string()
    }

    /// Fetches a request that must succeed with a 2xx status.
    pub async fn fetch_text(&self, ba: &'static str, request: &UpstreamRequest) -> Result<String> {
        self.fetch.fetch(ba, request).await?.into_body(ba)
    }

    /// Like [`fetch_text`](Self::fetch_text), but a 404 means "not published" and yields `None`.
    pub async fn fetch_optional(&self, ba: &'static str, request: &UpstreamRequest) -> Result<Option<String>> {
        let payload = self.fetch.fetch(ba, request).await?;
        if payload.is_not_found() {
            return Ok(None);
        }
        payload.into_body(ba).map(Some)
    }

    /// Binary counterpart of [`fetch_optional`](Self::fetch_optional).
    pub async fn fetch_bytes_optional(&self, ba: &'static str, request: &UpstreamRequest) -> Result<Option<Vec<u8>>> {
        let payload = self.fetch.fetch(ba, request).await?;
        if payload.is_not_found() {
            return Ok(None);
        }
        payload.into_bytes(ba).map(Some)
    }

    pub fn normalize(
        &self,
        ba: &BalancingAuthority,
        fuels: &FuelMap,
        market: Market,
        rows: Vec<RawRow>,
    ) -> Result<Vec<DataPoint>> {
        let normalizer = Normalizer::new(ba, fuels, market, self.reference.as_ref());
        normalizer.normalize(rows).map(|(points, _)| points)
    }
}

/// Capability implemented by every BA adapter.
#[async_trait]
pub trait GenerationSource: Send + Sync {
    fn ba(&self) -> &'static BalancingAuthority;

    fn context(&self) -> &SourceContext;

    /// Whole-call budget when neither the query nor the settings override it.
    fn default_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Adapter-specific planning, fetching and parsing. Callers use
    /// [`get_generation`](Self::get_generation).
    async fn fetch_generation(&self, query: &QuerySpec) -> Result<Vec<DataPoint>>;

    /// Fetches generation for `query` as a sorted, de-duplicated sequence.
    async fn get_generation(&self, query: &QuerySpec) -> Result<Vec<DataPoint>> {
        query.validate()?;
        let ba = self.ba().abbrev;
        let budget = query
            .timeout
            .or_else(|| self.context().settings.call_timeout(ba))
            .unwrap_or_else(|| self.default_timeout());

        let started = Instant::now();
        let points = tokio::time::timeout(budget, self.fetch_generation(query))
            .await
            .map_err(|_| GenMixError::upstream(ba, format!("call exceeded {:?} budget", budget)))??;
        let points = timeseries::dedupe_sorted(points);

        tracing::info!(
            ba,
            mode = ?query.mode,
            points = points.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched generation"
        );
        Ok(points)
    }
}

/// The static reference record an adapter is built around.
pub fn reference_ba(code: &'static str) -> Result<&'static BalancingAuthority> {
    StaticReference::ba(code).ok_or_else(|| GenMixError::UnknownSource(code.to_string()))
}

/// Picks the requested market if the adapter serves it, else the first (default) entry.
pub fn select_market(ba: &'static str, requested: Option<Market>, allowed: &[Market]) -> Result<Market> {
    match requested {
        None => allowed
            .first()
            .copied()
            .ok_or_else(|| GenMixError::InvalidQuery(format!("{} serves no market for this mode", ba))),
        Some(market) if allowed.contains(&market) => Ok(market),
        Some(market) => Err(GenMixError::InvalidQuery(format!(
            "{} does not publish {} for this mode",
            ba, market
        ))),
    }
}

/// Runs one fetch per period (local day, archive year) concurrently and returns
/// the batches in period order.
///
/// A period whose fetch yields `None` (not published) is skipped with a warning;
/// if no period is available at all the call fails with `RangeUnavailable`.
pub async fn fetch_days<K, F, Fut>(ba: &'static str, periods: Vec<K>, fetch_one: F) -> Result<Vec<Vec<DataPoint>>>
where
    K: Copy + fmt::Display + fmt::Debug,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<Option<Vec<DataPoint>>>>,
{
    let (Some(first), Some(last)) = (periods.first(), periods.last()) else {
        return Ok(Vec::new());
    };
    let results = try_join_all(periods.iter().map(|period| fetch_one(*period))).await?;

    let missing: Vec<K> = periods
        .iter()
        .zip(&results)
        .filter(|(_, r)| r.is_none())
        .map(|(p, _)| *p)
        .collect();

    if missing.len() == periods.len() {
        return Err(GenMixError::range(ba, format!("no files published for {} to {}", first, last)));
    }
    if !missing.is_empty() {
        tracing::warn!(ba, ?missing, "partial coverage: files not published");
    }
    Ok(results.into_iter().flatten().collect())
}
