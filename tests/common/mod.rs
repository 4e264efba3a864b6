#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use genmix_lib::config::Settings;
use genmix_lib::core::clock::FixedClock;
use genmix_lib::fetcher::http::{Fetch, Payload, UpstreamRequest};
use genmix_lib::{Result, SourceContext, SourceFactory};

/// Offline transport: the first route whose pattern is a substring of the URL answers.
/// Unrouted URLs get a 404.
#[derive(Default)]
pub struct StaticFetch {
    routes: Vec<(String, Payload)>,
    delay: Option<Duration>,
    seen: Mutex<Vec<String>>,
}

impl StaticFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: &str, body: impl Into<Vec<u8>>) -> Self {
        self.routes.push((pattern.to_string(), Payload::ok(body)));
        self
    }

    pub fn status(mut self, pattern: &str, status: u16) -> Self {
        self.routes.push((pattern.to_string(), Payload::empty(status)));
        self
    }

    /// Every response is held back by `delay`.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetch for StaticFetch {
    async fn fetch(&self, _ba: &'static str, request: &UpstreamRequest) -> Result<Payload> {
        self.seen.lock().unwrap().push(request.url.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .routes
            .iter()
            .find(|(pattern, _)| request.url.contains(pattern.as_str()))
            .map(|(_, payload)| payload.clone())
            .unwrap_or_else(|| Payload::empty(404)))
    }
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn factory(fetch: Arc<StaticFetch>, now: DateTime<Utc>) -> SourceFactory {
    factory_with(Settings::default(), fetch, now)
}

pub fn factory_with(settings: Settings, fetch: Arc<StaticFetch>, now: DateTime<Utc>) -> SourceFactory {
    let ctx = SourceContext::live(settings)
        .unwrap()
        .with_fetch(fetch)
        .with_clock(Arc::new(FixedClock(now)));
    SourceFactory::new(ctx)
}
