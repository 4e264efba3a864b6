use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Url};

use crate::config::Settings;
use crate::core::rate_limiter::RateLimiter;
use crate::error::{GenMixError, Result};

/// One upstream HTTP request as planned by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub url: String,
    /// Sent as `application/x-www-form-urlencoded` POST when present.
    pub form: Option<Vec<(String, String)>>,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self { url: url.into(), form: None }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self { url: url.into(), form: Some(form) }
    }
}

/// Raw upstream response. Status is kept so adapters can treat 404 as "not published".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Payload {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self { status: 200, body: body.into() }
    }

    /// Empty response with the given status.
    pub fn empty(status: u16) -> Self {
        Self { status, body: Vec::new() }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// The raw body of a 2xx response; anything else is an upstream failure.
    pub fn into_bytes(self, ba: &'static str) -> Result<Vec<u8>> {
        if (200..300).contains(&self.status) {
            Ok(self.body)
        } else {
            Err(GenMixError::upstream(ba, format!("HTTP status {}", self.status)))
        }
    }

    /// Like [`into_bytes`](Self::into_bytes), decoded as text. Invalid UTF-8 is replaced.
    pub fn into_body(self, ba: &'static str) -> Result<String> {
        let bytes = self.into_bytes(ba)?;
        Ok(String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }
}

/// Transport seam. The live implementation is [`HttpFetcher`]; tests swap in fixtures.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, ba: &'static str, request: &UpstreamRequest) -> Result<Payload>;
}

/// Pooled reqwest client shared by every adapter.
pub struct HttpFetcher {
    client: Client,
    limiter: RateLimiter,
}

impl HttpFetcher {
    /// Fails when the settings cannot produce a client (e.g. a user agent with control characters).
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,text/csv,application/json,text/plain,*/*"));

        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| GenMixError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { client, limiter: RateLimiter::new(settings.min_interval) })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, ba: &'static str, request: &UpstreamRequest) -> Result<Payload> {
        let url = Url::parse(&request.url)
            .map_err(|e| GenMixError::upstream(ba, format!("invalid URL {}: {}", request.url, e)))?;
        self.limiter.wait(url.host_str().unwrap_or_default()).await;

        tracing::debug!(ba, url = %url, post = request.form.is_some(), "requesting upstream");
        let builder = match &request.form {
            Some(form) => self.client.post(url).form(form),
            None => self.client.get(url),
        };

        let resp = builder.send().await.map_err(|e| {
            let reason = if e.is_timeout() { format!("request timed out: {}", e) } else { e.to_string() };
            GenMixError::upstream(ba, reason)
        })?;

        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| GenMixError::upstream(ba, format!("failed reading body: {}", e)))?
            .to_vec();
        tracing::trace!(ba, status, bytes = body.len(), "upstream responded");

        Ok(Payload { status, body })
    }
}
