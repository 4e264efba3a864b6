use std::collections::HashMap;
use std::time::Duration;

const PREFIX: &str = "GENMIX_";
const DEFAULT_USER_AGENT: &str = "genmix/0.1 (+generation-mix ingestion)";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MIN_INTERVAL_MS: u64 = 250;
const DEFAULT_DATABASE_URL: &str = "sqlite://genmix.db?mode=rwc";

/// Process-wide settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub user_agent: String,
    /// Per HTTP request.
    pub request_timeout: Duration,
    /// Minimum spacing between requests to one host.
    pub min_interval: Duration,
    pub database_url: String,
    call_timeouts: HashMap<String, Duration>,
    base_urls: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            call_timeouts: HashMap::new(),
            base_urls: HashMap::new(),
        }
    }
}

impl Settings {
    /// Loads `.env` if present, then the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Settings::default();

        for (key, value) in vars {
            let Some(name) = key.strip_prefix(PREFIX) else { continue };
            let value = value.trim();
            match name {
                "USER_AGENT" if !value.is_empty() => settings.user_agent = value.to_string(),
                "REQUEST_TIMEOUT_SECS" => {
                    if let Some(secs) = parse_positive(&key, value) {
                        settings.request_timeout = Duration::from_secs(secs);
                    }
                }
                "MIN_INTERVAL_MS" => match value.parse::<u64>() {
                    Ok(ms) => settings.min_interval = Duration::from_millis(ms),
                    Err(_) => tracing::warn!(key = %key, value, "ignoring invalid setting"),
                },
                "DATABASE_URL" if !value.is_empty() => settings.database_url = value.to_string(),
                _ => {
                    if let Some(ba) = name.strip_suffix("_TIMEOUT_SECS") {
                        if let Some(secs) = parse_positive(&key, value) {
                            settings.call_timeouts.insert(ba.to_uppercase(), Duration::from_secs(secs));
                        }
                    } else if let Some(ba) = name.strip_suffix("_BASE_URL") {
                        if !value.is_empty() {
                            settings.base_urls.insert(ba.to_uppercase(), value.to_string());
                        }
                    }
                }
            }
        }

        settings
    }

    /// Per-call timeout override for one BA, if configured.
    pub fn call_timeout(&self, ba: &str) -> Option<Duration> {
        self.call_timeouts.get(ba).copied()
    }

    pub fn base_url<'a>(&'a self, ba: &str, default: &'a str) -> &'a str {
        self.base_urls.get(ba).map(String::as_str).unwrap_or(default)
    }

    pub fn with_base_url(mut self, ba: &str, url: impl Into<String>) -> Self {
        self.base_urls.insert(ba.to_uppercase(), url.into());
        self
    }

    pub fn with_call_timeout(mut self, ba: &str, timeout: Duration) -> Self {
        self.call_timeouts.insert(ba.to_uppercase(), timeout);
        self
    }
}

fn parse_positive(key: &str, value: &str) -> Option<u64> {
    match value.parse::<u64>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            tracing::warn!(key, value, "ignoring invalid setting, keeping default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::from_vars(vec![]);
        assert_eq!(s.request_timeout, Duration::from_secs(30));
        assert_eq!(s.min_interval, Duration::from_millis(250));
        assert_eq!(s.database_url, "sqlite://genmix.db?mode=rwc");
        assert_eq!(s.call_timeout("ISONE"), None);
    }

    #[test]
    fn test_per_ba_overrides() {
        let s = Settings::from_vars(vars(&[
            ("GENMIX_CAISO_TIMEOUT_SECS", "90"),
            ("GENMIX_spp_BASE_URL", "http://localhost:9000/GenerationMix/"),
            ("GENMIX_REQUEST_TIMEOUT_SECS", "10"),
            ("PATH", "/usr/bin"),
        ]));
        assert_eq!(s.call_timeout("CAISO"), Some(Duration::from_secs(90)));
        assert_eq!(s.base_url("SPP", "default"), "http://localhost:9000/GenerationMix/");
        assert_eq!(s.base_url("BPA", "default"), "default");
        assert_eq!(s.request_timeout, Duration::from_secs(10));
        assert_eq!(s.call_timeout("REQUEST"), None);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let s = Settings::from_vars(vars(&[
            ("GENMIX_REQUEST_TIMEOUT_SECS", "soon"),
            ("GENMIX_MIN_INTERVAL_MS", "-1"),
            ("GENMIX_ERCOT_TIMEOUT_SECS", "0"),
        ]));
        assert_eq!(s.request_timeout, Duration::from_secs(30));
        assert_eq!(s.min_interval, Duration::from_millis(250));
        assert_eq!(s.call_timeout("ERCOT"), None);
    }
}
