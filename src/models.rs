use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::GenMixError;

/// Trading/reporting regime a data point was published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "RT5M")]
    RealTime5Min,
    #[serde(rename = "RT10M")]
    RealTime10Min,
    #[serde(rename = "RTHR")]
    RealTimeHourly,
}

impl Market {
    pub fn code(&self) -> &'static str {
        match self {
            Market::RealTime5Min => "RT5M",
            Market::RealTime10Min => "RT10M",
            Market::RealTimeHourly => "RTHR",
        }
    }

    /// Sampling frequency implied by the market. Never chosen independently.
    pub fn frequency(&self) -> Frequency {
        match self {
            Market::RealTime5Min => Frequency::FiveMinute,
            Market::RealTime10Min => Frequency::TenMinute,
            Market::RealTimeHourly => Frequency::Hourly,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Market {
    type Err = GenMixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RT5M" => Ok(Market::RealTime5Min),
            "RT10M" => Ok(Market::RealTime10Min),
            "RTHR" => Ok(Market::RealTimeHourly),
            other => Err(GenMixError::InvalidQuery(format!("unknown market '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "5m")]
    FiveMinute,
    #[serde(rename = "10m")]
    TenMinute,
    #[serde(rename = "1hr")]
    Hourly,
}

impl Frequency {
    pub fn code(&self) -> &'static str {
        match self {
            Frequency::FiveMinute => "5m",
            Frequency::TenMinute => "10m",
            Frequency::Hourly => "1hr",
        }
    }

    /// Length of one sample interval.
    pub fn interval(&self) -> chrono::Duration {
        match self {
            Frequency::FiveMinute => chrono::Duration::minutes(5),
            Frequency::TenMinute => chrono::Duration::minutes(10),
            Frequency::Hourly => chrono::Duration::hours(1),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Canonical, source-agnostic generation record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DataPoint {
    pub ba_name: String,
    pub fuel_name: String,
    #[serde(rename = "gen_MW")]
    pub gen_mw: f64,
    pub timestamp: DateTime<Utc>,
    pub freq: Frequency,
    pub market: Market,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    /// Single most recent snapshot.
    Latest,
    /// The full previous calendar day.
    Yesterday,
    /// `[start_at, end_at)` in UTC.
    Range {
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub mode: QueryMode,
    pub market: Option<Market>,
    pub timeout: Option<Duration>,
}

impl QuerySpec {
    pub fn latest() -> Self {
        Self { mode: QueryMode::Latest, market: None, timeout: None }
    }

    pub fn yesterday() -> Self {
        Self { mode: QueryMode::Yesterday, market: None, timeout: None }
    }

    pub fn range(start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Result<Self, GenMixError> {
        let query = Self {
            mode: QueryMode::Range { start_at, end_at },
            market: None,
            timeout: None,
        };
        query.validate()?;
        Ok(query)
    }

    pub fn with_market(mut self, market: Market) -> Self {
        self.market = Some(market);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Struct fields are public, so the range invariant is re-checked before every call.
    pub fn validate(&self) -> Result<(), GenMixError> {
        if let QueryMode::Range { start_at, end_at } = &self.mode {
            if start_at >= end_at {
                return Err(GenMixError::InvalidQuery(format!(
                    "start_at ({}) must be before end_at ({})",
                    start_at, end_at
                )));
            }
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(GenMixError::InvalidQuery("timeout must be non-zero".to_string()));
            }
        }
        Ok(())
    }
}
