use chrono_tz::Tz;
use serde::Serialize;

pub mod registry;

pub use registry::StaticReference;

/// A grid operator. Immutable reference data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancingAuthority {
    pub abbrev: &'static str,
    pub name: &'static str,
    /// Zone used to localize naive upstream timestamps.
    #[serde(serialize_with = "serialize_tz")]
    pub timezone: Tz,
}

/// A normalization target for upstream fuel labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuelType {
    pub name: &'static str,
    pub description: &'static str,
    pub is_renewable: bool,
}

fn serialize_tz<S: serde::Serializer>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(tz.name())
}

/// Read-only lookup of reference data, loaded once at process start.
pub trait ReferenceStore: Send + Sync {
    fn resolve_fuel(&self, name: &str) -> Option<&FuelType>;
    fn resolve_ba(&self, code: &str) -> Option<&BalancingAuthority>;
    fn fuels(&self) -> Vec<&FuelType>;
    fn balancing_authorities(&self) -> Vec<&BalancingAuthority>;
}
