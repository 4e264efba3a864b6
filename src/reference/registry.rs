use once_cell::sync::Lazy;
use std::collections::HashMap;

use chrono_tz::America::{Chicago, Los_Angeles, New_York};
use chrono_tz::Etc::GMTPlus5;

use super::{BalancingAuthority, FuelType, ReferenceStore};

macro_rules! ba {
    ($abbrev:expr, $name:expr, $tz:expr) => {
        BalancingAuthority { abbrev: $abbrev, name: $name, timezone: $tz }
    };
}

macro_rules! fuel {
    ($name:expr, $desc:expr, $renewable:expr) => {
        FuelType { name: $name, description: $desc, is_renewable: $renewable }
    };
}

// ============================================================================
// BALANCING AUTHORITIES
// ============================================================================

static BALANCING_AUTHORITIES: Lazy<Vec<BalancingAuthority>> = Lazy::new(|| {
    vec![
        ba!("ISONE", "ISO New England", New_York),
        // MISO stamps its real-time feed in EST year round.
        ba!("MISO", "Midcontinent Independent System Operator", GMTPlus5),
        ba!("SPP", "Southwest Power Pool", Chicago),
        ba!("BPA", "Bonneville Power Administration", Los_Angeles),
        ba!("CAISO", "California Independent System Operator", Los_Angeles),
        ba!("ERCOT", "Electric Reliability Council of Texas", Chicago),
        ba!("PJM", "PJM Interconnection", New_York),
    ]
});

// ============================================================================
// FUEL TYPES
// ============================================================================

static FUEL_TYPES: Lazy<Vec<FuelType>> = Lazy::new(|| {
    vec![
        fuel!("coal", "Coal", false),
        fuel!("natgas", "Natural gas", false),
        fuel!("oil", "Oil and diesel", false),
        fuel!("nuclear", "Nuclear", false),
        fuel!("hydro", "Hydroelectric", true),
        fuel!("smhydro", "Small hydroelectric", true),
        fuel!("wind", "Wind", true),
        fuel!("solar", "Solar, all technologies", true),
        fuel!("solarpv", "Solar photovoltaic", true),
        fuel!("solarth", "Solar thermal", true),
        fuel!("geo", "Geothermal", true),
        fuel!("biomass", "Biomass and wood", true),
        fuel!("biogas", "Biogas and landfill gas", true),
        fuel!("refuse", "Municipal refuse", false),
        fuel!("thermal", "Thermal, unspecified", false),
        fuel!("renewable", "Renewables not broken out elsewhere", true),
        fuel!("nonwind", "All generation other than wind", false),
        fuel!("other", "Other or unclassified", false),
    ]
});

static BA_MAP: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    BALANCING_AUTHORITIES
        .iter()
        .enumerate()
        .map(|(idx, ba)| (ba.abbrev, idx))
        .collect()
});

static FUEL_MAP: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    FUEL_TYPES
        .iter()
        .enumerate()
        .map(|(idx, fuel)| (fuel.name, idx))
        .collect()
});

/// Reference store backed by the static tables above.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticReference;

impl StaticReference {
    /// Direct access for adapters that need their own BA record at construction time.
    pub fn ba(code: &str) -> Option<&'static BalancingAuthority> {
        BA_MAP.get(code).and_then(|&idx| BALANCING_AUTHORITIES.get(idx))
    }

    pub fn fuel(name: &str) -> Option<&'static FuelType> {
        FUEL_MAP.get(name).and_then(|&idx| FUEL_TYPES.get(idx))
    }
}

impl ReferenceStore for StaticReference {
    fn resolve_fuel(&self, name: &str) -> Option<&FuelType> {
        Self::fuel(name)
    }

    fn resolve_ba(&self, code: &str) -> Option<&BalancingAuthority> {
        Self::ba(code)
    }

    fn fuels(&self) -> Vec<&FuelType> {
        FUEL_TYPES.iter().collect()
    }

    fn balancing_authorities(&self) -> Vec<&BalancingAuthority> {
        BALANCING_AUTHORITIES.iter().collect()
    }
}
