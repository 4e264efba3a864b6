use once_cell::sync::Lazy;

use super::{bpa, caiso, ercot, isone, miso, pjm, spp};
use super::{GenerationSource, SourceContext};
use crate::config::Settings;
use crate::error::{GenMixError, Result};

type Constructor = fn(SourceContext) -> Result<Box<dyn GenerationSource>>;

macro_rules! source {
    ($code:expr, $ty:ty) => {
        (
            $code,
            (|ctx: SourceContext| -> Result<Box<dyn GenerationSource>> { Ok(Box::new(<$ty>::new(ctx)?)) })
                as Constructor,
        )
    };
}

// ============================================================================
// REGISTERED SOURCES
// ============================================================================

static SOURCES: Lazy<Vec<(&'static str, Constructor)>> = Lazy::new(|| {
    vec![
        source!("ISONE", isone::IsoneSource),
        source!("MISO", miso::MisoSource),
        source!("SPP", spp::SppSource),
        source!("BPA", bpa::BpaSource),
        source!("CAISO", caiso::CaisoSource),
        source!("ERCOT", ercot::ErcotSource),
        source!("PJM", pjm::PjmSource),
    ]
});

/// Builds adapters by BA code over one shared [`SourceContext`].
#[derive(Clone)]
pub struct SourceFactory {
    ctx: SourceContext,
}

impl SourceFactory {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }

    pub fn live(settings: Settings) -> Result<Self> {
        SourceContext::live(settings).map(Self::new)
    }

    pub fn context(&self) -> &SourceContext {
        &self.ctx
    }

    /// Codes are matched trimmed and case-insensitively.
    pub fn create(&self, code: &str) -> Result<Box<dyn GenerationSource>> {
        let wanted = code.trim().to_uppercase();
        let (_, constructor) = SOURCES
            .iter()
            .find(|(registered, _)| *registered == wanted)
            .ok_or_else(|| GenMixError::UnknownSource(code.trim().to_string()))?;
        constructor(self.ctx.clone())
    }

    pub fn available() -> Vec<&'static str> {
        SOURCES.iter().map(|(code, _)| *code).collect()
    }
}
