use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;

use crate::fetcher::SourceFactory;
use crate::models::{DataPoint, QuerySpec};

/// Destination for canonical points. The core only ever writes to it.
#[async_trait]
pub trait PointSink: Send + Sync {
    /// Stores `points`, returning how many rows were written.
    async fn accept(&self, points: &[DataPoint]) -> Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub ba: String,
    pub fetched: usize,
    pub stored: usize,
}

/// Fetches one BA and hands the result to the sink.
pub async fn ingest(
    factory: &SourceFactory,
    sink: &dyn PointSink,
    code: &str,
    query: &QuerySpec,
) -> Result<IngestOutcome> {
    let source = factory.create(code)?;
    let ba = source.ba().abbrev.to_string();

    let points = source
        .get_generation(query)
        .await
        .with_context(|| format!("fetching generation for {}", ba))?;

    let stored = if points.is_empty() {
        0
    } else {
        sink.accept(&points)
            .await
            .with_context(|| format!("storing {} points for {}", points.len(), ba))?
    };

    tracing::info!(ba = %ba, fetched = points.len(), stored, "ingest complete");
    Ok(IngestOutcome { ba, fetched: points.len(), stored })
}

/// Ingests several BAs concurrently. One failure never cancels the others.
pub async fn ingest_many(
    factory: &SourceFactory,
    sink: &dyn PointSink,
    codes: &[String],
    query: &QuerySpec,
) -> Vec<(String, Result<IngestOutcome>)> {
    let tasks = codes.iter().map(|code| async move {
        let outcome = ingest(factory, sink, code, query).await;
        if let Err(e) = &outcome {
            tracing::error!(ba = %code, error = %format!("{:#}", e), "ingest failed");
        }
        (code.clone(), outcome)
    });
    join_all(tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::GenMixError;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct VecSink(Mutex<Vec<DataPoint>>);

    #[async_trait]
    impl PointSink for VecSink {
        async fn accept(&self, points: &[DataPoint]) -> Result<usize> {
            self.0.lock().await.extend_from_slice(points);
            Ok(points.len())
        }
    }

    #[tokio::test]
    async fn test_unknown_code_is_reported_per_ba() {
        let factory = SourceFactory::live(Settings::default()).unwrap();
        let sink = VecSink::default();
        let results = ingest_many(&factory, &sink, &["NOPE".to_string()], &QuerySpec::latest()).await;
        assert_eq!(results.len(), 1);
        let err = results[0].1.as_ref().unwrap_err();
        assert!(matches!(err.downcast_ref::<GenMixError>(), Some(GenMixError::UnknownSource(_))));
        assert!(sink.0.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_range_unavailable_surfaces_typed_error() {
        let factory = SourceFactory::live(Settings::default()).unwrap();
        let sink = VecSink::default();
        let now = chrono::Utc::now();
        let query = QuerySpec::range(now - chrono::Duration::days(2), now - chrono::Duration::days(1)).unwrap();
        // MISO rejects ranges before any network call.
        let err = ingest(&factory, &sink, "MISO", &query).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<GenMixError>(), Some(GenMixError::RangeUnavailable { .. })));
    }
}
