// ============================================================================
// Exhaustive Keyset Pager
// ============================================================================
//
// Reads every row of a feed ordered by a monotonically increasing cursor by
// repeatedly asking for "rows with cursor > last seen". Total counts reported
// by the source are never consulted. A batch smaller than the page size ends
// the loop; a hard batch ceiling turns a source that never runs dry into an
// error instead of an endless loop or a silently truncated report.
//
// ============================================================================

use std::future::Future;

use thiserror::Error;

use crate::middleware::metrics::record_pager_batch;

/// A feed readable in cursor order.
pub trait PageSource: Sync {
    type Row: Send;
    type Error: std::error::Error + Send + 'static;

    /// Short label used in logs and metrics.
    fn system(&self) -> &'static str;

    /// Up to `top` rows with cursor strictly greater than `after`, ascending.
    fn fetch_after(
        &self,
        after: i64,
        top: usize,
    ) -> impl Future<Output = Result<Vec<Self::Row>, Self::Error>> + Send;

    fn cursor_of(&self, row: &Self::Row) -> Option<i64>;
}

#[derive(Error, Debug)]
pub enum PagerError<E: std::error::Error + 'static> {
    #[error("too many batches: pager exceeded its limit of {limit} batches")]
    TooManyBatches { limit: usize },

    #[error("row at position {position} of batch {batch} has no cursor value")]
    MissingCursor { batch: usize, position: usize },

    #[error(transparent)]
    Source(E),
}

#[derive(Debug, Clone)]
pub struct PagerConfig {
    pub batch_size: usize,
    pub max_batches: usize,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_batches: 500,
        }
    }
}

/// Fetch every row of `source`.
pub async fn fetch_all<S: PageSource>(
    source: &S,
    config: &PagerConfig,
) -> Result<Vec<S::Row>, PagerError<S::Error>> {
    let mut rows = Vec::new();
    let mut last_cursor: i64 = 0;

    for batch in 1..=config.max_batches {
        let page = source
            .fetch_after(last_cursor, config.batch_size)
            .await
            .map_err(PagerError::Source)?;
        record_pager_batch(source.system());

        let page_len = page.len();
        if page_len == 0 {
            tracing::debug!(system = source.system(), batch, total = rows.len(), "Pager reached an empty page");
            return Ok(rows);
        }

        let Some(last) = page.last() else {
            return Ok(rows);
        };
        let next_cursor = source
            .cursor_of(last)
            .ok_or(PagerError::MissingCursor { batch, position: page_len - 1 })?;

        if next_cursor <= last_cursor {
            tracing::warn!(
                system = source.system(),
                batch,
                cursor = next_cursor,
                previous = last_cursor,
                "Pager cursor did not advance"
            );
        }

        rows.extend(page);
        last_cursor = next_cursor;

        tracing::debug!(
            system = source.system(),
            batch,
            cursor = last_cursor,
            rows = page_len,
            total = rows.len(),
            "Fetched page"
        );

        if page_len < config.batch_size {
            return Ok(rows);
        }
    }

    tracing::error!(
        system = source.system(),
        limit = config.max_batches,
        rows = rows.len(),
        "Pager hit its batch ceiling"
    );
    Err(PagerError::TooManyBatches { limit: config.max_batches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("mock failure")]
    struct MockError;

    /// Rows are their own cursor values: 1..=total
    struct NumberedSource {
        total: i64,
        calls: AtomicUsize,
    }

    impl PageSource for NumberedSource {
        type Row = i64;
        type Error = MockError;

        fn system(&self) -> &'static str {
            "test"
        }

        async fn fetch_after(&self, after: i64, top: usize) -> Result<Vec<i64>, MockError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(((after + 1)..=self.total).take(top).collect())
        }

        fn cursor_of(&self, row: &i64) -> Option<i64> {
            Some(*row)
        }
    }

    /// Always returns a full page with the same cursor
    struct StuckSource;

    impl PageSource for StuckSource {
        type Row = i64;
        type Error = MockError;

        fn system(&self) -> &'static str {
            "test"
        }

        async fn fetch_after(&self, _after: i64, top: usize) -> Result<Vec<i64>, MockError> {
            Ok(vec![7; top])
        }

        fn cursor_of(&self, row: &i64) -> Option<i64> {
            Some(*row)
        }
    }

    struct FailingSource;

    impl PageSource for FailingSource {
        type Row = i64;
        type Error = MockError;

        fn system(&self) -> &'static str {
            "test"
        }

        async fn fetch_after(&self, _after: i64, _top: usize) -> Result<Vec<i64>, MockError> {
            Err(MockError)
        }

        fn cursor_of(&self, row: &i64) -> Option<i64> {
            Some(*row)
        }
    }

    fn config(batch_size: usize) -> PagerConfig {
        PagerConfig { batch_size, max_batches: 1000 }
    }

    #[tokio::test]
    async fn test_returns_every_row_for_any_batch_size() {
        for batch_size in [1, 2, 3, 7, 10, 49, 50, 51, 100] {
            let source = NumberedSource { total: 50, calls: AtomicUsize::new(0) };
            let rows = fetch_all(&source, &config(batch_size)).await.unwrap();

            assert_eq!(rows.len(), 50, "batch size {}", batch_size);
            let unique: HashSet<i64> = rows.iter().copied().collect();
            assert_eq!(unique.len(), 50);
            assert_eq!(rows, (1..=50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_short_page_stops_without_extra_request() {
        let source = NumberedSource { total: 25, calls: AtomicUsize::new(0) };
        fetch_all(&source, &config(10)).await.unwrap();
        // 10 + 10 + 5
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_empty_page() {
        let source = NumberedSource { total: 20, calls: AtomicUsize::new(0) };
        let rows = fetch_all(&source, &config(10)).await.unwrap();
        assert_eq!(rows.len(), 20);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let source = NumberedSource { total: 0, calls: AtomicUsize::new(0) };
        assert!(fetch_all(&source, &config(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stuck_cursor_hits_ceiling() {
        let cfg = PagerConfig { batch_size: 5, max_batches: 12 };
        let err = fetch_all(&StuckSource, &cfg).await.unwrap_err();
        assert!(matches!(err, PagerError::TooManyBatches { limit: 12 }));
        assert!(err.to_string().contains("too many batches"));
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let err = fetch_all(&FailingSource, &config(10)).await.unwrap_err();
        assert!(matches!(err, PagerError::Source(MockError)));
    }
}
