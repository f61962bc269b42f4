//! Row-chunk scheduling of a pixel scan.
//!
//! Rows are split into contiguous chunks, scanned on a dedicated rayon pool and collected in
//! row order. A pool that cannot be built or a worker that panics makes the scheduler rescan
//! the whole row range sequentially with the same scan function.

use crate::types::{QcError, QcResult};
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Row granularity: larger images get proportionally more chunks per worker
pub const ROWS_PER_GRANULE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkScheduler {
    workers: usize,
    rows_per_granule: usize,
}

impl Default for ChunkScheduler {
    fn default() -> Self {
        Self::with_available_cores()
    }
}

impl ChunkScheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            rows_per_granule: ROWS_PER_GRANULE,
        }
    }

    /// One worker per core, leaving one core to the caller
    pub fn with_available_cores() -> Self {
        Self::new(rayon::current_num_threads().saturating_sub(1))
    }

    pub fn with_rows_per_granule(mut self, rows_per_granule: usize) -> Self {
        self.rows_per_granule = rows_per_granule.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Rows per chunk: `ceil(rows / (workers * max(1, rows / granule)))`
    pub fn chunk_rows(&self, rows: usize) -> usize {
        let granules = (rows / self.rows_per_granule).max(1);
        let chunks = self.workers * granules;
        ((rows + chunks - 1) / chunks).max(1)
    }

    /// Contiguous chunks covering `[0, rows)` exactly once
    pub fn partition(&self, rows: usize) -> Vec<Range<usize>> {
        let size = self.chunk_rows(rows);
        (0..rows)
            .step_by(size)
            .map(|start| start..(start + size).min(rows))
            .collect()
    }

    /// Scan `[0, rows)` and return one result per chunk, in row order.
    ///
    /// Errors returned by `scan` are propagated as they are; only executor failures
    /// (pool construction, worker panic) trigger the sequential rescan, whose result is a
    /// single-element vector.
    pub fn run<R, F>(&self, rows: usize, scan: F) -> QcResult<Vec<R>>
    where
        R: Send,
        F: Fn(Range<usize>) -> QcResult<R> + Sync,
    {
        if rows == 0 {
            return Ok(Vec::new());
        }
        if self.workers <= 1 {
            return Ok(vec![scan(0..rows)?]);
        }

        match self.run_parallel(rows, &scan) {
            Ok(results) => results,
            Err(error) => {
                log::warn!("{}, falling back to a sequential scan", error);
                Ok(vec![scan(0..rows)?])
            }
        }
    }

    /// Outer error: executor failure. Inner result: what the chunks returned.
    #[cfg(feature = "parallel")]
    fn run_parallel<R, F>(&self, rows: usize, scan: &F) -> QcResult<QcResult<Vec<R>>>
    where
        R: Send,
        F: Fn(Range<usize>) -> QcResult<R> + Sync,
    {
        use rayon::prelude::*;

        let chunks = self.partition(rows);
        log::debug!(
            "Scanning {} rows in {} chunks of {} rows on {} workers",
            rows,
            chunks.len(),
            self.chunk_rows(rows),
            self.workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| QcError::Executor(format!("Failed to build worker pool: {}", e)))?;

        catch_unwind(AssertUnwindSafe(|| {
            pool.install(|| {
                chunks
                    .into_par_iter()
                    .map(|range| scan(range))
                    .collect::<QcResult<Vec<R>>>()
            })
        }))
        .map_err(|_| QcError::Executor("Worker panicked during chunk scan".to_string()))
    }

    #[cfg(not(feature = "parallel"))]
    fn run_parallel<R, F>(&self, rows: usize, scan: &F) -> QcResult<QcResult<Vec<R>>>
    where
        R: Send,
        F: Fn(Range<usize>) -> QcResult<R> + Sync,
    {
        let chunks = self.partition(rows);
        catch_unwind(AssertUnwindSafe(|| {
            chunks.into_iter().map(|range| scan(range)).collect::<QcResult<Vec<R>>>()
        }))
        .map_err(|_| QcError::Executor("Chunk scan panicked".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn assert_exact_cover(chunks: &[Range<usize>], rows: usize) {
        let mut next = 0;
        for chunk in chunks {
            assert_eq!(chunk.start, next);
            assert!(chunk.end > chunk.start);
            next = chunk.end;
        }
        assert_eq!(next, rows);
    }

    #[test]
    fn test_partition_2500_rows_on_4_workers() {
        let scheduler = ChunkScheduler::new(4);
        assert_eq!(scheduler.chunk_rows(2500), 313);
        let chunks = scheduler.partition(2500);
        assert_eq!(chunks.len(), 8);
        assert_exact_cover(&chunks, 2500);
    }

    #[test]
    fn test_partition_small_and_odd_sizes() {
        for workers in [1, 3, 7] {
            let scheduler = ChunkScheduler::new(workers);
            for rows in [1, 2, 5, 999, 1000, 1001, 4321] {
                assert_exact_cover(&scheduler.partition(rows), rows);
            }
        }
        assert!(ChunkScheduler::new(4).partition(0).is_empty());
        assert_eq!(ChunkScheduler::new(0).workers(), 1);
    }

    #[test]
    fn test_run_returns_chunks_in_row_order() {
        let scheduler = ChunkScheduler::new(3);
        let results = scheduler.run(100, |range| Ok(range)).unwrap();
        let flat: Vec<usize> = results.into_iter().flatten().collect();
        assert_eq!(flat, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_chunk_errors_propagate() {
        let scheduler = ChunkScheduler::new(2);
        let result: QcResult<Vec<()>> = scheduler.run(10, |range| {
            if range.contains(&7) {
                Err(QcError::Configuration("boom".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(QcError::Configuration(_))));
    }

    #[test]
    fn test_worker_panic_falls_back_to_sequential_scan() {
        let panicked = AtomicBool::new(false);
        let scheduler = ChunkScheduler::new(2);
        let results = scheduler
            .run(50, |range| {
                if range.start > 0 && !panicked.swap(true, Ordering::SeqCst) {
                    panic!("worker lost");
                }
                Ok(range.len())
            })
            .unwrap();
        assert_eq!(results, vec![50]);
    }
}
