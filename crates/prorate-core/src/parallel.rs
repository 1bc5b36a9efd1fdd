//! Parallel processing for allocation batches
//!
//! Fragmentation and allocation are pure per-entity operations with no shared
//! mutable state, so large batches fan out across a rayon worker pool. Indexed
//! parallel iteration preserves input order, which keeps parallel and
//! sequential runs byte-identical in their output.

use crate::error::{ProrateError, ProrateResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Configuration for parallel processing behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Minimum number of entities to trigger parallel processing
    /// Below this threshold, use sequential processing to avoid overhead
    pub parallel_threshold: usize,

    /// Minimum number of entities a worker takes in one chunk
    /// Larger chunks reduce coordination overhead but may impact load balancing
    pub chunk_size: usize,

    /// Maximum number of parallel workers
    /// Should typically match or be slightly less than available CPU cores
    pub max_workers: usize,

    /// Enable parallel entity processing for large batches
    pub enable_parallel_entities: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        let cpu_count = num_cpus::get();
        Self {
            parallel_threshold: 100, // Process serially for < 100 entities
            chunk_size: 50,          // Each worker takes at least 50 entities
            max_workers: cpu_count,  // Use all available CPU cores
            enable_parallel_entities: cpu_count > 2, // Enable on dual-core+ systems
        }
    }
}

/// Map `op` over `items`, preserving input order in the output.
///
/// Small batches stay sequential to avoid pool overhead. The parallel path
/// runs on a dedicated rayon pool sized to `max_workers`; indexed collection
/// guarantees the output order matches the input order on both paths.
#[instrument(skip(items, op))]
pub fn map_ordered<I, O, F>(items: &[I], config: &ParallelConfig, op: F) -> ProrateResult<Vec<O>>
where
    I: Sync,
    O: Send,
    F: Fn(&I) -> O + Send + Sync,
{
    if !config.enable_parallel_entities || items.len() < config.parallel_threshold {
        info!(
            entity_count = items.len(),
            threshold = config.parallel_threshold,
            "Using sequential processing for small batch"
        );
        return Ok(items.iter().map(op).collect());
    }

    info!(
        entity_count = items.len(),
        chunk_size = config.chunk_size,
        max_workers = config.max_workers,
        "Starting parallel batch processing"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_workers)
        .build()
        .map_err(|e| {
            ProrateError::internal_component(
                "parallel",
                format!("failed to build worker pool: {e}"),
            )
        })?;

    let results: Vec<O> = pool.install(|| {
        items.par_iter().with_min_len(config.chunk_size.max(1)).map(|item| op(item)).collect()
    });

    info!(result_count = results.len(), "Completed parallel batch processing");

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_config_defaults() {
        let config = ParallelConfig::default();
        assert!(config.parallel_threshold > 0);
        assert!(config.chunk_size > 0);
        assert!(config.max_workers > 0);
    }

    #[test]
    fn test_map_ordered_sequential_path() {
        let config = ParallelConfig::default();
        let items: Vec<u64> = (0..10).collect();
        let doubled = map_ordered(&items, &config, |x| x * 2).unwrap();
        assert_eq!(doubled, (0..10).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_map_ordered_parallel_matches_sequential() {
        let parallel = ParallelConfig {
            parallel_threshold: 1,
            chunk_size: 16,
            max_workers: 4,
            enable_parallel_entities: true,
        };
        let sequential = ParallelConfig {
            enable_parallel_entities: false,
            ..ParallelConfig::default()
        };

        let items: Vec<u64> = (0..500).collect();
        let from_parallel = map_ordered(&items, &parallel, |x| x * x).unwrap();
        let from_sequential = map_ordered(&items, &sequential, |x| x * x).unwrap();
        assert_eq!(from_parallel, from_sequential);
    }

    #[test]
    fn test_map_ordered_preserves_input_order() {
        let config = ParallelConfig {
            parallel_threshold: 1,
            chunk_size: 1,
            max_workers: 8,
            enable_parallel_entities: true,
        };
        let items: Vec<usize> = (0..256).rev().collect();
        let mapped = map_ordered(&items, &config, |x| *x).unwrap();
        assert_eq!(mapped, items);
    }
}
