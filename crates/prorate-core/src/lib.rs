#![deny(warnings)]
#![allow(missing_docs)]
//! Core functionality for the prorate cost allocation engine.
//!
//! This crate fragments cost-bearing entities into weighted fragments,
//! resolves external weights in one deduplicated batch, and redistributes
//! each entity's cost across its fragments in proportion to weight, with
//! conservation guaranteed per entity.

/// Re-aggregation of allocated fragments into output rows
pub mod aggregation;
/// Proportional ratio and share computation with conservation checks
pub mod allocator;
/// Engine configuration, key composition and scope filtering
pub mod config;
/// Allocation engine driving the run phases
pub mod engine;
/// Error types with category and severity classification
pub mod error;
/// Entity fragmentation into day and product fragments
pub mod fragmenter;
/// Parallel batch processing helpers
pub mod parallel;
/// Batched weight and daily cost resolution against external sources
pub mod resolver;
/// Entity, fragment and run report types
pub mod types;

// Re-export the engine surface for callers
pub use config::{EngineConfig, KeyFormat, SCOPE_FILTER_ENV};
pub use engine::ProrateEngine;
pub use error::{ErrorSeverity, ProrateError, ProrateResult};
pub use parallel::ParallelConfig;
pub use resolver::{DailyCostSource, DailyCostTable, ResolvedWeights, WeightSource};
pub use types::{
    AllocationRow, CostSource, Entity, EntityError, EntityRecord, Fragment, GroupBy, RunContext,
    RunOptions, RunPhase, RunReport, RunStats, ScenarioRange, SplitBasis,
};

// Shared scalar types live in prorate-types
pub use prorate_types::{DailyCost, EntityId, FragmentKey, Weight};
