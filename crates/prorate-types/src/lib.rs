//! Prorate Types
//!
//! This crate defines the value-level types shared across the prorate
//! ecosystem (currently `prorate-core` and any transport layer embedding it).
//! It provides the three-state [`Weight`], the stable [`FragmentKey`], and the
//! externally sourced [`DailyCost`] row, so that the core pipeline and its
//! collaborators agree on one vocabulary without circular dependencies.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::cargo)]
#![deny(missing_docs)]

// Re-export types
mod types;
pub use types::{DailyCost, EntityId, FragmentKey, Weight};
