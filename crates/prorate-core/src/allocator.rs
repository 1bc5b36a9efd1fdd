//! Proportional Allocator
//!
//! Computes each fragment's share of an entity's cost from its resolved
//! weight: `ratio = weight_i / sum(defined weights)`, share = cost × ratio.
//! Absent weights are excluded from the denominator and yield no share. When
//! no usable weight exists (all absent, or the defined weights sum to zero)
//! the allocator falls back to an equal split across every fragment and flags
//! the outcome, never averaging silently.
//!
//! The split of an entity's own total carries a residual fold: the
//! floating-point leftover `total - sum(shares)` is added to the largest
//! share so the machine-precision sum matches the total, then the
//! conservation invariant is checked against the configured tolerance.

use crate::error::{ProrateError, ProrateResult};
use crate::types::{Entity, Fragment};
use prorate_types::Weight;

/// Per-fragment ratios for one entity, with the flags describing how they
/// were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRatios {
    /// Ratio per fragment, index-aligned with the input; `None` for fragments
    /// with an absent weight (unless the fallback applied)
    pub ratios: Vec<Option<f64>>,
    /// Denominator: the sum of defined weights
    pub weight_total: f64,
    /// Equal split applied because no usable weight existed
    pub fallback: bool,
    /// At least one fragment had an absent weight
    pub partial: bool,
}

/// Splits entity costs proportionally to fragment weights.
#[derive(Debug, Default)]
pub struct ProportionalAllocator;

impl ProportionalAllocator {
    /// Compute the split ratios for one entity's fragments.
    ///
    /// Every weight must be resolved or absent by now; a `Pending` weight
    /// past the resolve barrier is an internal invariant breach. Negative or
    /// non-finite weights are entity-level structural errors.
    pub fn ratios(&self, entity: &Entity, fragments: &[Fragment]) -> ProrateResult<SplitRatios> {
        if fragments.is_empty() {
            return Err(ProrateError::internal_component(
                "allocator",
                format!("entity {} reached allocation with no fragments", entity.id),
            ));
        }

        let mut weight_total = 0.0f64;
        let mut defined = 0usize;
        let mut partial = false;
        for fragment in fragments {
            match fragment.weight {
                Weight::Resolved(value) => {
                    if !value.is_finite() {
                        return Err(ProrateError::invalid_weight(
                            entity.id,
                            fragment.key.as_str(),
                            value,
                            "resolved weight is not a finite number",
                        ));
                    }
                    if value < 0.0 {
                        return Err(ProrateError::invalid_weight(
                            entity.id,
                            fragment.key.as_str(),
                            value,
                            "resolved weight is negative",
                        ));
                    }
                    weight_total += value;
                    defined += 1;
                }
                Weight::Absent => partial = true,
                Weight::Pending => {
                    return Err(ProrateError::internal_component(
                        "allocator",
                        format!(
                            "fragment {} of entity {} is still pending past the resolve barrier",
                            fragment.key, entity.id
                        ),
                    ));
                }
            }
        }

        if defined == 0 || weight_total == 0.0 {
            // Degenerate split: every fragment takes an equal share
            let equal = 1.0 / fragments.len() as f64;
            return Ok(SplitRatios {
                ratios: vec![Some(equal); fragments.len()],
                weight_total: 0.0,
                fallback: true,
                partial,
            });
        }

        let ratios = fragments
            .iter()
            .map(|fragment| fragment.weight.as_f64().map(|value| value / weight_total))
            .collect();

        Ok(SplitRatios { ratios, weight_total, fallback: false, partial })
    }

    /// Split the entity's own total cost by the computed ratios.
    ///
    /// Returns one share per fragment, `None` where the ratio is undefined.
    /// The residual fold makes the defined shares sum back to the total
    /// within machine precision; a result outside `tolerance` is a
    /// conservation violation and always fatal.
    pub fn split_total(
        &self,
        entity: &Entity,
        split: &SplitRatios,
        tolerance: f64,
    ) -> ProrateResult<Vec<Option<f64>>> {
        let mut shares: Vec<Option<f64>> =
            split.ratios.iter().map(|ratio| ratio.map(|r| entity.total_cost * r)).collect();

        let defined_sum: f64 = shares.iter().flatten().sum();
        let residual = entity.total_cost - defined_sum;

        let largest = shares
            .iter()
            .enumerate()
            .filter_map(|(i, share)| share.map(|s| (i, s)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        match largest {
            Some(index) => {
                if let Some(share) = shares[index].as_mut() {
                    *share += residual;
                }
            }
            None => {
                return Err(ProrateError::internal_component(
                    "allocator",
                    format!("entity {} has no defined share to fold the residual into", entity.id),
                ));
            }
        }

        let final_sum: f64 = shares.iter().flatten().sum();
        let drift = (final_sum - entity.total_cost).abs();
        if drift > tolerance {
            return Err(ProrateError::conservation(
                entity.id,
                entity.total_cost,
                final_sum,
                tolerance,
                "allocated shares do not sum back to the entity total",
            ));
        }

        Ok(shares)
    }
}
