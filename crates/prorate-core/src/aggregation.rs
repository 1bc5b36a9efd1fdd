//! Aggregation stage
//!
//! Collapses allocated fragments back into output rows, either one row per
//! entity or one per (entity, day). An aggregation key whose contributions
//! are all absent yields an absent total, never zero.

use crate::types::{AllocationRow, Fragment, GroupBy};
use chrono::NaiveDate;
use prorate_types::EntityId;
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// One entity's fully allocated fragments, ready for aggregation.
#[derive(Debug, Clone)]
pub struct EntityAllocation {
    pub entity_id: EntityId,
    pub external_id: Option<String>,
    /// The degenerate equal split was applied
    pub fallback: bool,
    /// At least one fragment carries an absent weight or cost
    pub partial: bool,
    pub fragments: Vec<Fragment>,
}

/// Groups allocated fragments into final rows.
#[derive(Debug, Default)]
pub struct Aggregator;

impl Aggregator {
    /// Collapse the batch's allocations into rows, sorted by
    /// (entity_id, day).
    #[instrument(skip(self, allocations))]
    pub fn aggregate(
        &self,
        allocations: &[EntityAllocation],
        group_by: GroupBy,
    ) -> Vec<AllocationRow> {
        let mut rows = Vec::new();
        for allocation in allocations {
            match group_by {
                GroupBy::Entity => rows.push(Self::entity_row(allocation)),
                GroupBy::EntityDay => rows.extend(Self::entity_day_rows(allocation)),
            }
        }
        rows.sort_by_key(|row| (row.entity_id, row.day));

        info!(
            allocation_count = allocations.len(),
            row_count = rows.len(),
            "Aggregation complete"
        );
        rows
    }

    fn entity_row(allocation: &EntityAllocation) -> AllocationRow {
        let (total, partial) = Self::sum_fragments(allocation.fragments.iter());
        AllocationRow {
            entity_id: allocation.entity_id,
            external_id: allocation.external_id.clone(),
            day: None,
            allocated_cost: total,
            partial: partial || allocation.partial,
            fallback: allocation.fallback,
            fragment_count: allocation.fragments.len(),
        }
    }

    fn entity_day_rows(allocation: &EntityAllocation) -> Vec<AllocationRow> {
        let mut by_day: BTreeMap<Option<NaiveDate>, Vec<&Fragment>> = BTreeMap::new();
        for fragment in &allocation.fragments {
            by_day.entry(fragment.day).or_default().push(fragment);
        }

        by_day
            .into_iter()
            .map(|(day, fragments)| {
                let (total, partial) = Self::sum_fragments(fragments.iter().copied());
                AllocationRow {
                    entity_id: allocation.entity_id,
                    external_id: allocation.external_id.clone(),
                    day,
                    allocated_cost: total,
                    partial,
                    fallback: allocation.fallback,
                    fragment_count: fragments.len(),
                }
            })
            .collect()
    }

    /// Sum defined fragment costs. Returns `(None, …)` when every
    /// contribution is absent, and whether any contribution was absent.
    fn sum_fragments<'a>(fragments: impl Iterator<Item = &'a Fragment>) -> (Option<f64>, bool) {
        let mut total: Option<f64> = None;
        let mut partial = false;
        for fragment in fragments {
            if fragment.weight.is_absent() {
                partial = true;
            }
            match fragment.allocated_cost {
                Some(cost) => total = Some(total.unwrap_or(0.0) + cost),
                None => partial = true,
            }
        }
        (total, partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prorate_types::{FragmentKey, Weight};

    fn allocated_fragment(
        entity_id: u64,
        key: &str,
        day: Option<NaiveDate>,
        cost: Option<f64>,
    ) -> Fragment {
        let mut f = Fragment::product(entity_id, "P", FragmentKey::from(key));
        f.day = day;
        f.weight = match cost {
            Some(_) => Weight::Resolved(1.0),
            None => Weight::Absent,
        };
        f.allocated_cost = cost;
        f
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_entity_grouping_sums_costs() {
        let allocations = vec![
            EntityAllocation {
                entity_id: 1,
                external_id: Some("job-1".to_string()),
                fallback: false,
                partial: false,
                fragments: vec![
                    allocated_fragment(1, "a", Some(day(1)), Some(30.0)),
                    allocated_fragment(1, "b", Some(day(2)), Some(60.0)),
                ],
            },
            EntityAllocation {
                entity_id: 2,
                external_id: None,
                fallback: true,
                partial: false,
                fragments: vec![allocated_fragment(2, "c", None, Some(5.0))],
            },
        ];

        let rows = Aggregator.aggregate(&allocations, GroupBy::Entity);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].allocated_cost, Some(90.0));
        assert_eq!(rows[0].external_id.as_deref(), Some("job-1"));
        assert_eq!(rows[0].fragment_count, 2);
        assert!(!rows[0].fallback);
        assert_eq!(rows[1].allocated_cost, Some(5.0));
        assert!(rows[1].fallback);
    }

    #[test]
    fn test_entity_day_grouping_emits_one_row_per_day() {
        let allocations = vec![EntityAllocation {
            entity_id: 1,
            external_id: None,
            fallback: false,
            partial: false,
            fragments: vec![
                allocated_fragment(1, "a", Some(day(1)), Some(68.57)),
                allocated_fragment(1, "b", Some(day(2)), Some(274.29)),
                allocated_fragment(1, "c", Some(day(3)), Some(17.14)),
            ],
        }];

        let rows = Aggregator.aggregate(&allocations, GroupBy::EntityDay);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].day, Some(day(1)));
        assert_eq!(rows[2].day, Some(day(3)));
        assert_eq!(rows[1].allocated_cost, Some(274.29));
    }

    #[test]
    fn test_all_absent_contributions_stay_absent() {
        let allocations = vec![EntityAllocation {
            entity_id: 3,
            external_id: None,
            fallback: false,
            partial: true,
            fragments: vec![
                allocated_fragment(3, "a", Some(day(1)), None),
                allocated_fragment(3, "b", Some(day(2)), None),
            ],
        }];

        let rows = Aggregator.aggregate(&allocations, GroupBy::Entity);
        assert_eq!(rows[0].allocated_cost, None);
        assert!(rows[0].partial);
    }

    #[test]
    fn test_mixed_contributions_sum_defined_and_flag_partial() {
        let allocations = vec![EntityAllocation {
            entity_id: 4,
            external_id: None,
            fallback: false,
            partial: true,
            fragments: vec![
                allocated_fragment(4, "a", Some(day(1)), Some(30.0)),
                allocated_fragment(4, "b", Some(day(2)), None),
            ],
        }];

        let rows = Aggregator.aggregate(&allocations, GroupBy::EntityDay);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].allocated_cost, Some(30.0));
        assert!(!rows[0].partial);
        assert_eq!(rows[1].allocated_cost, None);
        assert!(rows[1].partial);
    }

    #[test]
    fn test_rows_sorted_by_entity_then_day() {
        let allocations = vec![
            EntityAllocation {
                entity_id: 9,
                external_id: None,
                fallback: false,
                partial: false,
                fragments: vec![allocated_fragment(9, "a", Some(day(2)), Some(1.0))],
            },
            EntityAllocation {
                entity_id: 2,
                external_id: None,
                fallback: false,
                partial: false,
                fragments: vec![
                    allocated_fragment(2, "b", Some(day(3)), Some(1.0)),
                    allocated_fragment(2, "c", Some(day(1)), Some(1.0)),
                ],
            },
        ];

        let rows = Aggregator.aggregate(&allocations, GroupBy::EntityDay);
        let keys: Vec<(u64, Option<NaiveDate>)> =
            rows.iter().map(|r| (r.entity_id, r.day)).collect();
        assert_eq!(
            keys,
            vec![(2, Some(day(1))), (2, Some(day(3))), (9, Some(day(2)))]
        );
    }

    #[test]
    fn test_product_fragments_group_under_no_day() {
        let allocations = vec![EntityAllocation {
            entity_id: 5,
            external_id: None,
            fallback: false,
            partial: false,
            fragments: vec![
                allocated_fragment(5, "a", None, Some(30.0)),
                allocated_fragment(5, "b", None, Some(60.0)),
            ],
        }];

        let rows = Aggregator.aggregate(&allocations, GroupBy::EntityDay);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].day, None);
        assert_eq!(rows[0].allocated_cost, Some(90.0));
    }
}
