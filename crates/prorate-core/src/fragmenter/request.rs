//! Request Fragmenter
//!
//! Splits a product entity into one fragment per product, composing each
//! fragment's lookup key from the configured [`KeyFormat`] and the entity's
//! pricing date. Key composition is deterministic and stable across runs so
//! external caches keyed on it stay valid.

use crate::config::KeyFormat;
use crate::error::{ProrateError, ProrateResult};
use crate::types::{Entity, Fragment, SplitBasis};
use std::collections::HashSet;

/// Splits product entities into keyed request fragments.
#[derive(Debug, Default)]
pub struct RequestFragmenter;

impl RequestFragmenter {
    /// Fragment one product entity, one fragment per distinct product.
    ///
    /// Duplicate products collapse to a single fragment (first occurrence
    /// wins, order preserved). Fails with `EmptyProductList` when the entity
    /// has no products; silently producing zero fragments would drop the
    /// entity's cost.
    pub fn fragment(&self, entity: &Entity, key_format: &KeyFormat) -> ProrateResult<Vec<Fragment>> {
        let (products, pricing_date) = match &entity.basis {
            SplitBasis::Products { products, pricing_date, .. } => (products, *pricing_date),
            SplitBasis::Interval { .. } => {
                return Err(ProrateError::internal_component(
                    "request_fragmenter",
                    format!("entity {} has an interval basis", entity.id),
                ));
            }
        };

        if products.is_empty() {
            return Err(ProrateError::empty_product_list(
                entity.id,
                "entity has no products to split across",
            ));
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(products.len());
        let mut fragments = Vec::with_capacity(products.len());
        for product in products {
            if !seen.insert(product.as_str()) {
                continue;
            }
            let key = key_format.compose(product, pricing_date);
            fragments.push(Fragment::product(entity.id, product.clone(), key));
        }

        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use prorate_types::Weight;

    fn product_entity(id: u64, products: Vec<&str>) -> Entity {
        Entity {
            id,
            external_id: None,
            total_cost: 90.0,
            basis: SplitBasis::Products {
                products: products.into_iter().map(String::from).collect(),
                pricing_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                scenarios: None,
            },
        }
    }

    #[test]
    fn test_one_fragment_per_product() {
        let entity = product_entity(2, vec!["A", "B", "C"]);
        let fragments = RequestFragmenter.fragment(&entity, &KeyFormat::default()).unwrap();

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].key.as_str(), "pvstats#var#sophis#A#pricing#2024-02-01");
        assert_eq!(fragments[1].key.as_str(), "pvstats#var#sophis#B#pricing#2024-02-01");
        assert_eq!(fragments[2].key.as_str(), "pvstats#var#sophis#C#pricing#2024-02-01");
        assert!(fragments.iter().all(|f| f.weight == Weight::Pending));
        assert!(fragments.iter().all(|f| f.day.is_none()));
    }

    #[test]
    fn test_duplicate_products_collapse_keeping_order() {
        let entity = product_entity(3, vec!["A", "B", "A", "C", "B"]);
        let fragments = RequestFragmenter.fragment(&entity, &KeyFormat::default()).unwrap();

        let products: Vec<&str> =
            fragments.iter().map(|f| f.product.as_deref().unwrap()).collect();
        assert_eq!(products, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_empty_product_list_is_explicit_error() {
        let entity = product_entity(4, vec![]);
        let err = RequestFragmenter.fragment(&entity, &KeyFormat::default()).unwrap_err();
        assert_eq!(err.category(), "empty_product_list");
    }

    #[test]
    fn test_key_composition_is_stable() {
        let entity = product_entity(5, vec!["FX_FWD"]);
        let format = KeyFormat::default();
        let first = RequestFragmenter.fragment(&entity, &format).unwrap();
        let second = RequestFragmenter.fragment(&entity, &format).unwrap();
        assert_eq!(first[0].key, second[0].key);
    }

    #[test]
    fn test_interval_entity_is_internal_error() {
        let entity = Entity {
            id: 6,
            external_id: None,
            total_cost: 1.0,
            basis: SplitBasis::Interval {
                start: chrono::Utc::now(),
                end: chrono::Utc::now(),
                scope: None,
            },
        };
        let err = RequestFragmenter.fragment(&entity, &KeyFormat::default()).unwrap_err();
        assert_eq!(err.category(), "internal");
    }
}
