//! Weight Resolver
//!
//! Collects the pending fragment keys of a whole batch, deduplicates and
//! sorts them, and issues a single batch lookup to the external source. The
//! result is an immutable map handed out read-only to every allocator worker.
//! Daily spend lookups follow the same discipline, one call per distinct
//! scope over the sorted set of days the batch touches.

use crate::error::{ProrateError, ProrateResult};
use crate::types::Fragment;
use chrono::NaiveDate;
use prorate_types::{DailyCost, FragmentKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, instrument, warn};

/// External source of fragment weights.
/// Sources are stateless from the engine's point of view and thread-safe.
pub trait WeightSource: Send + Sync {
    /// Resolve a batch of keys in one call. A key missing from the returned
    /// map, or mapped to `None`, is absent: the source holds no value for it.
    fn resolve(&self, keys: &[FragmentKey]) -> anyhow::Result<HashMap<FragmentKey, Option<f64>>>;
}

/// External source of per-day infrastructure spend.
pub trait DailyCostSource: Send + Sync {
    /// Fetch spend rows for the given days and scope. Pairs with no spend
    /// recorded simply do not appear in the result.
    fn daily_costs(&self, days: &[NaiveDate], scope: &str) -> anyhow::Result<Vec<DailyCost>>;
}

/// Immutable key → weight map built once per run.
///
/// `None` means the source was asked and holds no value for the key; weights
/// for keys that were never pending are not present at all.
#[derive(Debug, Clone, Default)]
pub struct ResolvedWeights {
    weights: HashMap<FragmentKey, Option<f64>>,
}

impl ResolvedWeights {
    /// Look up a resolved key. Outer `None`: the key was never resolved;
    /// `Some(None)`: the source answered absent.
    pub fn get(&self, key: &FragmentKey) -> Option<Option<f64>> {
        self.weights.get(key).copied()
    }

    /// Number of distinct keys resolved this run
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Number of keys the source answered absent for
    pub fn absent_count(&self) -> usize {
        self.weights.values().filter(|v| v.is_none()).count()
    }
}

/// Per-run table of daily spend, keyed by (day, scope).
#[derive(Debug, Clone, Default)]
pub struct DailyCostTable {
    by_scope: HashMap<String, HashMap<NaiveDate, Option<f64>>>,
}

impl DailyCostTable {
    /// Spend for a (day, scope) pair. `None` when the source has no row for
    /// the pair or the row carries no amount; absent is never zero.
    pub fn amount(&self, day: NaiveDate, scope: &str) -> Option<f64> {
        self.by_scope.get(scope).and_then(|days| days.get(&day)).copied().flatten()
    }

    /// Total number of rows across all scopes
    pub fn len(&self) -> usize {
        self.by_scope.values().map(|days| days.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_scope.is_empty()
    }
}

/// Batches and deduplicates external lookups for one run.
#[derive(Debug, Default)]
pub struct WeightResolver;

impl WeightResolver {
    /// Resolve every pending fragment key with one batch call.
    ///
    /// Keys are deduplicated across the whole batch and sorted, so the
    /// outbound request is byte-stable across runs and the source is never
    /// asked for the same key twice. Transport failures abort the run.
    #[instrument(skip(self, fragments, source))]
    pub fn resolve(
        &self,
        fragments: &[Fragment],
        source: &dyn WeightSource,
    ) -> ProrateResult<ResolvedWeights> {
        let keys: BTreeSet<FragmentKey> = fragments
            .iter()
            .filter(|f| f.weight.is_pending())
            .map(|f| f.key.clone())
            .collect();

        if keys.is_empty() {
            info!("No pending fragment keys, skipping weight lookup");
            return Ok(ResolvedWeights::default());
        }

        let ordered: Vec<FragmentKey> = keys.into_iter().collect();
        info!(unique_keys = ordered.len(), "Resolving fragment weights in one batch call");

        let response = source
            .resolve(&ordered)
            .map_err(|err| ProrateError::weight_lookup_source("weight_source", ordered.len(), &err))?;

        let mut weights = HashMap::with_capacity(ordered.len());
        let mut absent = 0usize;
        for key in ordered {
            let value = response.get(&key).copied().flatten();
            if value.is_none() {
                absent += 1;
                warn!(key = %key, "Weight source holds no value for key");
            }
            weights.insert(key, value);
        }

        info!(
            resolved = weights.len() - absent,
            absent_keys = absent,
            "Weight resolution complete"
        );

        Ok(ResolvedWeights { weights })
    }

    /// Fetch daily spend for every (day, scope) pair the batch touches, one
    /// call per distinct scope over its sorted day set.
    #[instrument(skip(self, fragments, source))]
    pub fn resolve_daily_costs(
        &self,
        fragments: &[Fragment],
        source: &dyn DailyCostSource,
    ) -> ProrateResult<DailyCostTable> {
        let mut days_by_scope: BTreeMap<&str, BTreeSet<NaiveDate>> = BTreeMap::new();
        for fragment in fragments {
            if let (Some(day), Some(scope)) = (fragment.day, fragment.scope.as_deref()) {
                days_by_scope.entry(scope).or_default().insert(day);
            }
        }

        if days_by_scope.is_empty() {
            info!("No (day, scope) pairs to price, skipping daily cost lookup");
            return Ok(DailyCostTable::default());
        }

        let mut by_scope: HashMap<String, HashMap<NaiveDate, Option<f64>>> = HashMap::new();
        for (scope, days) in days_by_scope {
            let days: Vec<NaiveDate> = days.into_iter().collect();
            info!(scope, day_count = days.len(), "Fetching daily costs for scope");

            let rows = source.daily_costs(&days, scope).map_err(|err| {
                ProrateError::weight_lookup_source("daily_cost_source", days.len(), &err)
            })?;

            let scoped = by_scope.entry(scope.to_string()).or_default();
            for row in rows {
                scoped.insert(row.day, row.amount);
            }
        }

        let table = DailyCostTable { by_scope };
        info!(rows = table.len(), "Daily cost resolution complete");
        Ok(table)
    }
}
