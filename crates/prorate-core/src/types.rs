use crate::error::{ProrateError, ProrateResult};
use chrono::{DateTime, NaiveDate, Utc};
use prorate_types::{EntityId, FragmentKey, Weight};
use serde::{Deserialize, Serialize};

/// Raw input row for one billable entity, mirroring the loose table shape
/// upstream systems produce. All basis fields are optional; validation happens
/// at ingestion when the row is converted to an [`Entity`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityRecord {
    /// Upstream identifier, carried through to output rows when present
    pub external_id: Option<String>,
    /// Total cost to redistribute across the entity's fragments
    pub total_cost: f64,
    /// Interval basis: start of the entity's wall-clock interval
    pub start_time: Option<DateTime<Utc>>,
    /// Interval basis: exclusive end of the interval
    pub end_time: Option<DateTime<Utc>>,
    /// Interval basis: cluster/environment name used for the daily-cost join
    pub scope: Option<String>,
    /// Product basis: ordered product list, one fragment per product
    pub products: Option<Vec<String>>,
    /// Product basis: pricing date composed into each fragment key
    pub pricing_date: Option<NaiveDate>,
    /// Product basis: inclusive scenario range start
    pub scenario_from: Option<i64>,
    /// Product basis: inclusive scenario range end
    pub scenario_to: Option<i64>,
}

impl EntityRecord {
    /// Convenience constructor for an interval entity, used mainly in tests
    pub fn interval(
        total_cost: f64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            total_cost,
            start_time: Some(start),
            end_time: Some(end),
            scope: Some(scope.into()),
            ..Self::default()
        }
    }

    /// Convenience constructor for a product entity, used mainly in tests
    pub fn products(total_cost: f64, products: Vec<String>, pricing_date: NaiveDate) -> Self {
        Self {
            total_cost,
            products: Some(products),
            pricing_date: Some(pricing_date),
            ..Self::default()
        }
    }

    /// Attach an upstream identifier
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Attach an inclusive scenario range
    pub fn with_scenarios(mut self, from: i64, to: i64) -> Self {
        self.scenario_from = Some(from);
        self.scenario_to = Some(to);
        self
    }

    /// Validate the record's shape and convert it into an [`Entity`] with the
    /// assigned run-local id.
    ///
    /// Exactly one split basis must be present. Timing defects surface as
    /// `InvalidInterval`, other shape defects as `InvalidRecord`. An empty
    /// product list is accepted here and rejected by the fragmenter, which
    /// owns that contract.
    pub fn to_entity(&self, id: EntityId) -> ProrateResult<Entity> {
        let has_interval = self.start_time.is_some() || self.end_time.is_some();
        let has_products = self.products.is_some()
            || self.pricing_date.is_some()
            || self.scenario_from.is_some()
            || self.scenario_to.is_some();

        if has_interval && has_products {
            return Err(ProrateError::invalid_record(
                id,
                "basis",
                "record mixes interval and product fields",
            ));
        }

        let basis = if has_interval {
            let start = self.start_time.ok_or_else(|| ProrateError::InvalidInterval {
                message: "interval record is missing its start bound".to_string(),
                entity_id: Some(id),
                start: None,
                end: self.end_time.map(|t| t.to_rfc3339()),
            })?;
            let end = self.end_time.ok_or_else(|| ProrateError::InvalidInterval {
                message: "interval record is missing its end bound".to_string(),
                entity_id: Some(id),
                start: Some(start.to_rfc3339()),
                end: None,
            })?;
            SplitBasis::Interval { start, end, scope: self.scope.clone() }
        } else if has_products {
            let products = self.products.clone().ok_or_else(|| {
                ProrateError::invalid_record(id, "products", "pricing date without a product list")
            })?;
            let pricing_date = self.pricing_date.ok_or_else(|| {
                ProrateError::invalid_record(
                    id,
                    "pricing_date",
                    "product split requires a pricing date",
                )
            })?;
            let scenarios = match (self.scenario_from, self.scenario_to) {
                (None, None) => None,
                (Some(from), Some(to)) => Some(ScenarioRange::new(id, from, to)?),
                _ => {
                    return Err(ProrateError::invalid_record(
                        id,
                        "scenario_from",
                        "scenario range requires both bounds",
                    ));
                }
            };
            SplitBasis::Products { products, pricing_date, scenarios }
        } else {
            return Err(ProrateError::invalid_record(
                id,
                "basis",
                "record carries neither interval nor product fields",
            ));
        };

        Ok(Entity {
            id,
            external_id: self.external_id.clone(),
            total_cost: self.total_cost,
            basis,
        })
    }
}

/// Inclusive scenario range attached to a product entity. Its count
/// multiplies every resolved fragment metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRange {
    pub from: i64,
    pub to: i64,
}

impl ScenarioRange {
    /// Build a validated range; an inverted range is an entity-level error.
    pub fn new(entity_id: EntityId, from: i64, to: i64) -> ProrateResult<Self> {
        if to < from {
            return Err(ProrateError::invalid_record(
                entity_id,
                "scenario_to",
                format!("inverted scenario range {from}..={to}"),
            ));
        }
        Ok(Self { from, to })
    }

    /// Number of scenarios in the range
    pub fn count(&self) -> i64 {
        self.to - self.from + 1
    }
}

/// How an entity's cost is split into fragments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitBasis {
    /// Split across the calendar days a [start, end) interval touches
    Interval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        scope: Option<String>,
    },
    /// Split across a product list priced on one date
    Products {
        products: Vec<String>,
        pricing_date: NaiveDate,
        scenarios: Option<ScenarioRange>,
    },
}

/// A validated billable entity, immutable for the lifetime of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Run-local ordinal id assigned at ingestion, in input order
    pub id: EntityId,
    pub external_id: Option<String>,
    pub total_cost: f64,
    pub basis: SplitBasis,
}

impl Entity {
    /// Scenario multiplier for resolved product metrics (1 when no range)
    pub fn scenario_multiplier(&self) -> f64 {
        match &self.basis {
            SplitBasis::Products { scenarios: Some(range), .. } => range.count() as f64,
            _ => 1.0,
        }
    }
}

/// One sub-unit of an entity produced by fragmentation.
///
/// Interval fragments carry a day, exact bounds, and an integer millisecond
/// duration that doubles as their resolved weight. Product fragments carry the
/// product name and start out with a `Pending` weight until the resolver has
/// answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub entity_id: EntityId,
    pub key: FragmentKey,
    pub day: Option<NaiveDate>,
    pub day_start: Option<DateTime<Utc>>,
    pub day_end: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub scope: Option<String>,
    pub product: Option<String>,
    pub weight: Weight,
    pub ratio: Option<f64>,
    pub allocated_cost: Option<f64>,
}

impl Fragment {
    /// Build a day fragment for an interval entity. The millisecond duration
    /// is the fragment's weight; it is exact in f64 for any realistic span.
    pub fn interval(
        entity_id: EntityId,
        day: NaiveDate,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
        scope: Option<String>,
    ) -> Self {
        let duration_ms = (day_end - day_start).num_milliseconds();
        Self {
            entity_id,
            key: FragmentKey::new(format!("{entity_id}@{day}")),
            day: Some(day),
            day_start: Some(day_start),
            day_end: Some(day_end),
            duration_ms: Some(duration_ms),
            scope,
            product: None,
            weight: Weight::Resolved(duration_ms as f64),
            ratio: None,
            allocated_cost: None,
        }
    }

    /// Build a product fragment awaiting external weight resolution
    pub fn product(entity_id: EntityId, product: impl Into<String>, key: FragmentKey) -> Self {
        Self {
            entity_id,
            key,
            day: None,
            day_start: None,
            day_end: None,
            duration_ms: None,
            scope: None,
            product: Some(product.into()),
            weight: Weight::Pending,
            ratio: None,
            allocated_cost: None,
        }
    }
}

/// Which pool of money a run distributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostSource {
    /// Split each entity's own `total_cost` across its fragments
    EntityTotal,
    /// Interval entities only: draw `ratio * daily_cost(day, scope)` from
    /// external daily spend
    DailySpend,
}

/// Output row granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupBy {
    /// One row per entity
    Entity,
    /// One row per (entity, day); product fragments group under no day
    EntityDay,
}

/// Per-run options selecting the instantiation and output shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub cost_source: CostSource,
    pub group_by: GroupBy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { cost_source: CostSource::EntityTotal, group_by: GroupBy::Entity }
    }
}

impl RunOptions {
    pub fn new(cost_source: CostSource, group_by: GroupBy) -> Self {
        Self { cost_source, group_by }
    }
}

/// Pipeline phases of a single allocation run, in order. No backward
/// transitions; a run is a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Ingested,
    Fragmented,
    WeightsResolved,
    Allocated,
    Aggregated,
    Emitted,
}

/// Identity and timing of one allocation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Unique run id (uuid v4)
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phases_completed: Vec<RunPhase>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            phases_completed: Vec::new(),
        }
    }

    /// Record a completed phase
    pub fn complete_phase(&mut self, phase: RunPhase) {
        self.phases_completed.push(phase);
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One output row per aggregation key.
///
/// `allocated_cost` is `None` when every contribution to the row was absent;
/// an absent total is never coerced to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub entity_id: EntityId,
    pub external_id: Option<String>,
    pub day: Option<NaiveDate>,
    pub allocated_cost: Option<f64>,
    /// At least one contributing fragment had an absent weight or cost
    pub partial: bool,
    /// The degenerate equal split was applied for this entity
    pub fallback: bool,
    pub fragment_count: usize,
}

/// Per-entity structural error surfaced alongside successful results.
/// Carries the entity's cost so unallocated money stays visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityError {
    pub entity_id: EntityId,
    pub external_id: Option<String>,
    pub total_cost: f64,
    pub category: String,
    pub message: String,
}

impl EntityError {
    pub fn new(
        entity_id: EntityId,
        external_id: Option<String>,
        total_cost: f64,
        error: &ProrateError,
    ) -> Self {
        Self {
            entity_id,
            external_id,
            total_cost,
            category: error.category().to_string(),
            message: error.to_string(),
        }
    }
}

/// Aggregate statistics for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub entities_ingested: usize,
    /// Interval entities dropped by the scope filter
    pub entities_filtered: usize,
    pub entities_allocated: usize,
    pub entities_failed: usize,
    pub fragments_created: usize,
    /// Distinct keys sent to the weight source
    pub unique_keys: usize,
    pub absent_weights: usize,
    pub fallback_entities: usize,
    pub partial_entities: usize,
    /// Sum of allocated cost across all output rows
    pub allocated_total: f64,
    /// Cost carried by structural-error entities, never allocated
    pub unallocated_total: f64,
    pub elapsed_ms: u64,
}

/// Complete result of one allocation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub context: RunContext,
    pub options: RunOptions,
    /// Output rows in deterministic (entity_id, day) order
    pub rows: Vec<AllocationRow>,
    /// Every fragment with its resolved weight, ratio, and allocated cost
    pub fragments: Vec<Fragment>,
    pub entity_errors: Vec<EntityError>,
    pub stats: RunStats,
}

impl RunReport {
    /// Serialize the report as pretty-printed JSON
    pub fn to_json(&self) -> ProrateResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_interval_record_to_entity() {
        let record =
            EntityRecord::interval(42.0, utc(2024, 1, 1, 8, 0), utc(2024, 1, 2, 8, 0), "prod")
                .with_external_id("job-17");
        let entity = record.to_entity(3).unwrap();
        assert_eq!(entity.id, 3);
        assert_eq!(entity.external_id.as_deref(), Some("job-17"));
        match entity.basis {
            SplitBasis::Interval { scope, .. } => assert_eq!(scope.as_deref(), Some("prod")),
            other => panic!("expected interval basis, got {other:?}"),
        }
    }

    #[test]
    fn test_product_record_to_entity() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let record = EntityRecord::products(90.0, vec!["A".into(), "B".into()], day)
            .with_scenarios(1, 5);
        let entity = record.to_entity(1).unwrap();
        assert_eq!(entity.scenario_multiplier(), 5.0);
        match entity.basis {
            SplitBasis::Products { products, pricing_date, .. } => {
                assert_eq!(products, vec!["A".to_string(), "B".to_string()]);
                assert_eq!(pricing_date, day);
            }
            other => panic!("expected product basis, got {other:?}"),
        }
    }

    #[test]
    fn test_mixed_basis_rejected() {
        let mut record =
            EntityRecord::interval(1.0, utc(2024, 1, 1, 0, 0), utc(2024, 1, 2, 0, 0), "prod");
        record.products = Some(vec!["A".into()]);
        let err = record.to_entity(1).unwrap_err();
        assert_eq!(err.category(), "invalid_record");
    }

    #[test]
    fn test_missing_basis_rejected() {
        let record = EntityRecord { total_cost: 5.0, ..EntityRecord::default() };
        let err = record.to_entity(1).unwrap_err();
        assert_eq!(err.category(), "invalid_record");
    }

    #[test]
    fn test_missing_interval_bound_is_timing_error() {
        let record = EntityRecord {
            total_cost: 5.0,
            start_time: Some(utc(2024, 1, 1, 0, 0)),
            ..EntityRecord::default()
        };
        let err = record.to_entity(1).unwrap_err();
        assert_eq!(err.category(), "invalid_interval");
    }

    #[test]
    fn test_inverted_scenario_range_rejected() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let record =
            EntityRecord::products(9.0, vec!["A".into()], day).with_scenarios(10, 2);
        let err = record.to_entity(1).unwrap_err();
        assert_eq!(err.category(), "invalid_record");
    }

    #[test]
    fn test_half_scenario_range_rejected() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let mut record = EntityRecord::products(9.0, vec!["A".into()], day);
        record.scenario_from = Some(1);
        let err = record.to_entity(1).unwrap_err();
        assert_eq!(err.category(), "invalid_record");
    }

    #[test]
    fn test_interval_fragment_weight_is_duration() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let fragment =
            Fragment::interval(7, day, utc(2024, 1, 1, 12, 0), utc(2024, 1, 2, 0, 0), None);
        assert_eq!(fragment.key.as_str(), "7@2024-01-01");
        assert_eq!(fragment.duration_ms, Some(12 * 3600 * 1000));
        assert_eq!(fragment.weight, Weight::Resolved(12.0 * 3600.0 * 1000.0));
    }

    #[test]
    fn test_record_deserializes_from_sparse_json() {
        let record: EntityRecord = serde_json::from_str(
            r#"{"total_cost": 12.5, "products": ["A"], "pricing_date": "2024-02-01"}"#,
        )
        .unwrap();
        assert_eq!(record.total_cost, 12.5);
        assert_eq!(record.external_id, None);
        assert!(record.to_entity(0).is_ok());
    }

    #[test]
    fn test_run_context_phase_tracking() {
        let mut context = RunContext::new();
        context.complete_phase(RunPhase::Ingested);
        context.complete_phase(RunPhase::Fragmented);
        assert_eq!(context.phases_completed, vec![RunPhase::Ingested, RunPhase::Fragmented]);
        assert_eq!(context.run_id.len(), 36);
    }
}
