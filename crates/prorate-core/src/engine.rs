//! Allocation engine
//!
//! `ProrateEngine` owns the pipeline components and the external source
//! seams, and drives one batch through the run phases: ingest → fragment →
//! resolve weights → allocate → aggregate → emit. The engine itself is
//! immutable across runs; all per-run state lives in the report being built.
//!
//! Entity-scoped defects quarantine the entity and the run continues;
//! run-scoped failures (lookup transport errors, conservation violations)
//! abort the whole run with no partial result.

use crate::aggregation::{Aggregator, EntityAllocation};
use crate::allocator::ProportionalAllocator;
use crate::config::EngineConfig;
use crate::error::{ProrateError, ProrateResult};
use crate::fragmenter::{IntervalFragmenter, RequestFragmenter};
use crate::parallel;
use crate::resolver::{DailyCostSource, DailyCostTable, ResolvedWeights, WeightResolver, WeightSource};
use crate::types::{
    CostSource, Entity, EntityError, EntityRecord, Fragment, RunContext, RunOptions, RunPhase,
    RunReport, RunStats, SplitBasis,
};
use prorate_types::{EntityId, Weight};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Main engine for proportional cost allocation runs
pub struct ProrateEngine {
    config: EngineConfig,
    interval_fragmenter: IntervalFragmenter,
    request_fragmenter: RequestFragmenter,
    resolver: WeightResolver,
    allocator: ProportionalAllocator,
    aggregator: Aggregator,
    weight_source: Option<Arc<dyn WeightSource>>,
    daily_cost_source: Option<Arc<dyn DailyCostSource>>,
}

impl std::fmt::Debug for ProrateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProrateEngine")
            .field("config", &self.config)
            .field("has_weight_source", &self.weight_source.is_some())
            .field("has_daily_cost_source", &self.daily_cost_source.is_some())
            .finish()
    }
}

impl ProrateEngine {
    /// Create a new engine with default configuration
    #[instrument]
    pub fn new() -> ProrateResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new engine with the given configuration
    #[instrument(skip(config))]
    pub fn with_config(config: EngineConfig) -> ProrateResult<Self> {
        config.validate()?;
        info!("Creating new prorate engine");

        Ok(Self {
            config,
            interval_fragmenter: IntervalFragmenter,
            request_fragmenter: RequestFragmenter,
            resolver: WeightResolver,
            allocator: ProportionalAllocator,
            aggregator: Aggregator,
            weight_source: None,
            daily_cost_source: None,
        })
    }

    /// Attach the external weight source used for product entities
    pub fn with_weight_source(mut self, source: Arc<dyn WeightSource>) -> Self {
        self.weight_source = Some(source);
        self
    }

    /// Attach the external daily spend source used for daily-spend runs
    pub fn with_daily_cost_source(mut self, source: Arc<dyn DailyCostSource>) -> Self {
        self.daily_cost_source = Some(source);
        self
    }

    /// Current engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one allocation batch to completion.
    ///
    /// Entity ids are assigned from input positions, so reruns over the same
    /// table produce identical reports row for row.
    #[instrument(skip(self, records))]
    pub fn run(&self, records: &[EntityRecord], options: RunOptions) -> ProrateResult<RunReport> {
        let started = Instant::now();
        let mut context = RunContext::new();
        let mut stats = RunStats::default();
        let mut entity_errors: Vec<EntityError> = Vec::new();

        info!(
            run_id = %context.run_id,
            entity_count = records.len(),
            cost_source = ?options.cost_source,
            group_by = ?options.group_by,
            "Starting allocation run"
        );

        // Ingest: validate shapes, apply the scope filter, assign ids
        let entities = self.ingest(records, &mut stats, &mut entity_errors);
        context.complete_phase(RunPhase::Ingested);

        // Fragment: split every entity, in parallel for large batches
        let results = parallel::map_ordered(&entities, &self.config.parallel, |entity| {
            self.fragment_entity(entity, options)
        })?;

        let mut fragments: Vec<Fragment> = Vec::new();
        let mut survivors: Vec<(Entity, Range<usize>)> = Vec::with_capacity(entities.len());
        for (entity, result) in entities.into_iter().zip(results) {
            match result {
                Ok(entity_fragments) => {
                    let start = fragments.len();
                    fragments.extend(entity_fragments);
                    survivors.push((entity, start..fragments.len()));
                }
                Err(err) if err.is_recoverable() => {
                    Self::quarantine(&entity, err, &mut stats, &mut entity_errors);
                }
                Err(err) => return Err(err),
            }
        }
        stats.fragments_created = fragments.len();
        context.complete_phase(RunPhase::Fragmented);

        // Resolve: one deduplicated batch call per external source
        let weights = if fragments.iter().any(|f| f.weight.is_pending()) {
            let source = self.weight_source.as_deref().ok_or_else(|| {
                ProrateError::configuration(
                    "weight_source",
                    "a configured weight source",
                    "none",
                    "product entities require a weight source",
                )
            })?;
            self.resolver.resolve(&fragments, source)?
        } else {
            ResolvedWeights::default()
        };

        let day_costs = if options.cost_source == CostSource::DailySpend {
            let source = self.daily_cost_source.as_deref().ok_or_else(|| {
                ProrateError::configuration(
                    "daily_cost_source",
                    "a configured daily cost source",
                    "none",
                    "daily-spend runs require a daily cost source",
                )
            })?;
            self.resolver.resolve_daily_costs(&fragments, source)?
        } else {
            DailyCostTable::default()
        };

        stats.unique_keys = weights.len();
        stats.absent_weights = weights.absent_count();
        context.complete_phase(RunPhase::WeightsResolved);

        // Allocate: pure per-entity pass over the read-only resolved maps
        let outcomes = parallel::map_ordered(&survivors, &self.config.parallel, |(entity, range)| {
            self.allocate_entity(entity, &fragments[range.clone()], options, &weights, &day_costs)
        })?;

        let mut allocations: Vec<EntityAllocation> = Vec::with_capacity(survivors.len());
        for ((entity, _), outcome) in survivors.into_iter().zip(outcomes) {
            match outcome {
                Ok(allocation) => allocations.push(allocation),
                Err(err) if err.is_recoverable() => {
                    Self::quarantine(&entity, err, &mut stats, &mut entity_errors);
                }
                Err(err) => return Err(err),
            }
        }
        context.complete_phase(RunPhase::Allocated);

        // Aggregate into final rows
        let rows = self.aggregator.aggregate(&allocations, options.group_by);
        context.complete_phase(RunPhase::Aggregated);

        stats.entities_allocated = allocations.len();
        stats.fallback_entities = allocations.iter().filter(|a| a.fallback).count();
        stats.partial_entities = allocations.iter().filter(|a| a.partial).count();
        stats.allocated_total = rows.iter().filter_map(|row| row.allocated_cost).sum();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        let report_fragments: Vec<Fragment> =
            allocations.into_iter().flat_map(|a| a.fragments).collect();

        context.finished_at = Some(chrono::Utc::now());
        context.complete_phase(RunPhase::Emitted);

        info!(
            run_id = %context.run_id,
            rows = rows.len(),
            entities_allocated = stats.entities_allocated,
            entities_failed = stats.entities_failed,
            allocated_total = stats.allocated_total,
            elapsed_ms = stats.elapsed_ms,
            "Allocation run complete"
        );

        Ok(RunReport {
            context,
            options,
            rows,
            fragments: report_fragments,
            entity_errors,
            stats,
        })
    }

    /// Validate raw records into entities, assigning ids from input
    /// positions. Filtered and malformed records never abort the run.
    fn ingest(
        &self,
        records: &[EntityRecord],
        stats: &mut RunStats,
        entity_errors: &mut Vec<EntityError>,
    ) -> Vec<Entity> {
        stats.entities_ingested = records.len();

        let mut entities = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let id = index as EntityId;

            // The scope filter drops non-matching interval records outright,
            // the way the source table was filtered by cluster name
            if self.config.scope_filter.is_some()
                && (record.start_time.is_some() || record.end_time.is_some())
                && !self.config.matches_scope(record.scope.as_deref().unwrap_or(""))
            {
                stats.entities_filtered += 1;
                continue;
            }

            match record.to_entity(id) {
                Ok(entity) => entities.push(entity),
                Err(err) => {
                    warn!(
                        entity_id = id,
                        category = err.category(),
                        severity = %err.severity(),
                        error = %err,
                        "Quarantining malformed record"
                    );
                    stats.entities_failed += 1;
                    stats.unallocated_total += record.total_cost;
                    entity_errors.push(EntityError::new(
                        id,
                        record.external_id.clone(),
                        record.total_cost,
                        &err,
                    ));
                }
            }
        }
        entities
    }

    fn fragment_entity(&self, entity: &Entity, options: RunOptions) -> ProrateResult<Vec<Fragment>> {
        match &entity.basis {
            SplitBasis::Interval { .. } => self.interval_fragmenter.fragment(entity),
            SplitBasis::Products { .. } => {
                if options.cost_source == CostSource::DailySpend {
                    return Err(ProrateError::invalid_record(
                        entity.id,
                        "basis",
                        "product entity in a daily-spend run",
                    ));
                }
                self.request_fragmenter.fragment(entity, &self.config.key_format)
            }
        }
    }

    /// Allocate one entity: distribute its resolved weights, compute ratios,
    /// and draw shares from the selected cost source.
    fn allocate_entity(
        &self,
        entity: &Entity,
        fragments: &[Fragment],
        options: RunOptions,
        weights: &ResolvedWeights,
        day_costs: &DailyCostTable,
    ) -> ProrateResult<EntityAllocation> {
        let mut fragments = fragments.to_vec();

        let multiplier = entity.scenario_multiplier();
        for fragment in &mut fragments {
            if !fragment.weight.is_pending() {
                continue;
            }
            fragment.weight = match weights.get(&fragment.key) {
                Some(Some(value)) => Weight::Resolved(value * multiplier),
                Some(None) => Weight::Absent,
                None => {
                    return Err(ProrateError::internal_component(
                        "engine",
                        format!("key {} missing from the resolved weight set", fragment.key),
                    ));
                }
            };
        }

        let split = self.allocator.ratios(entity, &fragments)?;
        for (fragment, ratio) in fragments.iter_mut().zip(&split.ratios) {
            fragment.ratio = *ratio;
        }

        let mut absent_cost = false;
        match options.cost_source {
            CostSource::EntityTotal => {
                let tolerance = self.config.tolerance_for(entity.total_cost);
                let shares = self.allocator.split_total(entity, &split, tolerance)?;
                for (fragment, share) in fragments.iter_mut().zip(shares) {
                    fragment.allocated_cost = share;
                }
            }
            CostSource::DailySpend => {
                for fragment in &mut fragments {
                    let amount = match (fragment.day, fragment.scope.as_deref()) {
                        (Some(day), Some(scope)) => day_costs.amount(day, scope),
                        _ => None,
                    };
                    fragment.allocated_cost = match (fragment.ratio, amount) {
                        (Some(ratio), Some(amount)) => Some(ratio * amount),
                        _ => None,
                    };
                    if fragment.allocated_cost.is_none() {
                        absent_cost = true;
                        warn!(
                            entity_id = entity.id,
                            day = ?fragment.day,
                            scope = ?fragment.scope,
                            "No daily cost for fragment, contribution stays absent"
                        );
                    }
                }
            }
        }

        Ok(EntityAllocation {
            entity_id: entity.id,
            external_id: entity.external_id.clone(),
            fallback: split.fallback,
            partial: split.partial || absent_cost,
            fragments,
        })
    }

    fn quarantine(
        entity: &Entity,
        err: ProrateError,
        stats: &mut RunStats,
        entity_errors: &mut Vec<EntityError>,
    ) {
        warn!(
            entity_id = entity.id,
            category = err.category(),
            severity = %err.severity(),
            error = %err,
            "Quarantining entity"
        );
        stats.entities_failed += 1;
        stats.unallocated_total += entity.total_cost;
        entity_errors.push(EntityError::new(
            entity.id,
            entity.external_id.clone(),
            entity.total_cost,
            &err,
        ));
    }
}
