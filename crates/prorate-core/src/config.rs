//! Engine configuration for allocation runs
//!
//! Holds the conservation tolerances, the product key composition rule, the
//! optional ingestion scope filter, and the parallelism settings. A config is
//! validated once at engine construction so stage code never re-checks it.

use crate::error::{ProrateError, ProrateResult};
use crate::parallel::ParallelConfig;
use chrono::NaiveDate;
use prorate_types::FragmentKey;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the ingestion scope filter.
pub const SCOPE_FILTER_ENV: &str = "PRORATE_SCOPE_FILTER";

/// Composition rule for product fragment keys.
///
/// Keys follow `{namespace}#{product}#{stage}#{YYYY-MM-DD}`. The format is
/// deterministic and stable across runs so external caches keyed on it stay
/// reusable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyFormat {
    /// Leading key segments, already `#`-joined (e.g. `pvstats#var#sophis`)
    pub namespace: String,
    /// Segment between the product and the date (e.g. `pricing`)
    pub stage: String,
}

impl Default for KeyFormat {
    fn default() -> Self {
        Self { namespace: "pvstats#var#sophis".to_string(), stage: "pricing".to_string() }
    }
}

impl KeyFormat {
    /// Compose the lookup key for one product on one pricing date.
    pub fn compose(&self, product: &str, pricing_date: NaiveDate) -> FragmentKey {
        FragmentKey::new(format!(
            "{}#{}#{}#{}",
            self.namespace,
            product,
            self.stage,
            pricing_date.format("%Y-%m-%d")
        ))
    }
}

/// Configuration for the allocation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Relative conservation tolerance, scaled by |total_cost|
    pub relative_tolerance: f64,

    /// Absolute conservation tolerance floor
    pub absolute_tolerance: f64,

    /// Composition rule for product fragment keys
    pub key_format: KeyFormat,

    /// Optional case-insensitive substring filter applied to interval entity
    /// scopes at ingestion. Entities whose scope does not match are dropped
    /// and counted, not errored.
    pub scope_filter: Option<String>,

    /// Parallel processing settings
    pub parallel: ParallelConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-9,
            absolute_tolerance: 1e-6,
            key_format: KeyFormat::default(),
            scope_filter: None,
            parallel: ParallelConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults plus environment overrides.
    ///
    /// `PRORATE_SCOPE_FILTER` sets the ingestion scope filter; an empty or
    /// whitespace value clears it.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var(SCOPE_FILTER_ENV) {
            let trimmed = filter.trim();
            config.scope_filter =
                if trimmed.is_empty() { None } else { Some(trimmed.to_string()) };
        }
        config
    }

    /// Validate the configuration, rejecting values the pipeline cannot run
    /// with.
    pub fn validate(&self) -> ProrateResult<()> {
        if !(self.relative_tolerance > 0.0) {
            return Err(ProrateError::configuration(
                "relative_tolerance",
                "> 0.0",
                &self.relative_tolerance.to_string(),
                "relative conservation tolerance must be positive",
            ));
        }
        if !(self.absolute_tolerance > 0.0) {
            return Err(ProrateError::configuration(
                "absolute_tolerance",
                "> 0.0",
                &self.absolute_tolerance.to_string(),
                "absolute conservation tolerance must be positive",
            ));
        }
        if self.key_format.namespace.trim().is_empty() {
            return Err(ProrateError::configuration(
                "key_format.namespace",
                "non-empty string",
                "\"\"",
                "key namespace must not be empty",
            ));
        }
        if self.key_format.stage.trim().is_empty() {
            return Err(ProrateError::configuration(
                "key_format.stage",
                "non-empty string",
                "\"\"",
                "key stage must not be empty",
            ));
        }
        if self.parallel.max_workers == 0 {
            return Err(ProrateError::configuration(
                "parallel.max_workers",
                ">= 1",
                "0",
                "at least one worker is required",
            ));
        }
        Ok(())
    }

    /// Conservation tolerance for a given entity total.
    pub fn tolerance_for(&self, total_cost: f64) -> f64 {
        (self.relative_tolerance * total_cost.abs()).max(self.absolute_tolerance)
    }

    /// Whether an interval entity's scope passes the ingestion filter.
    pub fn matches_scope(&self, scope: &str) -> bool {
        match &self.scope_filter {
            Some(filter) => scope.to_lowercase().contains(&filter.to_lowercase()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scope_filter, None);
    }

    #[test]
    fn test_key_format_compose() {
        let format = KeyFormat::default();
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let key = format.compose("EQ_SWAP", day);
        assert_eq!(key.as_str(), "pvstats#var#sophis#EQ_SWAP#pricing#2024-02-01");
    }

    #[test]
    fn test_key_format_custom_segments() {
        let format = KeyFormat { namespace: "metrics#calc".to_string(), stage: "eod".to_string() };
        let day = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert_eq!(format.compose("FX", day).as_str(), "metrics#calc#FX#eod#2023-12-31");
    }

    #[test]
    fn test_tolerance_scales_with_total() {
        let config = EngineConfig::default();
        assert_eq!(config.tolerance_for(10.0), 1e-6);
        assert_eq!(config.tolerance_for(1e9), 1.0);
        assert_eq!(config.tolerance_for(-1e9), 1.0);
    }

    #[test]
    fn test_scope_filter_matching() {
        let mut config = EngineConfig::default();
        assert!(config.matches_scope("anything"));

        config.scope_filter = Some("firebird".to_string());
        assert!(config.matches_scope("prod-Firebird-eu"));
        assert!(config.matches_scope("FIREBIRD"));
        assert!(!config.matches_scope("phoenix-cluster"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = EngineConfig { relative_tolerance: 0.0, ..EngineConfig::default() };
        assert!(config.validate().is_err());

        let config = EngineConfig { absolute_tolerance: -1.0, ..EngineConfig::default() };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            key_format: KeyFormat { namespace: "  ".to_string(), stage: "pricing".to_string() },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            parallel: ParallelConfig { max_workers: 0, ..ParallelConfig::default() },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_scope_filter_from_environment() {
        // SAFETY: mutating the process environment is safe here because the
        // test is serialized and no other thread reads these variables.
        unsafe {
            std::env::set_var(SCOPE_FILTER_ENV, "firebird");
        }
        let config = EngineConfig::from_env();
        assert_eq!(config.scope_filter.as_deref(), Some("firebird"));

        // SAFETY: restoring environment to original state (see above).
        unsafe {
            std::env::set_var(SCOPE_FILTER_ENV, "   ");
        }
        let config = EngineConfig::from_env();
        assert_eq!(config.scope_filter, None);

        // SAFETY: restoring environment to original state (see above).
        unsafe {
            std::env::remove_var(SCOPE_FILTER_ENV);
        }
    }
}
