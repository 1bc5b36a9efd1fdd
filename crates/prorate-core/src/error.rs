//! Structured error handling for the prorate engine
//!
//! This module provides structured error types for all allocation pipeline
//! stages, distinguishing entity-scoped defects (which quarantine one entity
//! and let the run continue) from run-scoped failures (which abort the run).

use prorate_types::EntityId;
use std::fmt;
use thiserror::Error;

/// Comprehensive error type for prorate engine operations
#[derive(Error, Debug, Clone)]
pub enum ProrateError {
    /// Interval split defects (end before start)
    #[error("Invalid interval: {message}")]
    InvalidInterval {
        message: String,
        entity_id: Option<EntityId>,
        start: Option<String>,
        end: Option<String>,
    },

    /// Product split defects (nothing to split across)
    #[error("Empty product list: {message}")]
    EmptyProductList { message: String, entity_id: Option<EntityId> },

    /// Ingestion shape defects (missing or contradictory fields)
    #[error("Invalid record: {message}")]
    InvalidRecord { message: String, entity_id: Option<EntityId>, field: Option<String> },

    /// Weight domain defects (negative or non-finite values)
    #[error("Invalid weight: {message}")]
    InvalidWeight {
        message: String,
        entity_id: Option<EntityId>,
        key: Option<String>,
        value: Option<f64>,
    },

    /// External lookup transport or service failures
    #[error("Weight lookup error: {message}")]
    WeightLookup {
        message: String,
        service: Option<String>,
        key_count: Option<usize>,
        source_details: Option<String>,
    },

    /// Conservation invariant violations
    #[error("Conservation error: {message}")]
    Conservation {
        message: String,
        entity_id: Option<EntityId>,
        expected: Option<f64>,
        actual: Option<f64>,
        tolerance: Option<f64>,
    },

    /// Engine configuration and wiring errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        setting: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Serialization and deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String, data_type: Option<String>, operation: Option<String> },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String, component: Option<String>, source_details: Option<String> },
}

impl ProrateError {
    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            ProrateError::InvalidInterval { .. } => "invalid_interval",
            ProrateError::EmptyProductList { .. } => "empty_product_list",
            ProrateError::InvalidRecord { .. } => "invalid_record",
            ProrateError::InvalidWeight { .. } => "invalid_weight",
            ProrateError::WeightLookup { .. } => "weight_lookup",
            ProrateError::Conservation { .. } => "conservation",
            ProrateError::Configuration { .. } => "configuration",
            ProrateError::Serialization { .. } => "serialization",
            ProrateError::Internal { .. } => "internal",
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ProrateError::InvalidInterval { .. } => ErrorSeverity::Medium,
            ProrateError::EmptyProductList { .. } => ErrorSeverity::Medium,
            ProrateError::InvalidRecord { .. } => ErrorSeverity::Medium,
            ProrateError::InvalidWeight { .. } => ErrorSeverity::Medium,
            ProrateError::WeightLookup { .. } => ErrorSeverity::High,
            ProrateError::Conservation { .. } => ErrorSeverity::Critical,
            ProrateError::Configuration { .. } => ErrorSeverity::Critical,
            ProrateError::Serialization { .. } => ErrorSeverity::Low,
            ProrateError::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether the run can continue past this error by quarantining the
    /// affected entity. Non-recoverable errors abort the whole run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProrateError::InvalidInterval { .. } => true,
            ProrateError::EmptyProductList { .. } => true,
            ProrateError::InvalidRecord { .. } => true,
            ProrateError::InvalidWeight { .. } => true,
            ProrateError::WeightLookup { .. } => false, // Poisons every pending entity
            ProrateError::Conservation { .. } => false, // Arithmetic defect, results untrustworthy
            ProrateError::Configuration { .. } => false, // Config errors need fixing
            ProrateError::Serialization { .. } => true,
            ProrateError::Internal { .. } => false, // Unknown internal state
        }
    }
}

/// Error severity levels for logging and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for prorate engine operations
pub type ProrateResult<T> = Result<T, ProrateError>;

/// Convenience constructors for common error scenarios
impl ProrateError {
    /// Create an invalid interval error for an entity
    pub fn invalid_interval(
        entity_id: EntityId,
        start: &str,
        end: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidInterval {
            message: message.into(),
            entity_id: Some(entity_id),
            start: Some(start.to_string()),
            end: Some(end.to_string()),
        }
    }

    /// Create an empty product list error for an entity
    pub fn empty_product_list(entity_id: EntityId, message: impl Into<String>) -> Self {
        Self::EmptyProductList { message: message.into(), entity_id: Some(entity_id) }
    }

    /// Create an invalid record error for an entity
    pub fn invalid_record(entity_id: EntityId, field: &str, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
            entity_id: Some(entity_id),
            field: Some(field.to_string()),
        }
    }

    /// Create an invalid weight error attributed to an entity
    pub fn invalid_weight(
        entity_id: EntityId,
        key: &str,
        value: f64,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidWeight {
            message: message.into(),
            entity_id: Some(entity_id),
            key: Some(key.to_string()),
            value: Some(value),
        }
    }

    /// Create a weight lookup error
    pub fn weight_lookup(service: &str, key_count: usize, message: impl Into<String>) -> Self {
        Self::WeightLookup {
            message: message.into(),
            service: Some(service.to_string()),
            key_count: Some(key_count),
            source_details: None,
        }
    }

    /// Create a weight lookup error from an external source failure
    pub fn weight_lookup_source(service: &str, key_count: usize, err: &anyhow::Error) -> Self {
        Self::WeightLookup {
            message: format!("{service} request failed: {err}"),
            service: Some(service.to_string()),
            key_count: Some(key_count),
            source_details: Some(format!("{err:#}")),
        }
    }

    /// Create a conservation error for an entity
    pub fn conservation(
        entity_id: EntityId,
        expected: f64,
        actual: f64,
        tolerance: f64,
        message: impl Into<String>,
    ) -> Self {
        Self::Conservation {
            message: message.into(),
            entity_id: Some(entity_id),
            expected: Some(expected),
            actual: Some(actual),
            tolerance: Some(tolerance),
        }
    }

    /// Create a configuration error
    pub fn configuration(
        setting: &str,
        expected: &str,
        actual: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            setting: Some(setting.to_string()),
            expected: Some(expected.to_string()),
            actual: Some(actual.to_string()),
        }
    }

    /// Create a serialization error
    pub fn serialization(data_type: &str, operation: &str, message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            data_type: Some(data_type.to_string()),
            operation: Some(operation.to_string()),
        }
    }

    /// Create an internal error with component context
    pub fn internal_component(component: &str, message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            component: Some(component.to_string()),
            source_details: None,
        }
    }

    /// Create a generic internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), component: None, source_details: None }
    }
}

impl From<serde_json::Error> for ProrateError {
    fn from(err: serde_json::Error) -> Self {
        ProrateError::serialization(
            "json",
            if err.is_syntax() {
                "parse"
            } else if err.is_data() {
                "validate"
            } else {
                "unknown"
            },
            format!("JSON error: {err}"),
        )
    }
}
