use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Stable ordinal identifier assigned to each entity at ingestion.
///
/// Identifiers are allocated in input order and are unique within a single
/// run. An entity's upstream identifier, when present, travels separately as
/// an `external_id` string.
pub type EntityId = u64;

/// Weight attached to a fragment during the resolution stage.
///
/// The three states are deliberately distinct: a weight that was never looked
/// up (`Pending`), a weight the external source answered with a number
/// (`Resolved`), and a key the source was asked about but had no value for
/// (`Absent`). Absent is not zero: a zero weight participates in the
/// denominator with no share, while an absent weight is excluded from the
/// denominator entirely and marks the entity's allocation as partial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Weight {
    /// Not yet resolved against any external source.
    Pending,
    /// Resolved to a finite numeric value.
    Resolved(f64),
    /// The external source holds no value for this key.
    Absent,
}

impl Weight {
    /// Returns the numeric value for resolved weights, `None` otherwise.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Resolved(value) => Some(*value),
            Self::Pending | Self::Absent => None,
        }
    }

    /// True when the weight carries a resolved numeric value.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// True when the external source was consulted and had no value.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// True when no resolution has happened yet.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl From<Option<f64>> for Weight {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) => Self::Resolved(v),
            None => Self::Absent,
        }
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved(value) => write!(f, "{value}"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

// ============================================================================
// JSON conversions
// ============================================================================

impl From<&Weight> for serde_json::Value {
    fn from(weight: &Weight) -> Self {
        match weight {
            Weight::Resolved(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Weight::Pending | Weight::Absent => serde_json::Value::Null,
        }
    }
}

impl TryFrom<&serde_json::Value> for Weight {
    type Error = anyhow::Error;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(Self::Absent),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Self::Resolved)
                .ok_or_else(|| anyhow!("numeric weight out of f64 range: {n}")),
            other => Err(anyhow!("unsupported JSON type for weight: {other:?}")),
        }
    }
}

/// Composed lookup key identifying one fragment's external weight.
///
/// Keys are plain strings so that any composition scheme (interval day keys,
/// product pricing keys) shares one map type downstream. Equal keys must
/// receive equal weights, which is what makes pre-resolution deduplication
/// sound.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentKey(String);

impl FragmentKey {
    /// Wrap an already composed key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a borrowed string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FragmentKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for FragmentKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl Borrow<str> for FragmentKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One day of infrastructure spend for a scope, as reported by the external
/// cost source.
///
/// `amount` is `None` when the source has no row for the (day, scope) pair.
/// Downstream treats that as an absent contribution, never as zero spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCost {
    /// Calendar day the spend belongs to
    pub day: NaiveDate,
    /// Cluster/environment name the spend belongs to
    pub scope: String,
    /// Spend amount, `None` when the source has no figure for the pair
    pub amount: Option<f64>,
}

impl DailyCost {
    /// Build one daily spend row.
    #[must_use]
    pub fn new(day: NaiveDate, scope: impl Into<String>, amount: Option<f64>) -> Self {
        Self { day, scope: scope.into(), amount }
    }
}
