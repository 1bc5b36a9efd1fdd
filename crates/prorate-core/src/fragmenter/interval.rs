//! Interval Fragmenter
//!
//! Splits an entity's [start, end) wall-clock interval into one fragment per
//! calendar day it touches. Each fragment carries `day_start = max(start,
//! day)` and `day_end = min(end, day+1)`, and durations are integer
//! milliseconds, so the fragments partition the interval exactly: no gaps, no
//! overlaps, durations summing to `end - start`.
//!
//! A timestamp exactly at midnight belongs to the day that starts there: an
//! interval ending at midnight contributes nothing to the day it ends on.

use crate::error::{ProrateError, ProrateResult};
use crate::types::{Entity, Fragment, SplitBasis};
use chrono::{DateTime, NaiveDate, NaiveTime, SubsecRound, Utc};

/// UTC midnight opening the given calendar day
fn day_open(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn next_day(day: NaiveDate) -> ProrateResult<NaiveDate> {
    day.succ_opt().ok_or_else(|| {
        ProrateError::internal_component(
            "interval_fragmenter",
            format!("calendar overflow after {day}"),
        )
    })
}

/// Splits interval entities into day-aligned fragments.
#[derive(Debug, Default)]
pub struct IntervalFragmenter;

impl IntervalFragmenter {
    /// Fragment one interval entity into ordered day fragments.
    ///
    /// Fails with `InvalidInterval` when `end < start`. When `end == start`
    /// the result is a single zero-duration fragment on the start's day,
    /// which the allocator later treats as a degenerate split.
    pub fn fragment(&self, entity: &Entity) -> ProrateResult<Vec<Fragment>> {
        let (start, end, scope) = match &entity.basis {
            SplitBasis::Interval { start, end, scope } => (*start, *end, scope.clone()),
            SplitBasis::Products { .. } => {
                return Err(ProrateError::internal_component(
                    "interval_fragmenter",
                    format!("entity {} has a product basis", entity.id),
                ));
            }
        };

        if end < start {
            return Err(ProrateError::invalid_interval(
                entity.id,
                &start.to_rfc3339(),
                &end.to_rfc3339(),
                "interval end precedes its start",
            ));
        }

        // Sub-millisecond precision is dropped up front so every fragment
        // boundary is millisecond-aligned and the integer durations telescope
        // exactly to end - start.
        let start = start.trunc_subsecs(3);
        let end = end.trunc_subsecs(3);

        if end == start {
            let day = start.date_naive();
            return Ok(vec![Fragment::interval(entity.id, day, start, start, scope)]);
        }

        let mut fragments = Vec::new();
        let mut day = start.date_naive();
        loop {
            let open = day_open(day);
            if open >= end {
                break;
            }
            let close = day_open(next_day(day)?);
            let day_start = if start > open { start } else { open };
            let day_end = if end < close { end } else { close };
            fragments.push(Fragment::interval(entity.id, day, day_start, day_end, scope.clone()));
            day = next_day(day)?;
        }

        Ok(fragments)
    }
}
