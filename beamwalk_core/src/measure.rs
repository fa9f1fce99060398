//! Filtered averaging over one or more readable sources.
//!
//! `measure_average` gathers N filtered snapshots and reduces each requested
//! field to its median. The median (not the mean) is deliberate: centroid
//! pipelines produce occasional wild outliers and the median shrugs them off.

use std::time::Duration;

use tracing::debug;

use crate::beamline::Beamline;
use crate::error::{AlignError, BuildError, Result};
use crate::filters::Filters;
use crate::stream::{SourceRef, field_key};

/// Inter-sample delay policy. A scalar repeats for every gap; an explicit
/// list must cover at least N−1 gaps or the measurement is refused up front.
#[derive(Debug, Clone, Default)]
pub enum DelaySchedule {
    #[default]
    None,
    Every(Duration),
    List(Vec<Duration>),
}

impl DelaySchedule {
    fn validate(&self, num: usize) -> Result<()> {
        if let DelaySchedule::List(entries) = self {
            let needed = num.saturating_sub(1);
            if entries.len() < needed {
                return Err(BuildError::BadDelaySchedule {
                    got: entries.len(),
                    needed,
                }
                .into());
            }
        }
        Ok(())
    }

    fn gap(&self, i: usize) -> Option<Duration> {
        match self {
            DelaySchedule::None => None,
            DelaySchedule::Every(d) => Some(*d),
            DelaySchedule::List(entries) => entries.get(i).copied(),
        }
    }
}

/// Gather `num` filtered snapshots of `sources` and return the per-field
/// median of the accepted ones.
///
/// `target_fields` aligns with the leading sources; trailing sources are
/// recorded in the event stream but contribute nothing to the result. Every
/// snapshot is emitted as one event document, accepted or not. Fewer than
/// `min_valid` accepted samples raises [`AlignError::FilterCount`].
pub fn measure_average(
    bl: &mut Beamline,
    sources: &[SourceRef],
    target_fields: &[&str],
    num: usize,
    delay: &DelaySchedule,
    filters: &Filters,
    min_valid: usize,
) -> Result<Vec<f64>> {
    if target_fields.len() > sources.len() {
        return Err(BuildError::LengthMismatch {
            name: "target_fields",
            got: target_fields.len(),
            expected: sources.len(),
        }
        .into());
    }
    let num = num.max(1);
    let min_valid = min_valid.max(1);
    delay.validate(num)?;

    let keys: Vec<String> = target_fields
        .iter()
        .enumerate()
        .map(|(j, field)| field_key(bl.source_name(sources[j]), field))
        .collect();

    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(num);
    for i in 0..num {
        let iter_start = bl.clock().now();
        let doc = bl.trigger_and_read(sources)?;
        let accepted = filters.passes(&doc);
        bl.save(&doc);
        if accepted {
            let row: Option<Vec<f64>> = keys.iter().map(|k| doc.get(k).copied()).collect();
            match row {
                Some(row) => rows.push(row),
                // A requested field absent from the snapshot invalidates it.
                None => debug!(sample = i, "snapshot missing a requested field"),
            }
        } else {
            debug!(sample = i, "snapshot rejected by filters");
        }
        if i + 1 < num
            && let Some(d) = delay.gap(i)
        {
            let elapsed = bl.clock().now().saturating_duration_since(iter_start);
            let remaining = d.saturating_sub(elapsed);
            if !remaining.is_zero() {
                bl.sleep(remaining);
            }
        }
    }

    if rows.len() < min_valid {
        return Err(AlignError::FilterCount {
            accepted: rows.len(),
            required: min_valid,
        }
        .into());
    }

    Ok((0..keys.len())
        .map(|j| median(rows.iter().map(|r| r[j])))
        .collect())
}

/// Single-detector convenience wrapper around [`measure_average`].
pub fn measure_centroid(
    bl: &mut Beamline,
    imager: usize,
    target_field: &str,
    average: usize,
    delay: &DelaySchedule,
    filters: &Filters,
    min_valid: usize,
) -> Result<f64> {
    let avgs = measure_average(
        bl,
        &[SourceRef::Imager(imager)],
        &[target_field],
        average,
        delay,
        filters,
        min_valid,
    )?;
    Ok(avgs[0])
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(f64::total_cmp);
    let n = v.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    if n % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}
