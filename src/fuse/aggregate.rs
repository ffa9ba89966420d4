//! Stateless scalar reductions over a value set.
//!
//! Every reduction returns [`Aggregate::NoData`] for an empty input instead of
//! a number, so "nothing observed" never reads as a computed zero.

use crate::config::AggregationMethod;
use crate::model::Aggregate;

/// One contributing value, with its distance to the target when known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub distance: Option<f64>,
}

impl Sample {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            distance: None,
        }
    }

    pub fn at_distance(value: f64, distance: f64) -> Self {
        Self {
            value,
            distance: Some(distance),
        }
    }
}

/// Dispatches to the reduction named by `method`.
pub fn invoke(method: AggregationMethod, samples: &[Sample]) -> Aggregate {
    let values = || samples.iter().map(|s| s.value).collect::<Vec<_>>();
    match method {
        AggregationMethod::Mean => mean(&values()),
        AggregationMethod::Sum => sum(&values()),
        AggregationMethod::Max => max(&values()),
        AggregationMethod::Min => min(&values()),
        AggregationMethod::InverseDistance => inverse_distance(samples),
        AggregationMethod::Unknown => Aggregate::NoData,
    }
}

pub fn mean(values: &[f64]) -> Aggregate {
    if values.is_empty() {
        return Aggregate::NoData;
    }
    Aggregate::Value(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn sum(values: &[f64]) -> Aggregate {
    if values.is_empty() {
        return Aggregate::NoData;
    }
    Aggregate::Value(values.iter().sum())
}

pub fn max(values: &[f64]) -> Aggregate {
    values
        .iter()
        .copied()
        .reduce(f64::max)
        .map_or(Aggregate::NoData, Aggregate::Value)
}

pub fn min(values: &[f64]) -> Aggregate {
    values
        .iter()
        .copied()
        .reduce(f64::min)
        .map_or(Aggregate::NoData, Aggregate::Value)
}

/// `Σ(value / d) / Σ(1 / d)` over samples that carry a distance.
///
/// Samples too close for a finite weight (distance 0 or subnormal) short-circuit:
/// the result is the mean of their values. A non-finite result is NoData.
pub fn inverse_distance(samples: &[Sample]) -> Aggregate {
    // (value, weight)
    let weighted: Vec<(f64, f64)> = samples
        .iter()
        .filter_map(|s| Some((s.value, s.distance?)))
        .filter(|(_, d)| d.is_finite() && *d >= 0.0)
        .map(|(v, d)| (v, 1.0 / d))
        .collect();

    let coincident: Vec<f64> = weighted
        .iter()
        .filter(|(_, w)| w.is_infinite())
        .map(|(v, _)| *v)
        .collect();
    if !coincident.is_empty() {
        return mean(&coincident);
    }

    if weighted.is_empty() {
        return Aggregate::NoData;
    }
    let (numerator, denominator) = weighted
        .iter()
        .fold((0.0, 0.0), |(num, den), (v, w)| (num + v * w, den + w));
    let result = numerator / denominator;
    if result.is_finite() {
        Aggregate::Value(result)
    } else {
        Aggregate::NoData
    }
}
