//! # Statistics
//! Reductions over the numeric values of a window.
//!
//! Every reduction is a pure `&[f64] -> Option<f64>`; an empty slice yields
//! `None`. Values arrive in observation order, which `last` and `change` rely on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Statistic computed over the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Change,
    Last,
    #[default]
    Max,
    Mean,
    Median,
    Min,
    Range,
}

impl StatKind {
    pub const ALL: [StatKind; 7] = [
        StatKind::Change,
        StatKind::Last,
        StatKind::Max,
        StatKind::Mean,
        StatKind::Median,
        StatKind::Min,
        StatKind::Range,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatKind::Change => "change",
            StatKind::Last => "last",
            StatKind::Max => "max",
            StatKind::Mean => "mean",
            StatKind::Median => "median",
            StatKind::Min => "min",
            StatKind::Range => "range",
        }
    }

    /// Reduction function for this kind.
    pub fn reducer(self) -> fn(&[f64]) -> Option<f64> {
        match self {
            StatKind::Change => change,
            StatKind::Last => last,
            StatKind::Max => max,
            StatKind::Mean => mean,
            StatKind::Median => median,
            StatKind::Min => min,
            StatKind::Range => range,
        }
    }

    pub fn apply(self, values: &[f64]) -> Option<f64> {
        (self.reducer())(values)
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown statistic {0:?} (expected one of change, last, max, mean, median, min, range)")]
pub struct UnknownStat(pub String);

impl FromStr for StatKind {
    type Err = UnknownStat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        StatKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| UnknownStat(s.to_string()))
    }
}

/// Parse a recorded state as a number. Non-numeric states ("unavailable",
/// "unknown", "on", ...) and non-finite values yield `None`.
pub fn parse_numeric(state: &str) -> Option<f64> {
    state
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub fn last(values: &[f64]) -> Option<f64> {
    values.last().copied()
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Arithmetic mean using Kahan summation.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sum = 0.0f64;
    let mut c = 0.0f64;
    for &v in values {
        let y = v - c;
        let t = sum + y;
        c = (t - sum) - y;
        sum = t;
    }
    Some(sum / values.len() as f64)
}

/// Median; mean of the two middle values on even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn range(values: &[f64]) -> Option<f64> {
    Some(max(values)? - min(values)?)
}

/// Last minus first.
pub fn change(values: &[f64]) -> Option<f64> {
    Some(values.last()? - values.first()?)
}
