//! # Period resolution
//! Turns a [`WindowSpec`] (two of start / end / duration) into concrete UTC
//! bounds for one evaluation instant.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Bound, ExpressionError, HistoryMathError, Result};
use crate::template::TimeExpression;

pub type SharedExpr = Arc<dyn TimeExpression>;

/// Window configuration. Exactly two of start/end/duration, by construction.
#[derive(Clone)]
pub enum WindowSpec {
    StartEnd { start: SharedExpr, end: SharedExpr },
    StartDuration { start: SharedExpr, duration: Duration },
    EndDuration { end: SharedExpr, duration: Duration },
}

impl fmt::Debug for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::StartEnd { .. } => f.write_str("WindowSpec::StartEnd"),
            WindowSpec::StartDuration { duration, .. } => {
                write!(f, "WindowSpec::StartDuration({}s)", duration.num_seconds())
            }
            WindowSpec::EndDuration { duration, .. } => {
                write!(f, "WindowSpec::EndDuration({}s)", duration.num_seconds())
            }
        }
    }
}

/// Returned by [`WindowSpec::from_parts`] when not exactly two parts are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("you must provide exactly 2 of the following: start, end, duration (got {0})")]
pub struct NotExactlyTwo(pub usize);

impl WindowSpec {
    pub fn from_parts(
        start: Option<SharedExpr>,
        end: Option<SharedExpr>,
        duration: Option<Duration>,
    ) -> std::result::Result<Self, NotExactlyTwo> {
        match (start, end, duration) {
            (Some(start), Some(end), None) => Ok(WindowSpec::StartEnd { start, end }),
            (Some(start), None, Some(duration)) => Ok(WindowSpec::StartDuration { start, duration }),
            (None, Some(end), Some(duration)) => Ok(WindowSpec::EndDuration { end, duration }),
            (s, e, d) => Err(NotExactlyTwo(
                s.is_some() as usize + e.is_some() as usize + d.is_some() as usize,
            )),
        }
    }
}

/// Concrete `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ResolvedPeriod {
    /// Sentinel used before the first evaluation.
    pub const MIN: ResolvedPeriod = ResolvedPeriod {
        start: DateTime::<Utc>::MIN_UTC,
        end: DateTime::<Utc>::MIN_UTC,
    };

    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whole-second bounds, floored.
    pub fn floored(&self) -> (i64, i64) {
        (self.start.timestamp(), self.end.timestamp())
    }
}

/// Resolve the window for `now`. Does not check `start <= end`.
pub fn resolve(spec: &WindowSpec, now: DateTime<Utc>) -> Result<ResolvedPeriod> {
    let eval = |expr: &SharedExpr, bound: Bound| {
        expr.evaluate(now)
            .map_err(|source| HistoryMathError::Expression { bound, source })
    };
    let overflow = |bound| HistoryMathError::Expression {
        bound,
        source: ExpressionError::Overflow,
    };

    match spec {
        WindowSpec::StartEnd { start, end } => Ok(ResolvedPeriod::new(
            eval(start, Bound::Start)?,
            eval(end, Bound::End)?,
        )),
        WindowSpec::StartDuration { start, duration } => {
            let start = eval(start, Bound::Start)?;
            let end = start
                .checked_add_signed(*duration)
                .ok_or_else(|| overflow(Bound::End))?;
            Ok(ResolvedPeriod::new(start, end))
        }
        WindowSpec::EndDuration { end, duration } => {
            let end = eval(end, Bound::End)?;
            let start = end
                .checked_sub_signed(*duration)
                .ok_or_else(|| overflow(Bound::Start))?;
            Ok(ResolvedPeriod::new(start, end))
        }
    }
}
