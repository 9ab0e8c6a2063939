//! Error types shared by the period resolver, the history store and the aggregator.

use std::fmt;

use thiserror::Error;

/// Which side of the window an expression belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Start => f.write_str("start"),
            Bound::End => f.write_str("end"),
        }
    }
}

/// Raised by a [`crate::template::TimeExpression`] that cannot produce an instant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("cannot parse time expression {input:?}: {reason}")]
    Parse { input: String, reason: String },

    #[error("time expression overflowed the representable range")]
    Overflow,

    #[error("{0}")]
    Custom(String),
}

/// Raised by a [`crate::history::HistoryStore`] query.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),

    #[error("history query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Hard failures of a single `update` cycle. Both abort the cycle.
#[derive(Error, Debug)]
pub enum HistoryMathError {
    #[error("failed to evaluate {bound} of period: {source}")]
    Expression {
        bound: Bound,
        #[source]
        source: ExpressionError,
    },

    #[error("history query for {entity_id} failed: {source}")]
    Storage {
        entity_id: String,
        #[source]
        source: StoreError,
    },
}

pub type Result<T> = std::result::Result<T, HistoryMathError>;
