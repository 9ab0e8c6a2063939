// src/lib.rs
//! Rolling statistics over the recorded state history of a monitored entity.
//!
//! The core is [`aggregator::HistoryMath`]: it resolves the configured window,
//! keeps the window's samples cached between updates, refetches from a
//! [`history::HistoryStore`] only when the cache cannot be trusted, and
//! reduces the numeric samples with a [`stats::StatKind`].

pub mod aggregator;
pub mod error;
pub mod history;
pub mod period;
pub mod stats;
pub mod template;

// Runtime around the core: config, update loop, state feed, HTTP, metrics.
pub mod api;
pub mod config;
pub mod coordinator;
pub mod feed;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{AggregateResult, HistoryMath, Sample};
pub use crate::error::{HistoryMathError, Result};
pub use crate::history::{HistoryStore, InMemoryHistory, StateChangeEvent, StateRecord};
pub use crate::period::{resolve, ResolvedPeriod, WindowSpec};
pub use crate::stats::StatKind;
pub use crate::template::{Template, TimeExpression};
