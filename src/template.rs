//! # Time expressions
//! Tiny expression language used for window bounds in sensor config.
//!
//! ```text
//! today + 6h
//! now - 90m
//! start_of_week
//! 2025-09-06T09:00:00Z
//! 1757149200 + 1d
//! ```
//!
//! Expressions are parsed once (at config load) and evaluated against the
//! current instant on every update. Calendar anchors are UTC.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ExpressionError;

/// Anything that can turn the current instant into a window bound.
pub trait TimeExpression: Send + Sync {
    fn evaluate(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ExpressionError>;
}

/// Closures are handy evaluators in tests and embedding code.
impl<F> TimeExpression for F
where
    F: Fn(DateTime<Utc>) -> Result<DateTime<Utc>, ExpressionError> + Send + Sync,
{
    fn evaluate(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ExpressionError> {
        self(now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Anchor {
    Now,
    Today,
    Tomorrow,
    Yesterday,
    StartOfWeek,
    StartOfMonth,
    Fixed(DateTime<Utc>),
}

/// A parsed `anchor (+|- offset)*` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    anchor: Anchor,
    /// Offsets in seconds, signed, applied left to right.
    offsets: Vec<i64>,
}

static RE_OFFSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([+-])\s*(\d+)\s*([smhdw])").expect("offset regex"));

impl Template {
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        let src = input.trim();
        if src.is_empty() {
            return Err(parse_err(input, "empty expression"));
        }

        // RFC 3339 literals contain '-' and '+', so try the longest anchor first
        // and fall back to shorter prefixes ending before an operator.
        let mut cuts: Vec<usize> = src
            .char_indices()
            .filter(|&(i, c)| i > 0 && (c == '+' || c == '-'))
            .map(|(i, _)| i)
            .collect();
        cuts.push(src.len());

        let mut last_err = parse_err(input, &format!("unknown anchor {src:?}"));
        for &cut in cuts.iter().rev() {
            let Some(anchor) = parse_anchor(src[..cut].trim()) else {
                continue;
            };
            match parse_offsets(&src[cut..]) {
                Ok(offsets) => return Ok(Self { anchor, offsets }),
                Err(reason) => last_err = parse_err(input, &reason),
            }
        }
        Err(last_err)
    }
}

impl TimeExpression for Template {
    fn evaluate(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ExpressionError> {
        let mut t = anchor_instant(&self.anchor, now)?;
        for &secs in &self.offsets {
            let delta = Duration::try_seconds(secs).ok_or(ExpressionError::Overflow)?;
            t = t
                .checked_add_signed(delta)
                .ok_or(ExpressionError::Overflow)?;
        }
        Ok(t)
    }
}

fn parse_err(input: &str, reason: &str) -> ExpressionError {
    ExpressionError::Parse {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_offsets(mut rest: &str) -> Result<Vec<i64>, String> {
    let mut offsets = Vec::new();
    while !rest.trim().is_empty() {
        let caps = RE_OFFSET
            .captures(rest)
            .ok_or_else(|| format!("bad offset near {:?}", rest.trim()))?;
        let sign = if &caps[1] == "-" { -1 } else { 1 };
        let amount: i64 = caps[2]
            .parse()
            .map_err(|_| "offset amount too large".to_string())?;
        let unit = match &caps[3] {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => 604_800,
        };
        let secs = amount
            .checked_mul(unit)
            .ok_or_else(|| "offset amount too large".to_string())?;
        offsets.push(sign * secs);
        rest = &rest[caps[0].len()..];
    }
    Ok(offsets)
}

fn parse_anchor(s: &str) -> Option<Anchor> {
    match s.to_ascii_lowercase().as_str() {
        "now" => return Some(Anchor::Now),
        "today" | "midnight" => return Some(Anchor::Today),
        "tomorrow" => return Some(Anchor::Tomorrow),
        "yesterday" => return Some(Anchor::Yesterday),
        "start_of_week" => return Some(Anchor::StartOfWeek),
        "start_of_month" => return Some(Anchor::StartOfMonth),
        _ => {}
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(Anchor::Fixed(dt.with_timezone(&Utc)));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .map(Anchor::Fixed)
}

fn anchor_instant(anchor: &Anchor, now: DateTime<Utc>) -> Result<DateTime<Utc>, ExpressionError> {
    let midnight = |d: chrono::NaiveDate| d.and_time(NaiveTime::MIN).and_utc();
    let today = now.date_naive();
    let out = match anchor {
        Anchor::Now => Some(now),
        Anchor::Fixed(t) => Some(*t),
        Anchor::Today => Some(midnight(today)),
        Anchor::Tomorrow => today.succ_opt().map(midnight),
        Anchor::Yesterday => today.pred_opt().map(midnight),
        Anchor::StartOfWeek => today
            .checked_sub_signed(Duration::days(today.weekday().num_days_from_monday() as i64))
            .map(midnight),
        Anchor::StartOfMonth => today.with_day(1).map(midnight),
    };
    out.ok_or(ExpressionError::Overflow)
}
