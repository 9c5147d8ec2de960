//! Score and technical-debt calculation

use std::time::Duration;

use crate::models::{human_duration, Metrics};

pub const MAX_COVERAGE_PENALTY: u32 = 50;
pub const MAX_ISSUES_PENALTY: u32 = 50;

/// Issue weights in hundredths of a point
const ERROR_WEIGHT: u64 = 30;
const WARNING_WEIGHT: u64 = 15;

pub const ERROR_DEBT_COST: u64 = 14;
pub const WARNING_DEBT_COST: u64 = 10;
pub const ERROR_DEBT_MINUTES: u64 = 20;
pub const WARNING_DEBT_MINUTES: u64 = 15;

/// Penalty for untested code: half a point per missing coverage percent.
pub fn coverage_penalty(coverage: f64) -> u32 {
    let coverage = if coverage.is_nan() {
        0.0
    } else {
        coverage.clamp(0.0, 100.0)
    };
    let penalty = (0.5 * (100.0 - coverage)).floor() as u32;
    penalty.min(MAX_COVERAGE_PENALTY)
}

/// Penalty for static-analysis findings, capped at 50.
pub fn issues_penalty(errors: u64, warnings: u64) -> u32 {
    let hundredths = errors
        .saturating_mul(ERROR_WEIGHT)
        .saturating_add(warnings.saturating_mul(WARNING_WEIGHT));
    (hundredths / 100).min(MAX_ISSUES_PENALTY as u64) as u32
}

/// Health score in `0..=100` for aggregated root metrics.
pub fn calculate_score(metrics: &Metrics) -> u32 {
    let penalty = coverage_penalty(metrics.coverage)
        + issues_penalty(metrics.errors_no, metrics.warnings_no);
    100u32.saturating_sub(penalty)
}

/// Estimated cost of fixing every reported issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicalDebt {
    /// Abstract effort points
    pub cost: u64,
    pub time: Duration,
}

impl TechnicalDebt {
    pub fn from_metrics(metrics: &Metrics) -> Self {
        let cost = metrics
            .warnings_no
            .saturating_mul(WARNING_DEBT_COST)
            .saturating_add(metrics.errors_no.saturating_mul(ERROR_DEBT_COST));
        let minutes = metrics
            .errors_no
            .saturating_mul(ERROR_DEBT_MINUTES)
            .saturating_add(metrics.warnings_no.saturating_mul(WARNING_DEBT_MINUTES));
        Self {
            cost,
            time: Duration::from_secs(minutes.saturating_mul(60)),
        }
    }

    /// Time as a duration string (`5h15m0s`).
    pub fn time_string(&self) -> String {
        human_duration(self.time)
    }
}
