//! Repository Health Scoring
//!
//! Turns the aggregated root metrics of a build into a single 0-100 score
//! plus a technical-debt estimate.
//!
//! # Scoring Formula
//!
//! ```text
//! Score = max(0, 100 - Coverage Penalty - Issues Penalty)
//!
//!   Coverage Penalty = floor(0.5 × (100 - coverage%))           0..50
//!   Issues Penalty   = min(50, floor(0.3 × errors + 0.15 × warnings))
//! ```
//!
//! The issues penalty is evaluated in integer hundredths, so 10 errors give
//! exactly 3 points rather than 2.9999.
//!
//! # Technical Debt
//!
//! - Cost: 14 points per error, 10 per warning
//! - Time: 20 minutes per error, 15 per warning
//!
//! # Example
//!
//! 80% coverage, no issues → penalty 10 + 0 → score 90.
//! 100% coverage, 10 errors → penalty 0 + 3 → score 97.

mod health;

pub use health::{
    calculate_score, coverage_penalty, issues_penalty, TechnicalDebt, ERROR_DEBT_COST,
    ERROR_DEBT_MINUTES, MAX_COVERAGE_PENALTY, MAX_ISSUES_PENALTY, WARNING_DEBT_COST,
    WARNING_DEBT_MINUTES,
};
