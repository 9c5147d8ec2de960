//! qfarm - repository quality worker
//!
//! Consumes repository identifiers from a shared work list, downloads and
//! analyzes each repository (static issues, test coverage), scores it and
//! persists a versioned build report, broadcasting progress events along
//! the way.

pub mod analyzers;
pub mod broker;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod scoring;
pub mod tree;
pub mod versioning;
pub mod worker;
