//! AUGUR: trading decision and risk engine for binary prediction markets.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod dashboard;
pub mod engine;
pub mod feeds;
pub mod providers;
pub mod strategy;
pub mod types;
pub mod venue;
