//! Resale sniper: watches marketplace resale listings and buys
//! underpriced collectibles.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod engine;
pub mod http;
pub mod strategy;
pub mod telemetry;
pub mod types;
