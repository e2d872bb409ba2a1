//! DIPBOT: Multi-pool dip-buying bot
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod feed;
pub mod execution;
pub mod discovery;
pub mod notify;
pub mod engine;
pub mod storage;
