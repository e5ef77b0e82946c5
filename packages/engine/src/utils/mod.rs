// packages/engine/src/utils/mod.rs
//! Common utilities: errors, configuration and time

pub mod clock;
pub mod config;
pub mod errors;
