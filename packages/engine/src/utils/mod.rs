// packages/engine/src/utils/mod.rs
//! Configuration and error types shared by every layer

pub mod config;
pub mod errors;
