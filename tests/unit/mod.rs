// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for the FoundationDB operator
//!
//! This module contains unit tests for:
//! - Exclusion safety and transaction-system suppression
//! - Coordinator rotation
//! - Process group removal and inclusion
//! - Global synchronization between operator instances
//! - Replacement of failed process groups and process restarts
//! - The reconciliation driver and pipeline outcomes
//! - State machine transitions
//! - Spec validation

#[path = "../common/mod.rs"]
mod common;

mod exclusion;
mod lifecycle;
mod maintenance;
mod state_machine;
mod validation;
