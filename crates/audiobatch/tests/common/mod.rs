//! Shared utilities for audiobatch integration tests.
//!
//! - `TestHarness` wires a `BatchService` over an in-memory store
//! - scripted fakes for storage, analysis and notification delivery

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{allow, batch_config, wait_until, TestHarness};
