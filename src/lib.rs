//! `ivcal` library crate.
//!
//! Determines the breakdown voltage (Vbd) of SiPM channels from two
//! complementary reverse I–V sweeps (a coarse bias scan and a fine trim scan)
//! and solves the DAC settings needed to operate each channel at a target
//! overvoltage, under the constraint that all channels on one AFE share a
//! single bias line.
//!
//! The crate is a pure batch-computation core:
//!
//! - callers (acquisition tools, report writers) hand it already-loaded sweep
//!   arrays and consume structured results
//! - every stage is deterministic; re-running on identical inputs produces
//!   bit-identical outputs
//! - per-channel failures are isolated and never abort sibling channels

pub mod app;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod report;
pub mod solve;
