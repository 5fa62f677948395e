//! # Sunmine - battery-driven power controller for ASIC miners
//!
//! Throttles a WhatsMiner's power limit from the state of charge of a solar
//! battery bank, so the miner burns surplus energy without draining the
//! battery, and exposes a small HTTP API for monitoring and manual override.
//!
//! ## Architecture
//!
//! - `telemetry`: pollers publishing the latest battery and miner readings
//! - `battery`: battery portal client and runtime document parsing
//! - `miner`: WhatsMiner TCP API client
//! - `policy`: pure SOC + time-of-day power decision
//! - `controller`: the auto-control loop and its published snapshots
//! - `dispatcher`: single-flight power command execution
//! - `persistence`: best-effort state file
//! - `config`, `error`, `logging`: ambient plumbing
//! - `web`: HTTP API and SSE streams

pub mod battery;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod miner;
pub mod persistence;
pub mod policy;
pub mod telemetry;
#[cfg(feature = "web")]
pub mod web;

mod config_tests;

// Re-export commonly used types
pub use config::Config;
pub use controller::{AutoController, ControllerHandle};
pub use dispatcher::CommandDispatcher;
pub use error::{Result, SunmineError};
