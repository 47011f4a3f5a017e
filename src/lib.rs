//! Serial drivers for PREVAC thickness monitors.
//!
//! The crate implements the two PREVAC serial protocols (the TM13/TM14
//! protocol and the V2.x protocol of the TMC13), the drivers built on them
//! and the film-thickness conversions. Drivers are plain synchronous objects
//! driven by a host through [`core::Device`]; the `prevac-logger` binary is
//! one such host.

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod protocol;
