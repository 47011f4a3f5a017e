//! PREVAC instrument drivers
//!
//! - [`tm1x::Tm1x`]: TM13/TM14 frequency monitor, host-side thickness
//! - [`tmc13::Tmc13`]: TMC13 controller, thickness, rate and crystal life
//! - [`tmc13_shutter::Tmc13Shutter`]: TMC13 shutter output as a switch
//!
//! All drivers implement [`Device`](crate::core::Device) and are generic
//! over the [`Adapter`](crate::adapters::Adapter) they own.

pub mod tm1x;
pub mod tmc13;
pub mod tmc13_shutter;
pub mod tmc_link;

pub use tm1x::{Tm1x, Tm1xSettings};
pub use tmc13::Tmc13;
pub use tmc13_shutter::{ShutterState, Tmc13Shutter};
pub use tmc_link::TmcLink;
