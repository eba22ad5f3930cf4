//! # ELRS Link
//!
//! Keep a CRSF link to an ExpressLRS transmitter module alive from the host.
//!
//! This library streams RC channel frames to the transmitter at the cadence
//! its baud rate calls for, decodes the telemetry coming back, and exposes
//! both through a small supervisor API.

pub mod config;
pub mod error;
pub mod crsf;
pub mod link;
pub mod serial;
pub mod telemetry;
