//! # CRSF Protocol Module
//!
//! Implementation of the Crossfire (CRSF) protocol for ExpressLRS communication.
//!
//! This module handles:
//! - RC channels packet encoding (16 channels, 11-bit resolution)
//! - Command frames (model id select, device ping)
//! - Telemetry frame validation and payload decoding
//! - CRC8-DVB-S2 checksum calculation
//! - Frame synchronization on a byte stream
//! - Send cadence from baud rate and timing sync reports

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
pub mod reader;
pub mod timing;
