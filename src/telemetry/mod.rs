//! # Telemetry Module
//!
//! Typed telemetry decoded from inbound CRSF frames, and everything that
//! moves it from the receive loop to consumers.
//!
//! This module handles:
//! - Mapping frame types to typed telemetry (closed dispatch table)
//! - Bounded drop-on-full output queues per routed kind
//! - Callback fan-out from a dedicated monitor task
//! - Recording telemetry to rotating JSONL files

pub mod logger;
pub mod monitor;
pub mod queue;

use crate::crsf::decoder::*;
use crate::crsf::protocol::*;
use crate::error::{ElrsLinkError, Result};

/// A decoded inbound telemetry frame
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryFrame {
    LinkStats(LinkStatistics),
    Battery(BatterySensor),
    Gps(GpsData),
    Attitude(Attitude),
    FlightMode(String),
    LinkTx(LinkTx),
    LinkRx(LinkRx),
    Barometer(Barometer),
    Variometer(Variometer),
    BarometerVariometer(BarometerVariometer),
    Sync(RateSync),
    /// Any frame type this crate has no decoder for
    Unrecognized { frame_type: u8, payload: Vec<u8> },
}

impl TelemetryFrame {
    /// Short name used in logs and telemetry records
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryFrame::LinkStats(_) => "link_stats",
            TelemetryFrame::Battery(_) => "battery",
            TelemetryFrame::Gps(_) => "gps",
            TelemetryFrame::Attitude(_) => "attitude",
            TelemetryFrame::FlightMode(_) => "flight_mode",
            TelemetryFrame::LinkTx(_) => "link_tx",
            TelemetryFrame::LinkRx(_) => "link_rx",
            TelemetryFrame::Barometer(_) => "barometer",
            TelemetryFrame::Variometer(_) => "variometer",
            TelemetryFrame::BarometerVariometer(_) => "barometer_variometer",
            TelemetryFrame::Sync(_) => "sync",
            TelemetryFrame::Unrecognized { .. } => "unrecognized",
        }
    }
}

impl TryFrom<CrsfFrame> for TelemetryFrame {
    type Error = ElrsLinkError;

    /// Dispatch a CRC-valid frame to its payload decoder.
    ///
    /// Unknown frame types become [`TelemetryFrame::Unrecognized`]; a known
    /// type with a malformed payload is a protocol error.
    fn try_from(frame: CrsfFrame) -> Result<Self> {
        let payload = frame.payload.as_slice();

        let decoded = match frame.frame_type {
            CRSF_FRAMETYPE_LINK_STATISTICS => {
                TelemetryFrame::LinkStats(decode_link_statistics(payload)?)
            }
            CRSF_FRAMETYPE_BATTERY_SENSOR => {
                TelemetryFrame::Battery(decode_battery_sensor(payload)?)
            }
            CRSF_FRAMETYPE_GPS => TelemetryFrame::Gps(decode_gps(payload)?),
            CRSF_FRAMETYPE_ATTITUDE => TelemetryFrame::Attitude(decode_attitude(payload)?),
            CRSF_FRAMETYPE_FLIGHT_MODE => TelemetryFrame::FlightMode(decode_flight_mode(payload)?),
            CRSF_FRAMETYPE_LINK_TX => TelemetryFrame::LinkTx(decode_link_tx(payload)?),
            CRSF_FRAMETYPE_LINK_RX => TelemetryFrame::LinkRx(decode_link_rx(payload)?),
            CRSF_FRAMETYPE_VARIO => TelemetryFrame::Variometer(decode_variometer(payload)?),
            CRSF_FRAMETYPE_BARO_ALTITUDE if payload.len() >= CRSF_BARO_VARIO_PAYLOAD_SIZE => {
                TelemetryFrame::BarometerVariometer(decode_barometer_variometer(payload)?)
            }
            CRSF_FRAMETYPE_BARO_ALTITUDE => TelemetryFrame::Barometer(decode_barometer(payload)?),
            CRSF_FRAMETYPE_RADIO_ID => match decode_rate_sync(payload)? {
                Some(sync) => TelemetryFrame::Sync(sync),
                None => TelemetryFrame::Unrecognized {
                    frame_type: frame.frame_type,
                    payload: frame.payload,
                },
            },
            _ => TelemetryFrame::Unrecognized {
                frame_type: frame.frame_type,
                payload: frame.payload,
            },
        };

        Ok(decoded)
    }
}
