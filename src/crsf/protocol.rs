//! # CRSF Protocol Constants and Types
//!
//! Core protocol definitions for CRSF (Crossfire) communication.

use serde::Serialize;

use crate::error::{ElrsLinkError, Result};

/// Flight controller address, also the classic CRSF sync byte
pub const CRSF_SYNC_BYTE: u8 = 0xC8;

/// Handset address (telemetry destination, command origin)
pub const CRSF_ADDRESS_RADIO: u8 = 0xEA;

/// Receiver address
pub const CRSF_ADDRESS_RECEIVER: u8 = 0xEC;

/// Transmitter module address (destination of everything we send)
pub const CRSF_ADDRESS_TRANSMITTER: u8 = 0xEE;

/// Broadcast address used by device pings
pub const CRSF_ADDRESS_BROADCAST: u8 = 0x00;

/// Address bytes accepted at the start of an inbound frame
pub const CRSF_FRAME_ADDRESSES: [u8; 4] = [
    CRSF_SYNC_BYTE,
    CRSF_ADDRESS_RADIO,
    CRSF_ADDRESS_RECEIVER,
    CRSF_ADDRESS_TRANSMITTER,
];

/// GPS packet type
pub const CRSF_FRAMETYPE_GPS: u8 = 0x02;

/// Variometer packet type
pub const CRSF_FRAMETYPE_VARIO: u8 = 0x07;

/// Battery sensor packet type
pub const CRSF_FRAMETYPE_BATTERY_SENSOR: u8 = 0x08;

/// Barometric altitude (optionally with vertical speed) packet type
pub const CRSF_FRAMETYPE_BARO_ALTITUDE: u8 = 0x09;

/// Link Statistics packet type
pub const CRSF_FRAMETYPE_LINK_STATISTICS: u8 = 0x14;

/// RC Channels packet type
pub const CRSF_FRAMETYPE_RC_CHANNELS_PACKED: u8 = 0x16;

/// Receiver-side link statistics
pub const CRSF_FRAMETYPE_LINK_RX: u8 = 0x1C;

/// Transmitter-side link statistics
pub const CRSF_FRAMETYPE_LINK_TX: u8 = 0x1D;

/// Attitude packet type
pub const CRSF_FRAMETYPE_ATTITUDE: u8 = 0x1E;

/// Flight mode packet type
pub const CRSF_FRAMETYPE_FLIGHT_MODE: u8 = 0x21;

/// Device ping (extended header)
pub const CRSF_FRAMETYPE_DEVICE_PING: u8 = 0x28;

/// Command frame (extended header)
pub const CRSF_FRAMETYPE_COMMAND: u8 = 0x32;

/// Radio ID frame, carries the timing sync subtype
pub const CRSF_FRAMETYPE_RADIO_ID: u8 = 0x3A;

/// Radio ID subtype reporting packet rate and phase offset
pub const CRSF_RADIO_ID_SUBTYPE_TIMING: u8 = 0x10;

/// Crossfire command realm
pub const CRSF_COMMAND_SUBCMD_CROSSFIRE: u8 = 0x10;

/// Model select sub-command
pub const CRSF_COMMAND_MODEL_SELECT_ID: u8 = 0x05;

/// Maximum CRSF frame size (address + length + 62)
pub const CRSF_MAX_FRAME_SIZE: usize = 64;

/// Maximum CRSF payload size
/// Frame structure: address(1) + length(1) + type(1) + payload(N) + crc(1)
/// Maximum frame size is 64 bytes, so max payload = 64 - 4 = 60 bytes
pub const CRSF_MAX_PAYLOAD_SIZE: usize = 60;

/// Smallest legal length byte (type + crc)
pub const CRSF_MIN_FRAME_LENGTH: u8 = 2;

/// Largest legal length byte
pub const CRSF_MAX_FRAME_LENGTH: u8 = (CRSF_MAX_FRAME_SIZE - 2) as u8;

/// RC channels payload size (22 bytes for 16 channels × 11 bits)
pub const CRSF_RC_CHANNELS_PAYLOAD_SIZE: usize = 22;

/// RC channels frame length (type + payload + crc)
pub const CRSF_RC_CHANNELS_FRAME_LENGTH: u8 = 0x18; // 24 bytes

/// Number of RC channels
pub const CRSF_NUM_CHANNELS: usize = 16;

/// Bits per packed channel value
pub const CRSF_CHANNEL_BITS: usize = 11;

/// Channel value range (11-bit: 0-2047)
pub const CRSF_CHANNEL_VALUE_MIN: u16 = 0;
pub const CRSF_CHANNEL_VALUE_MAX: u16 = 2047;
pub const CRSF_CHANNEL_VALUE_CENTER: u16 = 992;

/// Link Statistics payload size
pub const CRSF_LINK_STATS_PAYLOAD_SIZE: usize = 10;

/// Battery Sensor payload size
pub const CRSF_BATTERY_SENSOR_PAYLOAD_SIZE: usize = 8;

/// GPS payload size
pub const CRSF_GPS_PAYLOAD_SIZE: usize = 15;

/// Attitude payload size
pub const CRSF_ATTITUDE_PAYLOAD_SIZE: usize = 6;

/// Variometer payload size
pub const CRSF_VARIO_PAYLOAD_SIZE: usize = 2;

/// Barometric altitude payload size, without and with vertical speed
pub const CRSF_BARO_ALTITUDE_PAYLOAD_SIZE: usize = 2;
pub const CRSF_BARO_VARIO_PAYLOAD_SIZE: usize = 4;

/// Receiver link statistics payload size
pub const CRSF_LINK_RX_PAYLOAD_SIZE: usize = 5;

/// Transmitter link statistics payload size
pub const CRSF_LINK_TX_PAYLOAD_SIZE: usize = 6;

/// Timing sync payload size: dest + origin + subtype + rate(4) + offset(4)
pub const CRSF_TIMING_SYNC_PAYLOAD_SIZE: usize = 11;

/// RC channels array type (16 channels, 11-bit values)
pub type RcChannels = [u16; CRSF_NUM_CHANNELS];

/// Link statistics telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatistics {
    /// Uplink RSSI (antenna 1) in -dBm
    pub uplink_rssi_1: u8,

    /// Uplink RSSI (antenna 2) in -dBm (diversity)
    pub uplink_rssi_2: u8,

    /// Uplink link quality (0-100%)
    pub uplink_lq: u8,

    /// Uplink SNR in dB
    pub uplink_snr: i8,

    /// Active antenna (0 or 1)
    pub active_antenna: u8,

    /// RF mode / packet rate
    pub rf_mode: u8,

    /// Uplink TX power (encoded)
    pub uplink_tx_power: u8,

    /// Downlink RSSI in -dBm
    pub downlink_rssi: u8,

    /// Downlink link quality (0-100%)
    pub downlink_lq: u8,

    /// Downlink SNR in dB
    pub downlink_snr: i8,
}

/// Battery sensor telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatterySensor {
    /// Battery voltage in volts
    pub voltage: f32,

    /// Current draw in amperes
    pub current: f32,

    /// Capacity used in mAh
    pub capacity_used: u32,

    /// Battery remaining percentage (0-100%)
    pub remaining_percent: u8,
}

/// GPS telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsData {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Ground speed in km/h
    pub ground_speed: f32,

    /// Heading in degrees
    pub heading: f32,

    /// Altitude in meters
    pub altitude: i32,

    /// Number of satellites
    pub satellites: u8,
}

/// Attitude telemetry data, in radians
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Attitude {
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
}

/// Receiver-side link statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRx {
    pub rssi_dbm: u8,
    pub rssi_percent: u8,
    pub link_quality: u8,
    pub snr: i8,
    pub rf_power_dbm: u8,
}

/// Transmitter-side link statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTx {
    pub rssi_dbm: u8,
    pub rssi_percent: u8,
    pub link_quality: u8,
    pub snr: i8,
    pub rf_power_dbm: u8,
    /// Packet rate in frames per second
    pub fps: u16,
}

/// Barometric altitude in meters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Barometer {
    pub altitude: f32,
}

/// Vertical speed in m/s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variometer {
    pub vertical_speed: f32,
}

/// Combined barometric altitude and vertical speed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarometerVariometer {
    pub altitude: f32,
    pub vertical_speed: f32,
}

/// Timing report from the transmitter module.
///
/// Both fields are in units of 0.1 µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSync {
    /// Packet interval the module is running at
    pub rate: i32,

    /// Phase offset of our frames relative to the module's expected window
    pub offset: i32,
}

/// CRSF frame structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsfFrame {
    /// Address byte the frame was sent to
    pub address: u8,

    /// Frame type
    pub frame_type: u8,

    /// Payload data
    pub payload: Vec<u8>,
}

impl CrsfFrame {
    /// Create a new CRSF frame
    ///
    /// # Arguments
    ///
    /// * `address` - Destination address byte
    /// * `frame_type` - Frame type byte
    /// * `payload` - Payload data (max 60 bytes)
    ///
    /// # Errors
    ///
    /// Returns error if payload exceeds CRSF_MAX_PAYLOAD_SIZE (60 bytes)
    pub fn new(address: u8, frame_type: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > CRSF_MAX_PAYLOAD_SIZE {
            return Err(ElrsLinkError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                CRSF_MAX_PAYLOAD_SIZE
            )));
        }

        Ok(Self {
            address,
            frame_type,
            payload,
        })
    }

    /// Get frame length (type + payload + crc)
    ///
    /// This is guaranteed not to overflow since payload is validated to be ≤ 60 bytes
    pub fn length(&self) -> u8 {
        (1 + self.payload.len() + 1) as u8
    }

    /// Frames with type 0x28 and above carry destination and origin bytes
    pub fn is_extended(&self) -> bool {
        self.frame_type >= CRSF_FRAMETYPE_DEVICE_PING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_value_ranges() {
        assert_eq!(CRSF_CHANNEL_VALUE_MIN, 0);
        assert_eq!(CRSF_CHANNEL_VALUE_MAX, 2047);
        assert_eq!(CRSF_CHANNEL_VALUE_CENTER, 992);
        assert_eq!(CRSF_CHANNEL_VALUE_MAX as usize, (1 << CRSF_CHANNEL_BITS) - 1);
    }

    #[test]
    fn test_frame_constants() {
        assert_eq!(CRSF_SYNC_BYTE, 0xC8);
        assert_eq!(CRSF_FRAMETYPE_RC_CHANNELS_PACKED, 0x16);
        assert_eq!(CRSF_FRAMETYPE_LINK_STATISTICS, 0x14);
        assert_eq!(CRSF_NUM_CHANNELS, 16);
        assert_eq!(CRSF_MAX_FRAME_LENGTH, 62);
        assert_eq!(
            CRSF_RC_CHANNELS_PAYLOAD_SIZE * 8,
            CRSF_NUM_CHANNELS * CRSF_CHANNEL_BITS
        );
    }

    #[test]
    fn test_crsf_frame() {
        let frame = CrsfFrame::new(
            CRSF_ADDRESS_TRANSMITTER,
            CRSF_FRAMETYPE_RC_CHANNELS_PACKED,
            vec![0u8; 22],
        )
        .unwrap();
        assert_eq!(frame.frame_type, 0x16);
        assert_eq!(frame.payload.len(), 22);
        assert_eq!(frame.length(), 24); // 1 (type) + 22 (payload) + 1 (crc)
        assert!(!frame.is_extended());
    }

    #[test]
    fn test_crsf_frame_payload_too_large() {
        // Payload of 61 bytes should fail (max is 60)
        let result =
            CrsfFrame::new(CRSF_SYNC_BYTE, CRSF_FRAMETYPE_RC_CHANNELS_PACKED, vec![0u8; 61]);
        assert!(result.is_err());
    }

    #[test]
    fn test_extended_frames() {
        let frame =
            CrsfFrame::new(CRSF_ADDRESS_RADIO, CRSF_FRAMETYPE_RADIO_ID, vec![0u8; 11]).unwrap();
        assert!(frame.is_extended());
    }
}
