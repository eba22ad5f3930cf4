//! # CRSF Packet Decoder
//!
//! Validates complete CRSF frames and decodes telemetry payloads.

use super::crc::crc8_dvb_s2;
use super::protocol::*;
use crate::error::{ElrsLinkError, Result};

fn ensure_len(payload: &[u8], expected: usize, what: &str) -> Result<()> {
    if payload.len() < expected {
        return Err(ElrsLinkError::Protocol(format!(
            "{} payload too short: {} bytes (expected {})",
            what,
            payload.len(),
            expected
        )));
    }
    Ok(())
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_i16(bytes: &[u8]) -> i16 {
    i16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_i32(bytes: &[u8]) -> i32 {
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode a complete CRSF frame
///
/// # Arguments
///
/// * `frame` - Complete CRSF frame bytes (address, length, type, payload, crc)
///
/// # Errors
///
/// Returns error if:
/// - Frame is too short
/// - Address byte is unknown
/// - Length byte is out of range
/// - CRC check fails
pub fn decode_frame(frame: &[u8]) -> Result<CrsfFrame> {
    // Minimum frame size: address(1) + length(1) + type(1) + crc(1) = 4 bytes
    if frame.len() < 4 {
        return Err(ElrsLinkError::Protocol("Frame too short".to_string()));
    }

    if !CRSF_FRAME_ADDRESSES.contains(&frame[0]) {
        return Err(ElrsLinkError::Protocol(format!(
            "Invalid address byte: 0x{:02X}",
            frame[0]
        )));
    }

    let length = frame[1];
    if !(CRSF_MIN_FRAME_LENGTH..=CRSF_MAX_FRAME_LENGTH).contains(&length) {
        return Err(ElrsLinkError::Protocol(format!(
            "Invalid frame length: {}",
            length
        )));
    }
    let length = length as usize;

    // Frame should be: address(1) + length(1) + [length bytes]
    // where [length bytes] = type(1) + payload(N) + crc(1)
    if frame.len() < 2 + length {
        return Err(ElrsLinkError::Protocol(format!(
            "Frame too short: expected {} bytes, got {}",
            2 + length,
            frame.len()
        )));
    }

    let received_crc = frame[1 + length];
    let calculated_crc = crc8_dvb_s2(&frame[2..1 + length]);

    if calculated_crc != received_crc {
        return Err(ElrsLinkError::Protocol(format!(
            "CRC mismatch: expected 0x{:02X}, got 0x{:02X}",
            calculated_crc, received_crc
        )));
    }

    CrsfFrame::new(frame[0], frame[2], frame[3..1 + length].to_vec())
}

/// Unpack an RC channels payload (22 bytes) back into 16 values
pub fn unpack_channels(payload: &[u8]) -> Result<RcChannels> {
    ensure_len(payload, CRSF_RC_CHANNELS_PAYLOAD_SIZE, "RC channels")?;

    let mut channels = [0u16; CRSF_NUM_CHANNELS];
    let mut accumulator: u32 = 0;
    let mut bits: usize = 0;
    let mut bytes = payload.iter();

    for channel in channels.iter_mut() {
        while bits < CRSF_CHANNEL_BITS {
            // Length checked above, 22 bytes hold exactly 176 bits
            let byte = bytes.next().copied().unwrap_or(0);
            accumulator |= (byte as u32) << bits;
            bits += 8;
        }
        *channel = (accumulator as u16) & CRSF_CHANNEL_VALUE_MAX;
        accumulator >>= CRSF_CHANNEL_BITS;
        bits -= CRSF_CHANNEL_BITS;
    }

    Ok(channels)
}

/// Decode Link Statistics telemetry packet (10 bytes)
pub fn decode_link_statistics(payload: &[u8]) -> Result<LinkStatistics> {
    ensure_len(payload, CRSF_LINK_STATS_PAYLOAD_SIZE, "Link stats")?;

    Ok(LinkStatistics {
        uplink_rssi_1: payload[0],
        uplink_rssi_2: payload[1],
        uplink_lq: payload[2],
        uplink_snr: payload[3] as i8,
        active_antenna: payload[4],
        rf_mode: payload[5],
        uplink_tx_power: payload[6],
        downlink_rssi: payload[7],
        downlink_lq: payload[8],
        downlink_snr: payload[9] as i8,
    })
}

/// Decode Battery Sensor telemetry packet (8 bytes)
pub fn decode_battery_sensor(payload: &[u8]) -> Result<BatterySensor> {
    ensure_len(payload, CRSF_BATTERY_SENSOR_PAYLOAD_SIZE, "Battery sensor")?;

    // Voltage: 2 bytes, big-endian, in deci-volts
    let voltage = be_u16(&payload[0..2]) as f32 / 10.0;

    // Current: 2 bytes, big-endian, in deci-amps
    let current = be_u16(&payload[2..4]) as f32 / 10.0;

    // Capacity: 3 bytes, big-endian, in mAh
    let capacity_used = u32::from_be_bytes([0, payload[4], payload[5], payload[6]]);

    Ok(BatterySensor {
        voltage,
        current,
        capacity_used,
        remaining_percent: payload[7],
    })
}

/// Decode GPS telemetry packet (15 bytes)
pub fn decode_gps(payload: &[u8]) -> Result<GpsData> {
    ensure_len(payload, CRSF_GPS_PAYLOAD_SIZE, "GPS")?;

    Ok(GpsData {
        // degrees × 10^7
        latitude: be_i32(&payload[0..4]) as f64 / 10_000_000.0,
        longitude: be_i32(&payload[4..8]) as f64 / 10_000_000.0,
        // km/h × 10
        ground_speed: be_u16(&payload[8..10]) as f32 / 10.0,
        // degrees × 100
        heading: be_u16(&payload[10..12]) as f32 / 100.0,
        // meters + 1000
        altitude: be_u16(&payload[12..14]) as i32 - 1000,
        satellites: payload[14],
    })
}

/// Decode Attitude telemetry packet (6 bytes, radians × 10000)
pub fn decode_attitude(payload: &[u8]) -> Result<Attitude> {
    ensure_len(payload, CRSF_ATTITUDE_PAYLOAD_SIZE, "Attitude")?;

    Ok(Attitude {
        pitch: be_i16(&payload[0..2]) as f32 / 10_000.0,
        roll: be_i16(&payload[2..4]) as f32 / 10_000.0,
        yaw: be_i16(&payload[4..6]) as f32 / 10_000.0,
    })
}

/// Decode a variometer packet (vertical speed in cm/s)
pub fn decode_variometer(payload: &[u8]) -> Result<Variometer> {
    ensure_len(payload, CRSF_VARIO_PAYLOAD_SIZE, "Variometer")?;

    Ok(Variometer {
        vertical_speed: be_i16(&payload[0..2]) as f32 / 100.0,
    })
}

/// Unpack the barometric altitude field.
///
/// With the top bit set the low 15 bits are whole meters, otherwise the
/// value is decimeters offset by 10000.
pub fn barometer_altitude(raw: u16) -> f32 {
    if raw & 0x8000 != 0 {
        (raw & 0x7FFF) as f32
    } else {
        (raw as i32 - 10_000) as f32 / 10.0
    }
}

/// Decode a barometric altitude packet without vertical speed
pub fn decode_barometer(payload: &[u8]) -> Result<Barometer> {
    ensure_len(payload, CRSF_BARO_ALTITUDE_PAYLOAD_SIZE, "Barometer")?;

    Ok(Barometer {
        altitude: barometer_altitude(be_u16(&payload[0..2])),
    })
}

/// Decode a barometric altitude packet carrying vertical speed (cm/s)
pub fn decode_barometer_variometer(payload: &[u8]) -> Result<BarometerVariometer> {
    ensure_len(payload, CRSF_BARO_VARIO_PAYLOAD_SIZE, "Barometer/variometer")?;

    Ok(BarometerVariometer {
        altitude: barometer_altitude(be_u16(&payload[0..2])),
        vertical_speed: be_i16(&payload[2..4]) as f32 / 100.0,
    })
}

/// Decode receiver-side link statistics
pub fn decode_link_rx(payload: &[u8]) -> Result<LinkRx> {
    ensure_len(payload, CRSF_LINK_RX_PAYLOAD_SIZE, "Link RX")?;

    Ok(LinkRx {
        rssi_dbm: payload[0],
        rssi_percent: payload[1],
        link_quality: payload[2],
        snr: payload[3] as i8,
        rf_power_dbm: payload[4],
    })
}

/// Decode transmitter-side link statistics
pub fn decode_link_tx(payload: &[u8]) -> Result<LinkTx> {
    ensure_len(payload, CRSF_LINK_TX_PAYLOAD_SIZE, "Link TX")?;

    Ok(LinkTx {
        rssi_dbm: payload[0],
        rssi_percent: payload[1],
        link_quality: payload[2],
        snr: payload[3] as i8,
        rf_power_dbm: payload[4],
        fps: payload[5] as u16 * 10,
    })
}

/// Decode a flight mode string (NUL terminated)
pub fn decode_flight_mode(payload: &[u8]) -> Result<String> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    Ok(String::from_utf8_lossy(&payload[..end]).into_owned())
}

/// Decode the timing report carried by a radio ID frame.
///
/// Returns `Ok(None)` for radio ID frames with any other subtype.
pub fn decode_rate_sync(payload: &[u8]) -> Result<Option<RateSync>> {
    // dest(1) + origin(1) + subtype(1)
    ensure_len(payload, 3, "Radio ID")?;
    if payload[2] != CRSF_RADIO_ID_SUBTYPE_TIMING {
        return Ok(None);
    }
    ensure_len(payload, CRSF_TIMING_SYNC_PAYLOAD_SIZE, "Timing sync")?;

    Ok(Some(RateSync {
        rate: be_i32(&payload[3..7]),
        offset: be_i32(&payload[7..11]),
    }))
}

/// Build a complete, valid frame from a type and payload (test helper)
#[cfg(test)]
pub(crate) fn encode_test_frame(address: u8, frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![address, (payload.len() + 2) as u8, frame_type];
    frame.extend_from_slice(payload);
    let crc = crc8_dvb_s2(&frame[2..]);
    frame.push(crc);
    frame
}
