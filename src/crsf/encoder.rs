//! # CRSF Packet Encoder
//!
//! Encodes RC channels and command requests into CRSF frames addressed to
//! the transmitter module.

use super::crc::{crc8_command, crc8_dvb_s2};
use super::protocol::*;

/// Mask selecting the 11 bits a channel occupies on the wire
const CHANNEL_MASK: u16 = CRSF_CHANNEL_VALUE_MAX;

/// Wrap a type and payload into a complete frame: Address + Length + Type + Payload + CRC
fn build_frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= CRSF_MAX_PAYLOAD_SIZE);

    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(CRSF_ADDRESS_TRANSMITTER);
    frame.push((payload.len() + 2) as u8);
    frame.push(frame_type);
    frame.extend_from_slice(payload);

    // CRC covers Type + Payload
    let crc = crc8_dvb_s2(&frame[2..]);
    frame.push(crc);

    frame
}

/// Encode RC channels into a complete CRSF frame
///
/// # Arguments
///
/// * `channels` - Array of 16 channel values (11-bit: 0-2047)
///
/// # Returns
///
/// * `Vec<u8>` - Complete CRSF frame (26 bytes: address + length + type + 22-byte payload + crc)
///
/// # Examples
///
/// ```
/// use elrs_link::crsf::encoder::pack_channels;
///
/// let channels = [992u16; 16]; // All channels at center
/// let frame = pack_channels(&channels);
/// assert_eq!(frame.len(), 26);
/// ```
pub fn pack_channels(channels: &RcChannels) -> Vec<u8> {
    build_frame(
        CRSF_FRAMETYPE_RC_CHANNELS_PACKED,
        &encode_rc_channels_payload(channels),
    )
}

/// Encode RC channels into payload (22 bytes)
///
/// Packs 16 channels (11 bits each) into 22 bytes using bit packing.
/// Channels are packed as a continuous bitstream, LSB first. Values are
/// not clamped: anything above 2047 keeps only its low 11 bits.
///
/// # Algorithm
///
/// ```text
/// Byte 0: Ch1[0:7]
/// Byte 1: Ch1[8:10] | Ch2[0:4]
/// Byte 2: Ch2[5:10] | Ch3[0:1]
/// ...
/// ```
pub fn encode_rc_channels_payload(channels: &RcChannels) -> [u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE] {
    let mut payload = [0u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE];
    let mut accumulator: u32 = 0;
    let mut bits: usize = 0;
    let mut out = 0;

    for &channel in channels.iter() {
        accumulator |= ((channel & CHANNEL_MASK) as u32) << bits;
        bits += CRSF_CHANNEL_BITS;

        while bits >= 8 {
            payload[out] = accumulator as u8;
            out += 1;
            accumulator >>= 8;
            bits -= 8;
        }
    }

    payload
}

/// Build the "select model ID" command frame.
///
/// Sent to make the module resume its telemetry and timing reports.
///
/// ```text
/// EE 08 32 | EE EA 10 05 <id> <cmd crc> | <crc>
/// ```
pub fn create_model_id_frame(model_id: u8) -> Vec<u8> {
    let mut command = vec![
        CRSF_FRAMETYPE_COMMAND,
        CRSF_ADDRESS_TRANSMITTER,
        CRSF_ADDRESS_RADIO,
        CRSF_COMMAND_SUBCMD_CROSSFIRE,
        CRSF_COMMAND_MODEL_SELECT_ID,
        model_id,
    ];
    command.push(crc8_command(&command));

    build_frame(CRSF_FRAMETYPE_COMMAND, &command[1..])
}

/// Build a broadcast device ping frame (`EE 04 28 00 EA <crc>`).
pub fn create_ping_devices_frame() -> Vec<u8> {
    build_frame(
        CRSF_FRAMETYPE_DEVICE_PING,
        &[CRSF_ADDRESS_BROADCAST, CRSF_ADDRESS_RADIO],
    )
}
