//! # CRC8 Implementations
//!
//! Checksums used by CRSF framing.
//!
//! - **Frame CRC**: CRC-8-DVB-S2, polynomial 0xD5, over type + payload
//! - **Command CRC**: polynomial 0xBA, over the inner command of a 0x32 frame
//!
//! Both start from 0x00 with no reflection and no final xor.

/// CRC-8-DVB-S2 polynomial
const CRC8_DVB_S2_POLY: u8 = 0xD5;

/// Polynomial protecting the inner body of command frames
const CRC8_COMMAND_POLY: u8 = 0xBA;

const CRC8_DVB_S2_TABLE: [u8; 256] = generate_crc8_table(CRC8_DVB_S2_POLY);
const CRC8_COMMAND_TABLE: [u8; 256] = generate_crc8_table(CRC8_COMMAND_POLY);

/// Generate a CRC8 lookup table at compile time
const fn generate_crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ poly;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

fn crc8_with_table(table: &[u8; 256], data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| table[(crc ^ byte) as usize])
}

/// Calculate CRC8-DVB-S2 checksum using lookup table
///
/// # Arguments
///
/// * `data` - Byte slice to calculate CRC for (Type + Payload)
///
/// # Examples
///
/// ```
/// use elrs_link::crsf::crc::crc8_dvb_s2;
///
/// let crc = crc8_dvb_s2(&[0x16, 0x00, 0x04]);
/// assert_ne!(crc, 0);
/// ```
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    crc8_with_table(&CRC8_DVB_S2_TABLE, data)
}

/// Calculate the inner checksum of a command frame (polynomial 0xBA)
pub fn crc8_command(data: &[u8]) -> u8 {
    crc8_with_table(&CRC8_COMMAND_TABLE, data)
}

/// Bitwise CRC8 (slow, for verifying the tables)
#[cfg(test)]
fn crc8_slow(poly: u8, data: &[u8]) -> u8 {
    let mut crc: u8 = 0;

    for &byte in data {
        crc ^= byte;

        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ poly;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
