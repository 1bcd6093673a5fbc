//! Jura BLE wire protocol
//!
//! Pure protocol layer shared by the session and device crates: the nibble
//! cipher used to obfuscate every payload, the GATT characteristic UUIDs and
//! the manufacturer-advertisement decoding that identifies a machine model.
//! No I/O happens here.

pub mod cipher;

use uuid::Uuid;

/// Manufacturer-specific data id carried in Jura advertisements.
pub const MANUFACTURER_ID: u16 = 171;

/// Heartbeat characteristic (read). Byte 0 of the payload is the current
/// rotating cipher key; the read itself keeps the machine from dropping an
/// idle connection.
pub const KEY_UUID: Uuid = Uuid::from_u128(0x5a401531_ab2e_2548_c435_08c300000710);

/// Command characteristic (write with response). Payload is the encrypted
/// 18-byte command frame.
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x5a401525_ab2e_2548_c435_08c300000710);

/// Fixed size of an outbound command frame.
pub const COMMAND_LEN: usize = 18;

/// Extract the machine model code from manufacturer-specific advertisement
/// data (id [`MANUFACTURER_ID`]). Bytes 4..6 hold the code little-endian.
pub fn model_code(manufacturer_data: &[u8]) -> Option<u16> {
    let bytes = manufacturer_data.get(4..6)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}
