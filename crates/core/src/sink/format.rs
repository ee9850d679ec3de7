//! Value formatting shared by the sinks.
//!
//! The relational store is read by external trace viewers, so these formats
//! are a wire contract: addresses are `0x` + 16 lowercase hex digits, scalar
//! values use two hex digits per byte and raw bytes are little-endian hex.

use crate::model::{AccessValue, MemoryAccess};

/// Format an address as `0x%016x`.
pub fn hex_addr(addr: u64) -> String {
    format!("0x{addr:016x}")
}

/// Lowercase hex of a byte string.
pub fn hex_bytes(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// `(data, value)` columns of a `mem` row.
///
/// Integers of 1, 2, 4 or 8 bytes produce a width-appropriate hex value and
/// their little-endian bytes. Blobs, and integers of any other size, store
/// their bytes in `data` and `"0"` as value.
pub fn mem_columns(access: &MemoryAccess) -> (String, String) {
    match (&access.value, access.size) {
        (AccessValue::Int(value), size @ (1 | 2 | 4 | 8)) => {
            let width = size as usize * 2;
            let masked = if size == 8 { *value } else { value & ((1u64 << (size * 8)) - 1) };
            let data = hex_bytes(&masked.to_le_bytes()[..size as usize]);
            (data, format!("0x{masked:0width$x}"))
        }
        (value, size) => (hex_bytes(&value.to_le_bytes(size)), "0".to_string()),
    }
}

/// Hex of the bytes moved by an access, as printed by the text sink.
pub fn access_value_hex(access: &MemoryAccess) -> String {
    hex_bytes(&access.value.to_le_bytes(access.size))
}
