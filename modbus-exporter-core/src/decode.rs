//! Decoding of raw register payloads into numeric values.
//!
//! The payload is the register content as it travels on the wire: each
//! 16-bit register contributes two bytes, high byte first. Word order is
//! applied first (only to 4-byte payloads), then the configured byte order
//! and data type select how the bytes are read.

use tracing::{trace, warn};

use crate::profile::{ByteOrder, DataType, WordOrder};

/// Convert registers into their wire byte representation.
pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_be_bytes()).collect()
}

/// Decode a register payload.
///
/// Returns `0.0` (and logs a warning) when the payload is too short for the
/// requested type.
pub fn decode(raw: &[u8], data_type: DataType, byte_order: ByteOrder, word_order: WordOrder) -> f64 {
    let bytes = reorder_words(raw, word_order);

    trace!(
        raw = ?raw,
        reordered = ?bytes,
        %data_type,
        ?byte_order,
        ?word_order,
        "Decoding register payload"
    );

    let value = match data_type {
        DataType::Word | DataType::Uint16 => read_2(&bytes).map(|b| match byte_order {
            ByteOrder::BigEndian => u16::from_be_bytes(b) as f64,
            ByteOrder::LitEndian => u16::from_le_bytes(b) as f64,
        }),
        DataType::Int16 => read_2(&bytes).map(|b| match byte_order {
            ByteOrder::BigEndian => i16::from_be_bytes(b) as f64,
            ByteOrder::LitEndian => i16::from_le_bytes(b) as f64,
        }),
        DataType::Dword | DataType::Uint32 | DataType::Counter => {
            read_4(&bytes).map(|b| match byte_order {
                ByteOrder::BigEndian => u32::from_be_bytes(b) as f64,
                ByteOrder::LitEndian => u32::from_le_bytes(b) as f64,
            })
        }
        DataType::Int32 => read_4(&bytes).map(|b| match byte_order {
            ByteOrder::BigEndian => i32::from_be_bytes(b) as f64,
            ByteOrder::LitEndian => i32::from_le_bytes(b) as f64,
        }),
        DataType::Float32 => read_4(&bytes).map(|b| match byte_order {
            ByteOrder::BigEndian => f32::from_be_bytes(b) as f64,
            ByteOrder::LitEndian => f32::from_le_bytes(b) as f64,
        }),
    };

    value.unwrap_or_else(|| {
        warn!(
            %data_type,
            len = raw.len(),
            needed = data_type.register_count() * 2,
            "Register payload too short for data type, using 0"
        );
        0.0
    })
}

fn reorder_words(raw: &[u8], word_order: WordOrder) -> Vec<u8> {
    match (raw, word_order) {
        ([a, b, c, d], WordOrder::Swapped) => vec![*c, *d, *a, *b],
        ([a, b, c, d], WordOrder::Mirrored) => vec![*d, *c, *b, *a],
        _ => raw.to_vec(),
    }
}

fn read_2(bytes: &[u8]) -> Option<[u8; 2]> {
    bytes.get(..2)?.try_into().ok()
}

fn read_4(bytes: &[u8]) -> Option<[u8; 4]> {
    bytes.get(..4)?.try_into().ok()
}
