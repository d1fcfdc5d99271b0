use crate::error::DecodeFieldError;
use crate::register::{FieldLayout, FieldSpec, FieldType};
use crate::snapshot::{Snapshot, Value};

/// Result of decoding one register block. Every field of the layout ends up
/// in exactly one of `values` or `errors`.
#[derive(Debug, Default, PartialEq)]
pub struct Decoded {
    pub values: Snapshot,
    pub errors: Vec<DecodeFieldError>,
}

pub fn decode_block(block: &[u16], layout: &FieldLayout) -> Decoded {
    let mut decoded = Decoded::default();

    for (offset, spec) in layout.fields() {
        match decode_field(block, offset, spec) {
            Ok(value) => {
                decoded.values.insert(spec.key.clone(), value);
            }
            Err(err) => decoded.errors.push(err),
        }
    }

    decoded
}

pub fn decode_field(block: &[u16], offset: u16, spec: &FieldSpec) -> Result<Value, DecodeFieldError> {
    let width = spec.field_type.width();
    let start = usize::from(offset);
    let words = block
        .get(start..start + usize::from(width))
        .ok_or_else(|| DecodeFieldError {
            key: spec.key.clone(),
            offset,
            width,
            available: block.len(),
        })?;

    let value = match spec.field_type {
        FieldType::Status(table) => Value::Text(table.label(words[0])),
        FieldType::Numeric { factor, .. } => {
            // words are big-endian, high word first
            let raw = words
                .iter()
                .fold(0_u64, |acc, word| (acc << 16) | u64::from(*word));
            scale(raw, factor)
        }
    };

    Ok(value)
}

fn scale(raw: u64, factor: f64) -> Value {
    if factor == 1.0 {
        Value::Integer(raw)
    } else {
        Value::Float(raw as f64 * factor)
    }
}

/// Decodes a serial number packed two ASCII characters per register.
///
/// Bytes outside 1..=127 are dropped and the result is trimmed. A register
/// that yields nothing falls back to being read as a single printable
/// character. Never fails.
pub fn decode_serial(words: &[u16]) -> String {
    let mut serial = String::with_capacity(words.len() * 2);

    for word in words {
        let chars: Vec<char> = word
            .to_be_bytes()
            .into_iter()
            .filter(|b| (1..=127).contains(b))
            .map(char::from)
            .collect();

        if chars.is_empty() {
            if let Some(c) = char::from_u32(u32::from(*word)).filter(|c| (' '..='~').contains(c)) {
                serial.push(c);
            }
        } else {
            serial.extend(chars);
        }
    }

    serial.trim().to_string()
}
