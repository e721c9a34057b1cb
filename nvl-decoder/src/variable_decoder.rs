//! Variable Decoding Engine
//!
//! Reads the payload of an NVL telegram field by field. The schema order is the
//! wire layout: a cursor starts after the header and advances by each
//! variable's fixed width.

use crate::definitions::{ByteOrder, PrimitiveType, VariableListDefinition};
use crate::types::{DecodeError, DecodedValue, RawValue};
use byteorder::{BigEndian, LittleEndian};

/// Variable decoder - extracts typed values from a payload
pub struct VariableDecoder;

impl VariableDecoder {
    /// Decode every variable of `definition` from `payload`
    ///
    /// # Arguments
    /// * `payload` - The complete datagram, header included
    /// * `definition` - The matched list definition
    ///
    /// # Returns
    /// * `Ok(values)` in definition order
    /// * `Err(DecodeError)` if a field would extend past the payload; no
    ///   partial result is returned
    pub fn decode(payload: &[u8], definition: &VariableListDefinition) -> Result<Vec<DecodedValue>, DecodeError> {
        let mut values = Vec::with_capacity(definition.variables.len());
        let mut cursor = definition.header_bytes;

        for (index, spec) in definition.variables.iter().enumerate() {
            let width = spec.kind.width();
            let bytes = payload.get(cursor..cursor + width).ok_or_else(|| DecodeError {
                variable: spec.name.clone(),
                offset: cursor,
                width,
                available: payload.len(),
            })?;

            let raw = Self::read_primitive(bytes, spec.kind, definition.byte_order_of(spec));
            values.push(DecodedValue {
                name: spec.name.clone(),
                raw,
                spec_index: index,
            });
            cursor += width;
        }

        Ok(values)
    }

    /// Interpret exactly `kind.width()` bytes
    fn read_primitive(bytes: &[u8], kind: PrimitiveType, order: ByteOrder) -> RawValue {
        match order {
            ByteOrder::LittleEndian => Self::read_with::<LittleEndian>(bytes, kind),
            ByteOrder::BigEndian => Self::read_with::<BigEndian>(bytes, kind),
        }
    }

    fn read_with<B: byteorder::ByteOrder>(bytes: &[u8], kind: PrimitiveType) -> RawValue {
        match kind {
            PrimitiveType::Bool => RawValue::Bool(bytes[0] != 0),
            PrimitiveType::I8 => RawValue::Int(bytes[0] as i8 as i64),
            PrimitiveType::U8 => RawValue::Int(bytes[0] as i64),
            PrimitiveType::I16 => RawValue::Int(B::read_i16(bytes) as i64),
            PrimitiveType::U16 => RawValue::Int(B::read_u16(bytes) as i64),
            PrimitiveType::I32 => RawValue::Int(B::read_i32(bytes) as i64),
            PrimitiveType::U32 => RawValue::Int(B::read_u32(bytes) as i64),
            PrimitiveType::F32 => RawValue::Float(B::read_f32(bytes) as f64),
            PrimitiveType::F64 => RawValue::Float(B::read_f64(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::VariableSpec;

    fn spec(name: &str, kind: PrimitiveType, byte_order: Option<ByteOrder>) -> VariableSpec {
        VariableSpec {
            name: name.to_string(),
            kind,
            byte_order,
            scale: 1.0,
            precision: kind.default_precision(),
            unit: None,
            class: None,
            topic: None,
            retain: false,
        }
    }

    fn definition(header_bytes: usize, variables: Vec<VariableSpec>) -> VariableListDefinition {
        VariableListDefinition {
            cob_id: 386,
            name: None,
            topic_prefix: "plc".to_string(),
            header_bytes,
            byte_order: ByteOrder::LittleEndian,
            on_change: None,
            variables,
        }
    }

    #[test]
    fn test_real_after_header() {
        // 16 header bytes, then 1.0f32 little-endian
        let mut payload = vec![0u8; 16];
        payload[..4].copy_from_slice(&[0x00, 0x01, 0x85, 0x01]);
        payload.extend_from_slice(&[0x00, 0x00, 0x80, 0x3F]);

        let def = definition(16, vec![spec("level", PrimitiveType::F32, None)]);
        let values = VariableDecoder::decode(&payload, &def).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].raw, RawValue::Float(1.0));
        assert_eq!(values[0].spec_index, 0);
    }

    #[test]
    fn test_sequential_layout() {
        let payload = [
            0x01, // BOOL
            0xFF, // SINT -1
            0x34, 0x12, // UINT 0x1234 LE
            0x00, 0x00, 0x01, 0x00, // DINT 256 BE override
            0xFE, 0xFF, 0xFF, 0xFF, // UDINT LE
        ];
        let def = definition(
            0,
            vec![
                spec("on", PrimitiveType::Bool, None),
                spec("s", PrimitiveType::I8, None),
                spec("w", PrimitiveType::U16, None),
                spec("d", PrimitiveType::I32, Some(ByteOrder::BigEndian)),
                spec("u", PrimitiveType::U32, None),
            ],
        );

        let raws: Vec<RawValue> = VariableDecoder::decode(&payload, &def)
            .unwrap()
            .into_iter()
            .map(|v| v.raw)
            .collect();
        assert_eq!(
            raws,
            vec![
                RawValue::Bool(true),
                RawValue::Int(-1),
                RawValue::Int(0x1234),
                RawValue::Int(256),
                RawValue::Int(0xFFFF_FFFE),
            ]
        );
    }

    #[test]
    fn test_bool_any_nonzero() {
        let def = definition(0, vec![spec("a", PrimitiveType::Bool, None), spec("b", PrimitiveType::Bool, None)]);
        let values = VariableDecoder::decode(&[0x80, 0x00], &def).unwrap();
        assert_eq!(values[0].raw, RawValue::Bool(true));
        assert_eq!(values[1].raw, RawValue::Bool(false));
    }

    #[test]
    fn test_lreal_big_endian() {
        let mut def = definition(0, vec![spec("x", PrimitiveType::F64, None)]);
        def.byte_order = ByteOrder::BigEndian;
        let values = VariableDecoder::decode(&(-2.5f64).to_be_bytes(), &def).unwrap();
        assert_eq!(values[0].raw, RawValue::Float(-2.5));
    }

    #[test]
    fn test_past_end_is_error() {
        let def = definition(2, vec![spec("a", PrimitiveType::U8, None), spec("b", PrimitiveType::I16, None)]);
        let err = VariableDecoder::decode(&[0, 0, 7, 1], &def).unwrap_err();
        assert_eq!(err.variable, "b");
        assert_eq!(err.offset, 3);
        assert_eq!(err.width, 2);
        assert_eq!(err.available, 4);
    }
}
