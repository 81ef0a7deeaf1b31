// AMF0 value

use byteorder::{BigEndian, ByteOrder};
use indexmap::IndexMap;

use crate::error::{RtmpError, RtmpResult};

use super::{AmfDecodingCursor, Amf3Value};

const AMF0_TYPE_NUMBER: u8 = 0x00;
const AMF0_TYPE_BOOL: u8 = 0x01;
const AMF0_TYPE_STRING: u8 = 0x02;
const AMF0_TYPE_OBJECT: u8 = 0x03;
const AMF0_TYPE_NULL: u8 = 0x05;
const AMF0_TYPE_UNDEFINED: u8 = 0x06;
const AMF0_TYPE_REF: u8 = 0x07;
const AMF0_TYPE_ARRAY: u8 = 0x08;
const AMF0_TYPE_STRICT_ARRAY: u8 = 0x0A;
const AMF0_TYPE_DATE: u8 = 0x0B;
const AMF0_TYPE_LONG_STRING: u8 = 0x0C;
const AMF0_TYPE_XML_DOC: u8 = 0x0F;
const AMF0_TYPE_TYPED_OBJ: u8 = 0x10;
const AMF0_TYPE_SWITCH_AMF3: u8 = 0x11;

const AMF0_OBJECT_TERM_CODE: u8 = 0x09;

/// AMF0 compatible value
///
/// Object properties keep their insertion order, so a
/// decode + encode round trip preserves the wire layout
#[derive(Clone)]
pub enum Amf0Value {
    Number {
        value: f64,
    },
    Bool {
        value: bool,
    },
    String {
        value: String,
    },
    Object {
        properties: IndexMap<String, Amf0Value>,
    },
    Null,
    Undefined,
    Ref {
        addr: i64,
    },
    Array {
        items: IndexMap<String, Amf0Value>,
    },
    StrictArray {
        items: Vec<Amf0Value>,
    },
    Date {
        timestamp: f64,
    },
    LongString {
        value: String,
    },
    XmlDocument {
        content: String,
    },
    TypedObject {
        type_name: String,
        properties: IndexMap<String, Amf0Value>,
    },
    SwitchAmf3 {
        value: Amf3Value,
    },
}

impl Amf0Value {
    /// Obtains a string representation of the value
    /// Used for debug logging purposes
    pub fn to_debug_string(&self, tabs: &str) -> String {
        match self {
            Amf0Value::Number { value } => {
                format!("{}", value)
            }
            Amf0Value::Bool { value } => {
                if *value {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            Amf0Value::String { value } => {
                format!("'{}'", value)
            }
            Amf0Value::Object { properties } => Self::object_debug_string(properties, tabs, "{", "}"),
            Amf0Value::Null => "NULL".to_string(),
            Amf0Value::Undefined => "UNDEFINED".to_string(),
            Amf0Value::Ref { addr } => {
                format!("REF#{}", addr)
            }
            Amf0Value::Array { items } => {
                format!("ARRAY {}", Self::object_debug_string(items, tabs, "[", "]"))
            }
            Amf0Value::StrictArray { items } => {
                let mut res = "STRICT_ARRAY [\n".to_string();

                for value in items.iter() {
                    res.push_str(tabs);
                    res.push_str("    ");
                    res.push_str(&value.to_debug_string(&format!("{}    ", tabs)));
                    res.push('\n');
                }

                res.push_str(tabs);
                res.push(']');

                res
            }
            Amf0Value::Date { timestamp } => {
                format!("DATE({})", timestamp)
            }
            Amf0Value::LongString { value } => {
                format!("L'{}'", value)
            }
            Amf0Value::XmlDocument { content } => {
                format!("XML'{}'", content)
            }
            Amf0Value::TypedObject {
                type_name,
                properties,
            } => {
                format!(
                    "{} {}",
                    type_name,
                    Self::object_debug_string(properties, tabs, "{", "}")
                )
            }
            Amf0Value::SwitchAmf3 { value } => format!("AMF3({})", value.to_debug_string(tabs)),
        }
    }

    fn object_debug_string(
        properties: &IndexMap<String, Amf0Value>,
        tabs: &str,
        open: &str,
        close: &str,
    ) -> String {
        let mut res = format!("{}\n", open);

        for (key, value) in properties.iter() {
            res.push_str(tabs);
            res.push_str("    '");
            res.push_str(key);
            res.push_str("' = ");
            res.push_str(&value.to_debug_string(&format!("{}    ", tabs)));
            res.push('\n');
        }

        res.push_str(tabs);
        res.push_str(close);

        res
    }

    // Value check functions:

    /// Returns true if the value is undefined
    pub fn is_undefined(&self) -> bool {
        match self {
            Amf0Value::Undefined => true,
            Amf0Value::SwitchAmf3 { value } => value.is_undefined(),
            _ => false,
        }
    }

    /// Returns true if the value is null
    pub fn is_null(&self) -> bool {
        match self {
            Amf0Value::Null => true,
            Amf0Value::SwitchAmf3 { value } => value.is_null(),
            _ => false,
        }
    }

    /// Returns the value as boolean
    pub fn get_bool(&self) -> bool {
        match self {
            Amf0Value::Bool { value } => *value,
            Amf0Value::Number { value } => *value != 0.0,
            Amf0Value::SwitchAmf3 { value } => value.get_bool(),
            _ => false,
        }
    }

    /// Returns the value as integer
    pub fn get_integer(&self) -> i64 {
        match self {
            Amf0Value::Number { value } => *value as i64,
            Amf0Value::Ref { addr } => *addr,
            Amf0Value::Date { timestamp } => *timestamp as i64,
            Amf0Value::SwitchAmf3 { value } => value.get_integer(),
            _ => 0,
        }
    }

    /// Returns the value as float
    pub fn get_float(&self) -> f64 {
        match self {
            Amf0Value::Number { value } => *value,
            Amf0Value::Ref { addr } => *addr as f64,
            Amf0Value::Date { timestamp } => *timestamp,
            Amf0Value::SwitchAmf3 { value } => value.get_float(),
            _ => 0.0,
        }
    }

    /// Returns the value as string
    pub fn get_string(&self) -> &str {
        match self {
            Amf0Value::String { value } => value.as_str(),
            Amf0Value::LongString { value } => value.as_str(),
            Amf0Value::XmlDocument { content } => content.as_str(),
            Amf0Value::SwitchAmf3 { value } => value.get_string(),
            _ => "",
        }
    }

    /// Returns the value as object (insertion-ordered map)
    pub fn get_object(&self) -> Option<&IndexMap<String, Amf0Value>> {
        match self {
            Amf0Value::Object { properties } => Some(properties),
            Amf0Value::Array { items } => Some(items),
            Amf0Value::TypedObject {
                type_name: _,
                properties,
            } => Some(properties),
            _ => None,
        }
    }

    /// Gets the value of a property (for objects)
    pub fn get_object_property(&self, property_name: &str) -> Option<&Amf0Value> {
        match self.get_object() {
            Some(o) => o.get(property_name),
            None => None,
        }
    }

    /// Returns the value as array (Vec)
    pub fn get_array(&self) -> Option<&Vec<Amf0Value>> {
        match self {
            Amf0Value::StrictArray { items } => Some(items),
            _ => None,
        }
    }

    /// Gets an element of the array, given its index
    pub fn get_array_element(&self, index: usize) -> Option<&Amf0Value> {
        match self.get_array() {
            Some(a) => a.get(index),
            None => None,
        }
    }

    // Encoding functions:

    /// Encodes value into bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Amf0Value::Number { value } => {
                let mut buf = vec![AMF0_TYPE_NUMBER];
                buf.extend(Self::encode_number(*value));
                buf
            }
            Amf0Value::Bool { value } => {
                let mut buf = vec![AMF0_TYPE_BOOL];
                buf.push(if *value { 0x01 } else { 0x00 });
                buf
            }
            Amf0Value::String { value } => {
                let mut buf = vec![AMF0_TYPE_STRING];
                buf.extend(Self::encode_short_string(value));
                buf
            }
            Amf0Value::Object { properties } => {
                let mut buf = vec![AMF0_TYPE_OBJECT];
                buf.extend(Self::encode_object(properties));
                buf
            }
            Amf0Value::Null => vec![AMF0_TYPE_NULL],
            Amf0Value::Undefined => vec![AMF0_TYPE_UNDEFINED],
            Amf0Value::Ref { addr } => {
                let mut buf = vec![AMF0_TYPE_REF, 0x00, 0x00];
                BigEndian::write_u16(&mut buf[1..3], *addr as u16);
                buf
            }
            Amf0Value::Array { items } => {
                let mut buf = vec![AMF0_TYPE_ARRAY, 0x00, 0x00, 0x00, 0x00];
                BigEndian::write_u32(&mut buf[1..5], items.len() as u32);
                buf.extend(Self::encode_object(items));
                buf
            }
            Amf0Value::StrictArray { items } => {
                let mut buf = vec![AMF0_TYPE_STRICT_ARRAY, 0x00, 0x00, 0x00, 0x00];
                BigEndian::write_u32(&mut buf[1..5], items.len() as u32);

                for item in items {
                    buf.extend(item.encode());
                }

                buf
            }
            Amf0Value::Date { timestamp } => {
                let mut buf = vec![AMF0_TYPE_DATE];
                buf.extend(Self::encode_number(*timestamp));
                buf.extend(vec![0x00, 0x00]); // Time zone, always zero
                buf
            }
            Amf0Value::LongString { value } => {
                let mut buf = vec![AMF0_TYPE_LONG_STRING];
                buf.extend(Self::encode_long_string(value));
                buf
            }
            Amf0Value::XmlDocument { content } => {
                let mut buf = vec![AMF0_TYPE_XML_DOC];
                buf.extend(Self::encode_long_string(content));
                buf
            }
            Amf0Value::TypedObject {
                type_name,
                properties,
            } => {
                let mut buf = vec![AMF0_TYPE_TYPED_OBJ];
                buf.extend(Self::encode_short_string(type_name));
                buf.extend(Self::encode_object(properties));
                buf
            }
            Amf0Value::SwitchAmf3 { value } => {
                let mut buf = vec![AMF0_TYPE_SWITCH_AMF3];
                buf.extend(value.encode());
                buf
            }
        }
    }

    /// Encodes number value
    pub fn encode_number(num: f64) -> Vec<u8> {
        let mut buf = vec![0; 8];
        BigEndian::write_f64(&mut buf, num);
        buf
    }

    /// Encodes a string with a 16 bit length prefix
    pub fn encode_short_string(s: &str) -> Vec<u8> {
        let str_bytes = s.as_bytes();
        let mut buf = vec![0x00; 2];
        BigEndian::write_u16(&mut buf, str_bytes.len() as u16);
        buf.extend(str_bytes);
        buf
    }

    /// Encodes a string with a 32 bit length prefix
    pub fn encode_long_string(s: &str) -> Vec<u8> {
        let str_bytes = s.as_bytes();
        let mut buf = vec![0x00; 4];
        BigEndian::write_u32(&mut buf, str_bytes.len() as u32);
        buf.extend(str_bytes);
        buf
    }

    /// Encodes object properties, in insertion order
    pub fn encode_object(o: &IndexMap<String, Amf0Value>) -> Vec<u8> {
        let mut buf = Vec::new();

        for (key, value) in o.iter() {
            buf.extend(Self::encode_short_string(key));
            buf.extend(value.encode());
        }

        buf.extend(Self::encode_short_string(""));
        buf.push(AMF0_OBJECT_TERM_CODE);

        buf
    }

    // Decoding functions:

    /// Reads a value from the cursor
    pub fn read(cursor: &mut AmfDecodingCursor, buffer: &[u8]) -> RtmpResult<Amf0Value> {
        let marker = cursor.read_u8(buffer)?;

        match marker {
            AMF0_TYPE_NUMBER => Ok(Amf0Value::Number {
                value: cursor.read_f64_be(buffer)?,
            }),
            AMF0_TYPE_BOOL => Ok(Amf0Value::Bool {
                value: cursor.read_u8(buffer)? != 0,
            }),
            AMF0_TYPE_STRING => Ok(Amf0Value::String {
                value: cursor.read_short_string(buffer)?,
            }),
            AMF0_TYPE_OBJECT => Ok(Amf0Value::Object {
                properties: Self::read_object(cursor, buffer)?,
            }),
            AMF0_TYPE_NULL => Ok(Amf0Value::Null),
            AMF0_TYPE_UNDEFINED => Ok(Amf0Value::Undefined),
            AMF0_TYPE_REF => Ok(Amf0Value::Ref {
                addr: cursor.read_u16_be(buffer)? as i64,
            }),
            AMF0_TYPE_ARRAY => {
                cursor.skip(4)?; // Associative count, not trusted
                Ok(Amf0Value::Array {
                    items: Self::read_object(cursor, buffer)?,
                })
            }
            AMF0_TYPE_STRICT_ARRAY => {
                let count = cursor.read_u32_be(buffer)? as usize;
                let mut items: Vec<Amf0Value> = Vec::new();

                for _ in 0..count {
                    items.push(Self::read(cursor, buffer)?);
                }

                Ok(Amf0Value::StrictArray { items })
            }
            AMF0_TYPE_DATE => {
                let timestamp = cursor.read_f64_be(buffer)?;
                cursor.skip(2)?; // Time zone
                Ok(Amf0Value::Date { timestamp })
            }
            AMF0_TYPE_LONG_STRING => Ok(Amf0Value::LongString {
                value: cursor.read_long_string(buffer)?,
            }),
            AMF0_TYPE_XML_DOC => Ok(Amf0Value::XmlDocument {
                content: cursor.read_long_string(buffer)?,
            }),
            AMF0_TYPE_TYPED_OBJ => {
                let type_name = cursor.read_short_string(buffer)?;
                let properties = Self::read_object(cursor, buffer)?;
                Ok(Amf0Value::TypedObject {
                    type_name,
                    properties,
                })
            }
            AMF0_TYPE_SWITCH_AMF3 => Ok(Amf0Value::SwitchAmf3 {
                value: Amf3Value::read(cursor, buffer)?,
            }),
            _ => Err(RtmpError::Protocol(format!(
                "unsupported AMF marker: 0x{:02x}",
                marker
            ))),
        }
    }

    /// Reads object properties until the terminator
    fn read_object(
        cursor: &mut AmfDecodingCursor,
        buffer: &[u8],
    ) -> RtmpResult<IndexMap<String, Amf0Value>> {
        let mut properties: IndexMap<String, Amf0Value> = IndexMap::new();

        loop {
            let key = cursor.read_short_string(buffer)?;

            if key.is_empty() {
                let term = cursor.read_u8(buffer)?;

                if term != AMF0_OBJECT_TERM_CODE {
                    return Err(RtmpError::protocol("expected AMF0 object terminator"));
                }

                return Ok(properties);
            }

            let value = Self::read(cursor, buffer)?;

            properties.insert(key, value);
        }
    }

    /// Decodes every value in the buffer, until the end
    pub fn decode_all(buffer: &[u8]) -> RtmpResult<Vec<Amf0Value>> {
        let mut cursor = AmfDecodingCursor::new(buffer);
        let mut values: Vec<Amf0Value> = Vec::new();

        while !cursor.ended() {
            values.push(Self::read(&mut cursor, buffer)?);
        }

        Ok(values)
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Amf0Value) -> Amf0Value {
        let bytes = value.encode();
        let mut cursor = AmfDecodingCursor::new(&bytes);
        let decoded = Amf0Value::read(&mut cursor, &bytes).unwrap();
        assert!(cursor.ended());
        decoded
    }

    #[test]
    fn test_scalar_round_trip() {
        assert_eq!(round_trip(Amf0Value::Number { value: 2.5 }).get_float(), 2.5);
        assert!(round_trip(Amf0Value::Bool { value: true }).get_bool());
        assert_eq!(
            round_trip(Amf0Value::String {
                value: "onMetaData".to_string()
            })
            .get_string(),
            "onMetaData"
        );
        assert!(round_trip(Amf0Value::Null).is_null());
        assert!(round_trip(Amf0Value::Undefined).is_undefined());
        assert_eq!(
            round_trip(Amf0Value::LongString {
                value: "x".repeat(70000)
            })
            .get_string()
            .len(),
            70000
        );
    }

    #[test]
    fn test_object_preserves_insertion_order() {
        let mut properties: IndexMap<String, Amf0Value> = IndexMap::new();

        properties.insert("width".to_string(), Amf0Value::Number { value: 1280.0 });
        properties.insert("height".to_string(), Amf0Value::Number { value: 720.0 });
        properties.insert(
            "encoder".to_string(),
            Amf0Value::String {
                value: "test".to_string(),
            },
        );

        let decoded = round_trip(Amf0Value::Object { properties });

        let keys: Vec<&String> = decoded.get_object().unwrap().keys().collect();

        assert_eq!(keys, vec!["width", "height", "encoder"]);
        assert_eq!(
            decoded.get_object_property("height").unwrap().get_float(),
            720.0
        );
    }

    #[test]
    fn test_strict_array_round_trip() {
        let decoded = round_trip(Amf0Value::StrictArray {
            items: vec![
                Amf0Value::Number { value: 1.0 },
                Amf0Value::String {
                    value: "a".to_string(),
                },
            ],
        });

        assert_eq!(decoded.get_array().unwrap().len(), 2);
        assert_eq!(decoded.get_array_element(0).unwrap().get_integer(), 1);
        assert_eq!(decoded.get_array_element(1).unwrap().get_string(), "a");
    }

    #[test]
    fn test_unknown_marker_is_recoverable_error() {
        let bytes = vec![0x7fu8, 0x00];
        let mut cursor = AmfDecodingCursor::new(&bytes);

        match Amf0Value::read(&mut cursor, &bytes) {
            Err(RtmpError::Protocol(msg)) => {
                assert!(msg.contains("unsupported AMF marker"));
            }
            _ => panic!("expected protocol error"),
        }
    }

    #[test]
    fn test_decode_all_batch() {
        let mut bytes = Amf0Value::String {
            value: "connect".to_string(),
        }
        .encode();
        bytes.extend(Amf0Value::Number { value: 1.0 }.encode());
        bytes.extend(Amf0Value::Null.encode());

        let values = Amf0Value::decode_all(&bytes).unwrap();

        assert_eq!(values.len(), 3);
        assert_eq!(values[0].get_string(), "connect");
        assert_eq!(values[1].get_integer(), 1);
        assert!(values[2].is_null());
    }
}
