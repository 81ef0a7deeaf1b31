// RTMP data (script message body)

use std::{collections::HashMap, sync::LazyLock};

use crate::amf::{Amf0Value, AmfDecodingCursor};
use crate::error::RtmpResult;

/// RTMP data message
pub struct RtmpData {
    /// Data tag
    pub tag: String,

    /// Arguments
    pub arguments: HashMap<String, Amf0Value>,
}

static RTMP_DATA_CODES: LazyLock<HashMap<String, Vec<String>>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    m.insert(
        "@setDataFrame".to_string(),
        vec!["method".to_string(), "dataObj".to_string()],
    );

    m.insert("onFI".to_string(), vec!["info".to_string()]);

    m.insert("onMetaData".to_string(), vec!["dataObj".to_string()]);

    m.insert(
        "|RtmpSampleAccess".to_string(),
        vec!["bool1".to_string(), "bool2".to_string()],
    );

    m
});

impl RtmpData {
    /// Creates RtmpData
    pub fn new(tag: String) -> RtmpData {
        RtmpData {
            tag,
            arguments: HashMap::new(),
        }
    }

    /// Sets argument
    pub fn set_argument(&mut self, arg_name: String, value: Amf0Value) {
        self.arguments.insert(arg_name, value);
    }

    /// Gets argument
    pub fn get_argument(&self, arg_name: &str) -> Option<&Amf0Value> {
        self.arguments.get(arg_name)
    }

    /// Gets string representation of the data for debug logging
    pub fn to_debug_string(&self) -> String {
        let mut s = format!("{} {}\n", self.tag, "{");

        for (arg_name, arg_val) in &self.arguments {
            s.push_str(&format!(
                "    '{}' = {}\n",
                arg_name,
                arg_val.to_debug_string("    ")
            ));
        }

        s.push('}');

        s
    }

    /// Encodes data
    pub fn encode(&self) -> Vec<u8> {
        let x = Amf0Value::String {
            value: self.tag.clone(),
        };

        let mut buf = x.encode();

        if let Some(arg_list) = RTMP_DATA_CODES.get(&self.tag) {
            for arg_name in arg_list {
                if let Some(val) = self.arguments.get(arg_name) {
                    buf.extend(val.encode());
                }
            }
        }

        buf
    }

    /// Decodes data from bytes
    pub fn decode(data: &[u8]) -> RtmpResult<RtmpData> {
        let mut cursor = AmfDecodingCursor::new(data);

        let tag_amf = Amf0Value::read(&mut cursor, data)?;
        let tag = tag_amf.get_string();

        let mut d = RtmpData::new(tag.to_string());

        if let Some(arg_list) = RTMP_DATA_CODES.get(tag) {
            let mut i: usize = 0;

            while i < arg_list.len() && !cursor.ended() {
                let val = Amf0Value::read(&mut cursor, data)?;

                d.set_argument(arg_list[i].clone(), val);

                i += 1;
            }
        }

        Ok(d)
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_metadata_round_trip() {
        let mut data = RtmpData::new("onMetaData".to_string());

        let mut obj: IndexMap<String, Amf0Value> = IndexMap::new();
        obj.insert("duration".to_string(), Amf0Value::Number { value: 0.0 });

        data.set_argument("dataObj".to_string(), Amf0Value::Object { properties: obj });

        let decoded = RtmpData::decode(&data.encode()).unwrap();

        assert_eq!(decoded.tag, "onMetaData");
        assert!(decoded
            .get_argument("dataObj")
            .unwrap()
            .get_object_property("duration")
            .is_some());
    }
}
