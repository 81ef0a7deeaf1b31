// Metadata message reform

use crate::error::RtmpResult;

use super::Amf0Value;

const SET_DATA_FRAME: &str = "@setDataFrame";

/// Direction of a metadata reform
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MetadataReformOp {
    /// Insert the "@setDataFrame" prefix (forwarding to a server)
    Add,

    /// Strip the "@setDataFrame" prefix (forwarding to a client)
    Del,
}

/// Re-encodes an onMetaData message, adding or removing the
/// synthetic "@setDataFrame" leading string
///
/// # Arguments
///
/// * `data` - The AMF0 encoded metadata message
/// * `op` - The reform to apply
///
/// # Return value
///
/// The re-encoded message bytes
pub fn metadata_reform(data: &[u8], op: MetadataReformOp) -> RtmpResult<Vec<u8>> {
    let values = Amf0Value::decode_all(data)?;

    let has_prefix = values
        .first()
        .map(|v| v.get_string() == SET_DATA_FRAME)
        .unwrap_or(false);

    let mut out: Vec<u8> = Vec::with_capacity(data.len() + 16);

    match op {
        MetadataReformOp::Add => {
            if has_prefix {
                return Ok(data.to_vec());
            }

            out.extend(
                Amf0Value::String {
                    value: SET_DATA_FRAME.to_string(),
                }
                .encode(),
            );

            for value in &values {
                out.extend(value.encode());
            }
        }
        MetadataReformOp::Del => {
            if !has_prefix {
                return Ok(data.to_vec());
            }

            for value in values.iter().skip(1) {
                out.extend(value.encode());
            }
        }
    }

    Ok(out)
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn sample_metadata() -> Vec<u8> {
        let mut bytes = Amf0Value::String {
            value: "onMetaData".to_string(),
        }
        .encode();

        let mut props: IndexMap<String, Amf0Value> = IndexMap::new();
        props.insert("width".to_string(), Amf0Value::Number { value: 640.0 });

        bytes.extend(Amf0Value::Object { properties: props }.encode());
        bytes
    }

    #[test]
    fn test_metadata_reform_add_del() {
        let original = sample_metadata();

        let with_prefix = metadata_reform(&original, MetadataReformOp::Add).unwrap();

        let values = Amf0Value::decode_all(&with_prefix).unwrap();
        assert_eq!(values[0].get_string(), "@setDataFrame");
        assert_eq!(values[1].get_string(), "onMetaData");

        // Adding twice does not duplicate the prefix
        let again = metadata_reform(&with_prefix, MetadataReformOp::Add).unwrap();
        assert_eq!(again, with_prefix);

        let stripped = metadata_reform(&with_prefix, MetadataReformOp::Del).unwrap();
        assert_eq!(stripped, original);

        // Removing from a message without the prefix is a no-op
        let same = metadata_reform(&original, MetadataReformOp::Del).unwrap();
        assert_eq!(same, original);
    }
}
