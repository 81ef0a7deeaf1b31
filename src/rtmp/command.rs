// RTMP command

use std::{collections::HashMap, sync::LazyLock};

use crate::amf::{Amf0Value, AmfDecodingCursor};
use crate::error::RtmpResult;

/// RTMP command (invoke message body)
pub struct RtmpCommand {
    /// Command
    pub cmd: String,

    /// Arguments
    pub arguments: HashMap<String, Amf0Value>,
}

// Argument names, in wire order, for each recognized command
static RTMP_COMMAND_CODES: LazyLock<HashMap<String, Vec<String>>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    m.insert(
        "_result".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "info".to_string(),
        ],
    );

    m.insert(
        "_error".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "info".to_string(),
            "streamId".to_string(),
        ],
    );

    m.insert(
        "onStatus".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "info".to_string(),
        ],
    );

    m.insert(
        "connect".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "args".to_string(),
        ],
    );

    m.insert(
        "createStream".to_string(),
        vec!["transId".to_string(), "cmdObj".to_string()],
    );

    m.insert(
        "publish".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "streamName".to_string(),
            "type".to_string(),
        ],
    );

    m.insert(
        "play".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "streamName".to_string(),
            "start".to_string(),
            "duration".to_string(),
            "reset".to_string(),
        ],
    );

    m.insert(
        "releaseStream".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "streamName".to_string(),
        ],
    );

    m.insert(
        "FCPublish".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "streamName".to_string(),
        ],
    );

    m.insert(
        "FCUnpublish".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "streamName".to_string(),
        ],
    );

    m.insert(
        "deleteStream".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "streamId".to_string(),
        ],
    );

    m.insert(
        "closeStream".to_string(),
        vec!["transId".to_string(), "cmdObj".to_string()],
    );

    m.insert(
        "receiveAudio".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "bool".to_string(),
        ],
    );

    m.insert(
        "receiveVideo".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "bool".to_string(),
        ],
    );

    m.insert(
        "pause".to_string(),
        vec![
            "transId".to_string(),
            "cmdObj".to_string(),
            "pause".to_string(),
            "ms".to_string(),
        ],
    );

    m
});

impl RtmpCommand {
    /// Creates RtmpCommand
    pub fn new(cmd: String) -> RtmpCommand {
        RtmpCommand {
            cmd,
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

    /// Gets string representation of the command for debug logging
    pub fn to_debug_string(&self) -> String {
        let mut s = format!("{} {}\n", self.cmd, "{");

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

    /// Encodes command
    pub fn encode(&self) -> Vec<u8> {
        let x = Amf0Value::String {
            value: self.cmd.clone(),
        };

        let mut buf = x.encode();

        if let Some(arg_list) = RTMP_COMMAND_CODES.get(&self.cmd) {
            for arg_name in arg_list {
                match self.arguments.get(arg_name) {
                    Some(val) => {
                        buf.extend(val.encode());
                    }
                    None => {
                        buf.extend(Amf0Value::Undefined.encode());
                    }
                }
            }
        }

        buf
    }

    /// Decodes command from bytes
    pub fn decode(data: &[u8]) -> RtmpResult<RtmpCommand> {
        let mut cursor = AmfDecodingCursor::new(data);

        let cmd_amf = Amf0Value::read(&mut cursor, data)?;
        let cmd = cmd_amf.get_string();

        let mut c = RtmpCommand::new(cmd.to_string());

        if let Some(arg_list) = RTMP_COMMAND_CODES.get(cmd) {
            let mut i: usize = 0;

            while i < arg_list.len() && !cursor.ended() {
                let val = Amf0Value::read(&mut cursor, data)?;

                c.set_argument(arg_list[i].clone(), val);

                i += 1;
            }
        }

        Ok(c)
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_connect_command_round_trip() {
        let mut cmd = RtmpCommand::new("connect".to_string());

        cmd.set_argument("transId".to_string(), Amf0Value::Number { value: 1.0 });

        let mut obj: IndexMap<String, Amf0Value> = IndexMap::new();
        obj.insert(
            "app".to_string(),
            Amf0Value::String {
                value: "live".to_string(),
            },
        );
        obj.insert(
            "tcUrl".to_string(),
            Amf0Value::String {
                value: "rtmp://127.0.0.1/live".to_string(),
            },
        );

        cmd.set_argument("cmdObj".to_string(), Amf0Value::Object { properties: obj });

        let bytes = cmd.encode();

        let decoded = RtmpCommand::decode(&bytes).unwrap();

        assert_eq!(decoded.cmd, "connect");
        assert_eq!(decoded.get_argument("transId").unwrap().get_integer(), 1);
        assert_eq!(
            decoded
                .get_argument("cmdObj")
                .unwrap()
                .get_object_property("app")
                .unwrap()
                .get_string(),
            "live"
        );
    }

    #[test]
    fn test_publish_command_round_trip() {
        let mut cmd = RtmpCommand::new("publish".to_string());

        cmd.set_argument("transId".to_string(), Amf0Value::Number { value: 3.0 });
        cmd.set_argument("cmdObj".to_string(), Amf0Value::Null);
        cmd.set_argument(
            "streamName".to_string(),
            Amf0Value::String {
                value: "cam1".to_string(),
            },
        );
        cmd.set_argument(
            "type".to_string(),
            Amf0Value::String {
                value: "live".to_string(),
            },
        );

        let decoded = RtmpCommand::decode(&cmd.encode()).unwrap();

        assert_eq!(decoded.get_argument("streamName").unwrap().get_string(), "cam1");
        assert_eq!(decoded.get_argument("type").unwrap().get_string(), "live");
    }
}
