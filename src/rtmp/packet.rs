// RTMP packet model

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::{
    RTMP_CHANNEL_AUDIO, RTMP_CHANNEL_DATA, RTMP_CHANNEL_VIDEO, RTMP_CHUNK_TYPE_0,
    RTMP_CHUNK_TYPE_1, RTMP_CHUNK_TYPE_2, RTMP_CHUNK_TYPE_3, RTMP_TYPE_AUDIO, RTMP_TYPE_DATA,
    RTMP_TYPE_FLEX_STREAM, RTMP_TYPE_VIDEO,
};

/// Header of an RTMP packet
#[derive(Clone)]
pub struct RtmpPacketHeader {
    /// Timestamp (absolute, milliseconds)
    pub timestamp: i64,

    /// Packet format
    pub format: u32,

    /// Chunk stream ID
    pub channel_id: u32,

    /// Packet type
    pub packet_type: u32,

    /// Message stream ID
    pub stream_id: u32,

    // Payload length
    pub length: usize,
}

impl RtmpPacketHeader {
    /// Resets the header
    pub fn reset(&mut self) {
        *self = RtmpPacketHeader {
            timestamp: 0,
            format: 0,
            channel_id: 0,
            packet_type: 0,
            stream_id: 0,
            length: 0,
        };
    }
}

/// RTMP packet
#[derive(Clone)]
pub struct RtmpPacket {
    /// Packet header
    pub header: RtmpPacketHeader,

    /// Clock value (Used for extended timestamp)
    pub clock: i64,

    /// Packet payload
    pub payload: Vec<u8>,
}

impl RtmpPacket {
    /// Creates new blank RTMP packet
    pub fn new_blank() -> RtmpPacket {
        RtmpPacket {
            header: RtmpPacketHeader {
                timestamp: 0,
                format: 0,
                channel_id: 0,
                packet_type: 0,
                stream_id: 0,
                length: 0,
            },
            clock: 0,
            payload: Vec::new(),
        }
    }

    /// Resets the payload
    pub fn reset_payload(&mut self) {
        self.payload.truncate(0);
    }

    /// Fully resets the packet
    pub fn reset(&mut self) {
        self.header.reset();
        self.clock = 0;
        self.payload = Vec::new();
    }

    /// Picks the outgoing chunk stream ID for the packet type
    /// Audio goes on its own channel, video and script share one
    pub fn channel_for_type(packet_type: u32, fallback: u32) -> u32 {
        match packet_type {
            RTMP_TYPE_AUDIO => RTMP_CHANNEL_AUDIO,
            RTMP_TYPE_VIDEO => RTMP_CHANNEL_VIDEO,
            RTMP_TYPE_DATA | RTMP_TYPE_FLEX_STREAM => RTMP_CHANNEL_DATA,
            _ => fallback,
        }
    }

    /// Serializes a basic header for a RTMP packet
    /// format - Packet format
    /// channel_id - Packet channel ID
    /// Returns the serialized bytes
    pub fn serialize_basic_header(format: u32, channel_id: u32) -> Vec<u8> {
        if channel_id >= 64 + 256 {
            vec![
                ((format << 6) as u8) | 1,
                ((channel_id - 64) & 0xff) as u8,
                (((channel_id - 64) >> 8) & 0xff) as u8,
            ]
        } else if channel_id >= 64 {
            vec![(format << 6) as u8, ((channel_id - 64) as u8)]
        } else {
            vec![((format << 6) as u8) | (channel_id as u8)]
        }
    }

    /// Serializes the message header of a RTMP packet
    /// Returns the serialized bytes
    pub fn serialize_chunk_message_header(&self, stream_id: u32) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();

        if self.header.format <= RTMP_CHUNK_TYPE_2 {
            let mut b: Vec<u8> = vec![0; 4];

            if self.header.timestamp >= 0xffffff {
                BigEndian::write_u32(&mut b, 0xffffff);
            } else {
                BigEndian::write_u32(&mut b, self.header.timestamp as u32);
            }

            out.extend(&b[1..]);
        }

        if self.header.format <= RTMP_CHUNK_TYPE_1 {
            let mut b: Vec<u8> = vec![0; 4];

            BigEndian::write_u32(&mut b, self.header.length as u32);

            out.extend(&b[1..]);
            out.push(self.header.packet_type as u8);
        }

        if self.header.format == RTMP_CHUNK_TYPE_0 {
            let mut b: Vec<u8> = vec![0; 4];

            LittleEndian::write_u32(&mut b, stream_id);

            out.extend(b);
        }

        out
    }

    /// Creates the chunks for an RTMP packet
    /// out_chunk_size - Size of the output chunks
    pub fn create_chunks(&self, out_chunk_size: usize) -> Vec<u8> {
        self.create_chunks_for_stream(self.header.stream_id, out_chunk_size)
    }

    /// Creates the chunks for an RTMP packet
    /// The first chunk uses format 0, continuations use format 3
    /// stream_id - Message stream ID to stamp on the header
    /// out_chunk_size - Size of the output chunks
    pub fn create_chunks_for_stream(&self, stream_id: u32, out_chunk_size: usize) -> Vec<u8> {
        let chunk_basic_header =
            Self::serialize_basic_header(RTMP_CHUNK_TYPE_0, self.header.channel_id);

        let chunk_basic_header_3 =
            Self::serialize_basic_header(RTMP_CHUNK_TYPE_3, self.header.channel_id);

        let first = RtmpPacket {
            header: RtmpPacketHeader {
                format: RTMP_CHUNK_TYPE_0,
                ..self.header.clone()
            },
            clock: self.clock,
            payload: Vec::new(),
        };

        let chunk_message_header = first.serialize_chunk_message_header(stream_id);

        let use_extended_timestamp = self.header.timestamp >= 0xffffff;

        let payload_size = self.header.length.min(self.payload.len());

        let mut chunks: Vec<u8> =
            Vec::with_capacity(chunk_basic_header.len() + chunk_message_header.len() + payload_size);

        chunks.extend(&chunk_basic_header);
        chunks.extend(&chunk_message_header);

        if use_extended_timestamp {
            let mut b: Vec<u8> = vec![0; 4];
            BigEndian::write_u32(&mut b, self.header.timestamp as u32);
            chunks.extend(b);
        }

        let mut payload_offset: usize = 0;

        while payload_offset < payload_size {
            if payload_offset > 0 {
                chunks.extend(&chunk_basic_header_3);

                if use_extended_timestamp {
                    let mut b: Vec<u8> = vec![0; 4];
                    BigEndian::write_u32(&mut b, self.header.timestamp as u32);
                    chunks.extend(b);
                }
            }

            let chunk_len = out_chunk_size.min(payload_size - payload_offset);

            chunks.extend(&self.payload[payload_offset..payload_offset + chunk_len]);

            payload_offset += chunk_len;
        }

        chunks
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_basic_header_widths() {
        assert_eq!(RtmpPacket::serialize_basic_header(0, 4), vec![0x04]);
        assert_eq!(RtmpPacket::serialize_basic_header(3, 6), vec![0xc6]);
        assert_eq!(RtmpPacket::serialize_basic_header(0, 70), vec![0x00, 6]);
        assert_eq!(
            RtmpPacket::serialize_basic_header(0, 64 + 256 + 5),
            vec![0x01, 5, 1]
        );
    }

    #[test]
    fn test_create_chunks_splits_on_chunk_size() {
        let mut packet = RtmpPacket::new_blank();

        packet.header.channel_id = RTMP_CHANNEL_AUDIO;
        packet.header.packet_type = RTMP_TYPE_AUDIO;
        packet.header.stream_id = 1;
        packet.header.timestamp = 1000;
        packet.payload = vec![0xAA; 10000];
        packet.header.length = packet.payload.len();

        let bytes = packet.create_chunks(4096);

        // basic(1) + message header(11) + 10000 payload + 2 fmt=3 basic headers
        assert_eq!(bytes.len(), 1 + 11 + 10000 + 2);
        assert_eq!(bytes[0], 0x04); // fmt=0, csid=4
        assert_eq!(bytes[1 + 11 + 4096], 0xc4); // fmt=3, csid=4
        assert_eq!(bytes[1 + 11 + 4096 + 1 + 4096], 0xc4);
    }

    #[test]
    fn test_create_chunks_extended_timestamp() {
        let mut packet = RtmpPacket::new_blank();

        packet.header.channel_id = RTMP_CHANNEL_DATA;
        packet.header.packet_type = RTMP_TYPE_VIDEO;
        packet.header.stream_id = 1;
        packet.header.timestamp = 0x01000000;
        packet.payload = vec![0x17, 0x01, 0x00, 0x00, 0x00];
        packet.header.length = packet.payload.len();

        let bytes = packet.create_chunks(4096);

        // 3-byte timestamp field saturated
        assert_eq!(&bytes[1..4], &[0xff, 0xff, 0xff]);

        // Extended field carries the real timestamp, after the 11-byte header
        assert_eq!(
            BigEndian::read_u32(&bytes[1 + 11..1 + 11 + 4]),
            0x01000000
        );
    }
}
