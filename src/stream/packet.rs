// Media packet model at the stream engine altitude

use crate::error::{RtmpError, RtmpResult};
use crate::flv::{
    parse_audio_tag_header, parse_video_tag_header, AudioTagHeader, VideoTagHeader, SOUND_AAC,
    VIDEO_H264,
};
use crate::rtmp::{RTMP_TYPE_AUDIO, RTMP_TYPE_DATA, RTMP_TYPE_FLEX_STREAM, RTMP_TYPE_VIDEO};

/// Kind of a stream packet
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Video,
    Audio,
    Metadata,
}

/// Codec-specific header of a stream packet
#[derive(Clone, Copy)]
pub enum PacketHeader {
    Video(VideoTagHeader),
    Audio(AudioTagHeader),
    Metadata,
}

/// One media or script message, demuxed from its RTMP message
#[derive(Clone)]
pub struct StreamPacket {
    /// Packet kind
    pub kind: PacketKind,

    /// Codec-specific header
    pub header: PacketHeader,

    /// Decoding timestamp (milliseconds)
    pub timestamp: i64,

    /// Message stream ID the packet arrived on
    pub stream_id: u32,

    /// Raw message payload, FLV tag header included
    pub payload: Vec<u8>,
}

impl StreamPacket {
    /// Demuxes an RTMP message into a stream packet
    ///
    /// # Arguments
    ///
    /// * `packet_type` - RTMP message type id (8, 9, 18 or 15)
    /// * `stream_id` - Message stream ID
    /// * `timestamp` - Message timestamp (milliseconds)
    /// * `payload` - Message payload
    pub fn from_message(
        packet_type: u32,
        stream_id: u32,
        timestamp: i64,
        payload: Vec<u8>,
    ) -> RtmpResult<StreamPacket> {
        match packet_type {
            RTMP_TYPE_AUDIO => {
                let (header, _) = parse_audio_tag_header(&payload)?;

                Ok(StreamPacket {
                    kind: PacketKind::Audio,
                    header: PacketHeader::Audio(header),
                    timestamp,
                    stream_id,
                    payload,
                })
            }
            RTMP_TYPE_VIDEO => {
                let (header, _) = parse_video_tag_header(&payload)?;

                Ok(StreamPacket {
                    kind: PacketKind::Video,
                    header: PacketHeader::Video(header),
                    timestamp,
                    stream_id,
                    payload,
                })
            }
            RTMP_TYPE_DATA | RTMP_TYPE_FLEX_STREAM => Ok(StreamPacket {
                kind: PacketKind::Metadata,
                header: PacketHeader::Metadata,
                timestamp,
                stream_id,
                payload,
            }),
            _ => Err(RtmpError::Protocol(format!(
                "message type {} is not a media message",
                packet_type
            ))),
        }
    }

    /// The RTMP message type id to re-emit this packet with
    /// Metadata always goes out as AMF0 script data
    pub fn message_type_id(&self) -> u32 {
        match self.kind {
            PacketKind::Video => RTMP_TYPE_VIDEO,
            PacketKind::Audio => RTMP_TYPE_AUDIO,
            PacketKind::Metadata => RTMP_TYPE_DATA,
        }
    }

    /// Video tag header, if this is a video packet
    pub fn video_header(&self) -> Option<&VideoTagHeader> {
        match &self.header {
            PacketHeader::Video(h) => Some(h),
            _ => None,
        }
    }

    /// Audio tag header, if this is an audio packet
    pub fn audio_header(&self) -> Option<&AudioTagHeader> {
        match &self.header {
            PacketHeader::Audio(h) => Some(h),
            _ => None,
        }
    }

    /// True for H.264 keyframes (sequence header included)
    pub fn is_key_frame(&self) -> bool {
        match &self.header {
            PacketHeader::Video(h) => h.is_key_frame(),
            _ => false,
        }
    }

    /// True for the H.264 sequence header
    pub fn is_video_seq_header(&self) -> bool {
        match &self.header {
            PacketHeader::Video(h) => h.codec_id == VIDEO_H264 && h.is_seq_header(),
            _ => false,
        }
    }

    /// True for the AAC sequence header
    pub fn is_audio_seq_header(&self) -> bool {
        match &self.header {
            PacketHeader::Audio(h) => h.sound_format == SOUND_AAC && h.is_seq_header(),
            _ => false,
        }
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flv::{AAC_SEQ_HEADER, AVC_SEQ_HEADER, FRAME_KEY};

    #[test]
    fn test_demux_video_message() {
        let payload = vec![0x17, 0x00, 0, 0, 0, 1, 2, 3];

        let packet = StreamPacket::from_message(RTMP_TYPE_VIDEO, 1, 0, payload).unwrap();

        assert!(matches!(packet.kind, PacketKind::Video));
        assert!(packet.is_video_seq_header());
        assert!(packet.is_key_frame());

        let header = packet.video_header().unwrap();
        assert_eq!(header.frame_type, FRAME_KEY);
        assert_eq!(header.avc_packet_type, AVC_SEQ_HEADER);
    }

    #[test]
    fn test_demux_audio_message() {
        let payload = vec![0xaf, AAC_SEQ_HEADER, 0x12, 0x10];

        let packet = StreamPacket::from_message(RTMP_TYPE_AUDIO, 1, 20, payload).unwrap();

        assert!(matches!(packet.kind, PacketKind::Audio));
        assert!(packet.is_audio_seq_header());
        assert_eq!(packet.timestamp, 20);
    }

    #[test]
    fn test_demux_rejects_non_media() {
        assert!(StreamPacket::from_message(20, 1, 0, vec![]).is_err());
    }

    #[test]
    fn test_amf3_script_demuxes_as_metadata() {
        let packet =
            StreamPacket::from_message(RTMP_TYPE_FLEX_STREAM, 1, 0, vec![0x00, 0x02]).unwrap();

        assert!(matches!(packet.kind, PacketKind::Metadata));
        assert_eq!(packet.message_type_id(), RTMP_TYPE_DATA);
    }
}
