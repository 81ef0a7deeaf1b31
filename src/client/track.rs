// Stream track: per-message-stream I/O for the RTMP client

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};

use crate::amf::{metadata_reform, MetadataReformOp};
use crate::error::{RtmpError, RtmpResult};
use crate::flv::{
    audio_specific_config, avc_decoder_configuration_record, mux_audio_tag_header,
    mux_video_tag_header, nal_unit_type, pack_nalus_length_prefixed, parse_annex_b_nalus,
    AudioTagHeader, VideoTagHeader, AAC_RAW, AAC_SEQ_HEADER, AVC_NALU,
    AVC_SEQ_HEADER, FRAME_INTER, FRAME_KEY, NAL_TYPE_IDR, NAL_TYPE_PPS, NAL_TYPE_SPS, SOUND_16_BIT,
    SOUND_AAC, SOUND_RATE_44_KHZ, SOUND_STEREO, VIDEO_H264,
};
use crate::rtmp::{RTMP_TYPE_AUDIO, RTMP_TYPE_DATA, RTMP_TYPE_VIDEO};

/// Kind of a stream message
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum StreamMessageKind {
    Video,
    Audio,
    Metadata,
}

/// One message read from or written to a stream track
///
/// For video the payload is an Annex-B byte stream on write and a raw
/// NAL unit on read; for audio it is a raw codec frame
#[derive(Clone)]
pub struct StreamMessage {
    /// Message kind
    pub kind: StreamMessageKind,

    /// Presentation timestamp (milliseconds)
    pub pts: i64,

    /// Decoding timestamp (milliseconds)
    pub dts: i64,

    /// Message payload
    pub payload: Vec<u8>,
}

/// Video parameters of a stream track
#[derive(Clone, Copy)]
pub struct VideoTrackInfo {
    /// FLV codec ID (7 for H.264)
    pub codec_id: u32,

    /// Frame width, if known
    pub width: u32,

    /// Frame height, if known
    pub height: u32,
}

/// Audio parameters of a stream track
#[derive(Clone, Copy)]
pub struct AudioTrackInfo {
    /// FLV sound format (10 for AAC)
    pub codec_id: u32,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Bits per sample
    pub data_bit: u32,

    /// Number of channels
    pub channels: u32,
}

/// Outgoing message handed to the client send loop
pub(crate) struct OutboundMessage {
    pub packet_type: u32,
    pub stream_id: u32,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

/// Mutable track state, shared with the client read loop
pub(crate) struct TrackState {
    pub video: Option<VideoTrackInfo>,
    pub audio: Option<AudioTrackInfo>,
    pub first_video_message: bool,
    pub first_audio_message: bool,
}

/// Per-message-stream I/O channel of an RTMP client connection.
///
/// The track holds only the stream ID and the channel capabilities it
/// needs, never the client itself.
pub struct StreamTrack {
    stream_id: u32,
    outbound: mpsc::Sender<OutboundMessage>,
    inbound: Mutex<mpsc::Receiver<StreamMessage>>,
    state: Arc<StdMutex<TrackState>>,
}

impl StreamTrack {
    /// Creates a track bound to a message stream
    pub(crate) fn new(
        stream_id: u32,
        outbound: mpsc::Sender<OutboundMessage>,
        inbound: mpsc::Receiver<StreamMessage>,
        state: Arc<StdMutex<TrackState>>,
    ) -> StreamTrack {
        StreamTrack {
            stream_id,
            outbound,
            inbound: Mutex::new(inbound),
            state,
        }
    }

    /// Message stream ID of this track
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Video parameters. For a play track this is populated once the
    /// first video message and onMetaData arrived.
    pub fn video_info(&self) -> Option<VideoTrackInfo> {
        let state = self.state.lock().unwrap();
        state.video
    }

    /// Audio parameters. For a play track this is populated once the
    /// first audio message arrived.
    pub fn audio_info(&self) -> Option<AudioTrackInfo> {
        let state = self.state.lock().unwrap();
        state.audio
    }

    /// Reads the next message from the track
    ///
    /// Fails with a terminal error once the connection is gone
    pub async fn read_message(&self) -> RtmpResult<StreamMessage> {
        let mut inbound = self.inbound.lock().await;

        match inbound.recv().await {
            Some(msg) => Ok(msg),
            None => Err(RtmpError::Resource("connection closed".to_string())),
        }
    }

    /// Writes a message to the track, applying the publish framing
    /// rules: sequence headers are emitted before the first audio and
    /// video payloads, H.264 frames are repackaged as length-prefixed
    /// NAL units
    pub async fn write_message(&self, msg: &StreamMessage) -> RtmpResult<()> {
        match msg.kind {
            StreamMessageKind::Video => self.write_video_message(msg).await,
            StreamMessageKind::Audio => self.write_audio_message(msg).await,
            StreamMessageKind::Metadata => self.write_metadata_message(msg).await,
        }
    }

    async fn write_video_message(&self, msg: &StreamMessage) -> RtmpResult<()> {
        let video = {
            let state = self.state.lock().unwrap();

            match state.video {
                Some(v) => v,
                None => {
                    return Err(RtmpError::Codec(
                        "video track is not configured".to_string(),
                    ));
                }
            }
        };

        if video.codec_id != VIDEO_H264 as u32 {
            return Err(RtmpError::Codec(format!(
                "unsupported video codec: {}",
                video.codec_id
            )));
        }

        let nalus = parse_annex_b_nalus(&msg.payload);

        if nalus.is_empty() {
            return Err(RtmpError::codec("no NAL units in video message"));
        }

        let first_message = {
            let state = self.state.lock().unwrap();
            state.first_video_message
        };

        if first_message {
            let sps = nalus
                .iter()
                .find(|n| nal_unit_type(n) == NAL_TYPE_SPS)
                .copied();
            let pps = nalus
                .iter()
                .find(|n| nal_unit_type(n) == NAL_TYPE_PPS)
                .copied();

            let (sps, pps) = match (sps, pps) {
                (Some(sps), Some(pps)) => (sps, pps),
                _ => {
                    // The first keyframe must carry SPS and PPS; frames
                    // before that are dropped rather than sent headerless
                    return Ok(());
                }
            };

            let record = avc_decoder_configuration_record(sps, pps)?;

            let header = VideoTagHeader {
                frame_type: FRAME_KEY,
                codec_id: VIDEO_H264,
                avc_packet_type: AVC_SEQ_HEADER,
                composition_time: 0,
            };

            let mut payload = mux_video_tag_header(&header);
            payload.extend(record);

            self.send(RTMP_TYPE_VIDEO, msg.dts, payload).await?;

            let mut state = self.state.lock().unwrap();
            state.first_video_message = false;
        }

        // Package the frame as length-prefixed NAL units

        let is_key = nalus.iter().any(|n| {
            let t = nal_unit_type(n);
            t == NAL_TYPE_IDR || t == NAL_TYPE_SPS || t == NAL_TYPE_PPS
        });

        let header = VideoTagHeader {
            frame_type: if is_key { FRAME_KEY } else { FRAME_INTER },
            codec_id: VIDEO_H264,
            avc_packet_type: AVC_NALU,
            composition_time: (msg.pts - msg.dts) as i32,
        };

        let mut payload = mux_video_tag_header(&header);
        payload.extend(pack_nalus_length_prefixed(&nalus));

        self.send(RTMP_TYPE_VIDEO, msg.dts, payload).await
    }

    async fn write_audio_message(&self, msg: &StreamMessage) -> RtmpResult<()> {
        let audio = {
            let state = self.state.lock().unwrap();

            match state.audio {
                Some(a) => a,
                None => {
                    return Err(RtmpError::Codec(
                        "audio track is not configured".to_string(),
                    ));
                }
            }
        };

        let first_message = {
            let state = self.state.lock().unwrap();
            state.first_audio_message
        };

        if first_message {
            if audio.codec_id == SOUND_AAC as u32 {
                let header = AudioTagHeader {
                    sound_format: SOUND_AAC,
                    sound_rate: SOUND_RATE_44_KHZ,
                    sound_size: SOUND_16_BIT,
                    sound_type: SOUND_STEREO,
                    aac_packet_type: AAC_SEQ_HEADER,
                };

                let mut payload = mux_audio_tag_header(&header);
                payload.extend(audio_specific_config(
                    audio.sample_rate,
                    audio.channels as u8,
                ));

                self.send(RTMP_TYPE_AUDIO, msg.dts, payload).await?;
            }

            let mut state = self.state.lock().unwrap();
            state.first_audio_message = false;
        }

        let header = AudioTagHeader {
            sound_format: audio.codec_id as u8,
            sound_rate: SOUND_RATE_44_KHZ,
            sound_size: SOUND_16_BIT,
            sound_type: SOUND_STEREO,
            aac_packet_type: AAC_RAW,
        };

        let mut payload = mux_audio_tag_header(&header);
        payload.extend(&msg.payload);

        self.send(RTMP_TYPE_AUDIO, msg.dts, payload).await
    }

    async fn write_metadata_message(&self, msg: &StreamMessage) -> RtmpResult<()> {
        // Servers expect onMetaData wrapped as @setDataFrame
        let payload = metadata_reform(&msg.payload, MetadataReformOp::Add)?;

        self.send(RTMP_TYPE_DATA, msg.dts, payload).await
    }

    async fn send(&self, packet_type: u32, timestamp: i64, payload: Vec<u8>) -> RtmpResult<()> {
        let message = OutboundMessage {
            packet_type,
            stream_id: self.stream_id,
            timestamp,
            payload,
        };

        self.outbound
            .send(message)
            .await
            .map_err(|_| RtmpError::Resource("connection closed".to_string()))
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn make_track() -> (StreamTrack, mpsc::Receiver<OutboundMessage>) {
        let (outbound_sender, outbound_receiver) = mpsc::channel(16);
        let (_inbound_sender, inbound_receiver) = mpsc::channel(16);

        let state = Arc::new(StdMutex::new(TrackState {
            video: Some(VideoTrackInfo {
                codec_id: VIDEO_H264 as u32,
                width: 0,
                height: 0,
            }),
            audio: Some(AudioTrackInfo {
                codec_id: SOUND_AAC as u32,
                sample_rate: 44100,
                data_bit: 16,
                channels: 2,
            }),
            first_video_message: true,
            first_audio_message: true,
        }));

        (
            StreamTrack::new(1, outbound_sender, inbound_receiver, state),
            outbound_receiver,
        )
    }

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1e, 0xab, 0x40];
    const PPS: &[u8] = &[0x68, 0xce, 0x3c, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00];

    fn annex_b_keyframe() -> Vec<u8> {
        let mut frame: Vec<u8> = Vec::new();

        for nalu in [SPS, PPS, IDR] {
            frame.extend(&[0, 0, 0, 1]);
            frame.extend(nalu);
        }

        frame
    }

    #[tokio::test]
    async fn test_first_video_message_emits_sequence_header() {
        let (track, mut outbound) = make_track();

        track
            .write_message(&StreamMessage {
                kind: StreamMessageKind::Video,
                pts: 0,
                dts: 0,
                payload: annex_b_keyframe(),
            })
            .await
            .unwrap();

        // Sequence header first
        let seq = outbound.recv().await.unwrap();
        assert_eq!(seq.packet_type, RTMP_TYPE_VIDEO);
        assert_eq!(seq.payload[0], 0x17);
        assert_eq!(seq.payload[1], AVC_SEQ_HEADER);

        // Then the keyframe, length-prefixed
        let frame = outbound.recv().await.unwrap();
        assert_eq!(frame.payload[0], 0x17);
        assert_eq!(frame.payload[1], AVC_NALU);

        let nalus =
            crate::flv::parse_nalus_length_prefixed(&frame.payload[5..]).unwrap();
        assert_eq!(nalus.len(), 3);
        assert_eq!(nalus[2], IDR);
    }

    #[tokio::test]
    async fn test_first_video_without_sps_pps_is_deferred() {
        let (track, mut outbound) = make_track();

        let mut inter_frame: Vec<u8> = vec![0, 0, 0, 1];
        inter_frame.extend(&[0x41, 0x9a, 0x00]);

        track
            .write_message(&StreamMessage {
                kind: StreamMessageKind::Video,
                pts: 0,
                dts: 0,
                payload: inter_frame,
            })
            .await
            .unwrap();

        // Nothing was sent: the frame was dropped waiting for SPS/PPS
        assert!(outbound.try_recv().is_err());
        assert!(track.state.lock().unwrap().first_video_message);
    }

    #[tokio::test]
    async fn test_first_audio_message_emits_aac_config() {
        let (track, mut outbound) = make_track();

        track
            .write_message(&StreamMessage {
                kind: StreamMessageKind::Audio,
                pts: 0,
                dts: 0,
                payload: vec![0x21, 0x10, 0x04],
            })
            .await
            .unwrap();

        let seq = outbound.recv().await.unwrap();
        assert_eq!(seq.packet_type, RTMP_TYPE_AUDIO);
        assert_eq!(seq.payload[0], 0xaf);
        assert_eq!(seq.payload[1], AAC_SEQ_HEADER);
        assert_eq!(&seq.payload[2..], &[0x12, 0x10]);

        let frame = outbound.recv().await.unwrap();
        assert_eq!(frame.payload[1], AAC_RAW);
        assert_eq!(&frame.payload[2..], &[0x21, 0x10, 0x04]);
    }
}
