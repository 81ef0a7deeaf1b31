// Per-stream replay cache: sequence headers, metadata and the last GOP

use std::sync::Arc;

use crate::error::RtmpResult;

use super::{PacketKind, PacketQueue, StreamPacket};

/// Default frame capacity of the cached GOP
pub const DEFAULT_GOP_NUM: usize = 1;

/// Replay buffer for one stream: the last metadata packet, the last
/// video and audio sequence headers and the current GOP, anchored at
/// the most recent keyframe and capped at `gop_num` frames
pub struct StreamCache {
    gop_num: usize,

    metadata: Option<Arc<StreamPacket>>,
    video_seq_header: Option<Arc<StreamPacket>>,
    audio_seq_header: Option<Arc<StreamPacket>>,

    gop: Vec<Arc<StreamPacket>>,
}

impl StreamCache {
    /// Creates an empty cache
    ///
    /// # Arguments
    ///
    /// * `gop_num` - Frame capacity of the GOP, anchoring keyframe
    ///   included; the keyframe itself is always kept
    pub fn new(gop_num: usize) -> StreamCache {
        StreamCache {
            gop_num: gop_num.max(1),
            metadata: None,
            video_seq_header: None,
            audio_seq_header: None,
            gop: Vec::new(),
        }
    }

    /// Stores a packet according to its kind:
    ///   - H.264 sequence header: replaces the video sequence header
    ///   - video keyframe: resets the GOP and anchors it
    ///   - other video: appended to the GOP while under capacity
    ///   - AAC sequence header: replaces the audio sequence header
    ///   - metadata: replaces the cached metadata
    /// Other codecs are ignored.
    pub fn save(&mut self, packet: &Arc<StreamPacket>) {
        match packet.kind {
            PacketKind::Video => {
                if packet.is_video_seq_header() {
                    self.video_seq_header = Some(packet.clone());
                    self.gop.clear();
                    return;
                }

                let header = match packet.video_header() {
                    Some(h) => h,
                    None => return,
                };

                if header.codec_id != crate::flv::VIDEO_H264 {
                    return;
                }

                if packet.is_key_frame() {
                    self.gop.clear();
                    self.gop.push(packet.clone());
                } else if !self.gop.is_empty() && self.gop.len() < self.gop_num {
                    self.gop.push(packet.clone());
                }
            }
            PacketKind::Audio => {
                if packet.is_audio_seq_header() {
                    self.audio_seq_header = Some(packet.clone());
                }
            }
            PacketKind::Metadata => {
                self.metadata = Some(packet.clone());
            }
        }
    }

    /// Replays the cache into a joining writer's queue, in order:
    /// metadata, video sequence header, audio sequence header, GOP frames.
    ///
    /// Header pushes must succeed; a full queue fails the replay and the
    /// joining writer. GOP frames are pushed best effort, favoring a
    /// fast join over a complete GOP.
    ///
    /// # Arguments
    ///
    /// * `sink` - Queue of the joining writer
    /// * `include_gop` - False to replay only metadata and headers
    pub fn replay(&self, sink: &PacketQueue, include_gop: bool) -> RtmpResult<()> {
        if let Some(metadata) = &self.metadata {
            sink.push_header(metadata.clone())?;
        }

        if let Some(video_seq_header) = &self.video_seq_header {
            sink.push_header(video_seq_header.clone())?;
        }

        if let Some(audio_seq_header) = &self.audio_seq_header {
            sink.push_header(audio_seq_header.clone())?;
        }

        if include_gop {
            for packet in &self.gop {
                sink.push_cached(packet.clone());
            }
        }

        Ok(())
    }

    /// Last cached metadata, if any
    pub fn metadata(&self) -> Option<&Arc<StreamPacket>> {
        self.metadata.as_ref()
    }

    /// Last video sequence header, if any
    pub fn video_seq_header(&self) -> Option<&Arc<StreamPacket>> {
        self.video_seq_header.as_ref()
    }

    /// Last audio sequence header, if any
    pub fn audio_seq_header(&self) -> Option<&Arc<StreamPacket>> {
        self.audio_seq_header.as_ref()
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flv::{
        AudioTagHeader, VideoTagHeader, AAC_SEQ_HEADER, AVC_NALU, AVC_SEQ_HEADER, FRAME_INTER,
        FRAME_KEY, SOUND_16_BIT, SOUND_AAC, SOUND_RATE_44_KHZ, SOUND_STEREO, VIDEO_H264,
    };
    use crate::stream::{PacketHeader, PacketKind};

    fn video_packet(frame_type: u8, avc_packet_type: u8, timestamp: i64) -> Arc<StreamPacket> {
        Arc::new(StreamPacket {
            kind: PacketKind::Video,
            header: PacketHeader::Video(VideoTagHeader {
                frame_type,
                codec_id: VIDEO_H264,
                avc_packet_type,
                composition_time: 0,
            }),
            timestamp,
            stream_id: 1,
            payload: vec![0x17],
        })
    }

    fn audio_seq_packet() -> Arc<StreamPacket> {
        Arc::new(StreamPacket {
            kind: PacketKind::Audio,
            header: PacketHeader::Audio(AudioTagHeader {
                sound_format: SOUND_AAC,
                sound_rate: SOUND_RATE_44_KHZ,
                sound_size: SOUND_16_BIT,
                sound_type: SOUND_STEREO,
                aac_packet_type: AAC_SEQ_HEADER,
            }),
            timestamp: 0,
            stream_id: 1,
            payload: vec![0xaf, 0x00, 0x12, 0x10],
        })
    }

    fn metadata_packet() -> Arc<StreamPacket> {
        Arc::new(StreamPacket {
            kind: PacketKind::Metadata,
            header: PacketHeader::Metadata,
            timestamp: 0,
            stream_id: 1,
            payload: vec![0x02],
        })
    }

    #[tokio::test]
    async fn test_replay_order() {
        let mut cache = StreamCache::new(25);

        cache.save(&metadata_packet());
        cache.save(&video_packet(FRAME_KEY, AVC_SEQ_HEADER, 0));
        cache.save(&audio_seq_packet());
        cache.save(&video_packet(FRAME_KEY, AVC_NALU, 0));
        cache.save(&video_packet(FRAME_INTER, AVC_NALU, 40));

        let queue = PacketQueue::new(64);

        cache.replay(&queue, true).unwrap();

        // Metadata, video seq, audio seq, then the GOP
        assert!(matches!(queue.pop().await.unwrap().kind, PacketKind::Metadata));
        assert!(queue.pop().await.unwrap().is_video_seq_header());
        assert!(queue.pop().await.unwrap().is_audio_seq_header());

        let first_frame = queue.pop().await.unwrap();
        assert!(first_frame.is_key_frame());

        assert_eq!(queue.pop().await.unwrap().timestamp, 40);
    }

    #[test]
    fn test_gop_resets_on_keyframe() {
        let mut cache = StreamCache::new(25);

        cache.save(&video_packet(FRAME_KEY, AVC_NALU, 0));
        cache.save(&video_packet(FRAME_INTER, AVC_NALU, 40));
        cache.save(&video_packet(FRAME_INTER, AVC_NALU, 80));

        assert_eq!(cache.gop.len(), 3);

        // A new keyframe anchors a fresh GOP, the old frames are gone
        cache.save(&video_packet(FRAME_KEY, AVC_NALU, 1000));
        cache.save(&video_packet(FRAME_INTER, AVC_NALU, 1040));

        assert_eq!(cache.gop.len(), 2);
        assert_eq!(cache.gop[0].timestamp, 1000);
        assert_eq!(cache.gop[1].timestamp, 1040);
    }

    #[test]
    fn test_gop_capacity_counts_keyframe() {
        let mut cache = StreamCache::new(3);

        cache.save(&video_packet(FRAME_KEY, AVC_NALU, 0));

        for i in 1..=5 {
            cache.save(&video_packet(FRAME_INTER, AVC_NALU, (i * 40) as i64));
        }

        // Keyframe plus two inter frames, the rest fell over the cap
        assert_eq!(cache.gop.len(), 3);
        assert!(cache.gop[0].is_key_frame());
        assert_eq!(cache.gop[2].timestamp, 80);
    }

    #[test]
    fn test_gop_keeps_keyframe_even_with_minimal_capacity() {
        let mut cache = StreamCache::new(1);

        cache.save(&video_packet(FRAME_KEY, AVC_NALU, 0));
        cache.save(&video_packet(FRAME_INTER, AVC_NALU, 40));

        assert_eq!(cache.gop.len(), 1);
        assert!(cache.gop[0].is_key_frame());
    }

    #[test]
    fn test_replay_fails_when_headers_do_not_fit() {
        let mut cache = StreamCache::new(1);

        cache.save(&metadata_packet());
        cache.save(&video_packet(FRAME_KEY, AVC_SEQ_HEADER, 0));

        let queue = PacketQueue::new(1);

        assert!(cache.replay(&queue, true).is_err());
    }

    #[test]
    fn test_inter_frames_before_first_keyframe_are_not_cached() {
        let mut cache = StreamCache::new(25);

        cache.save(&video_packet(FRAME_INTER, AVC_NALU, 0));

        assert!(cache.gop.is_empty());
    }
}
