// Bounded per-writer packet queue with the drop policy

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::{RtmpError, RtmpResult};

use super::{PacketKind, StreamPacket};

/// Default queue capacity, in packets
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct QueueState {
    items: VecDeque<Arc<StreamPacket>>,
    closed: bool,

    /// Set when a keyframe was dropped: incoming inter frames are
    /// discarded until the next keyframe, for a clean resume
    keyframe_needed: bool,

    /// Total packets dropped so far
    dropped: u64,
}

struct QueueShared {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

/// Bounded packet queue between the stream actor and one writer.
///
/// The producer never blocks: when the queue is at capacity a drop pass
/// runs, keeping audio while there is head-room and preferring to drop
/// video inter frames over keyframes and sequence headers.
#[derive(Clone)]
pub struct PacketQueue {
    shared: Arc<QueueShared>,
}

impl PacketQueue {
    /// Creates a queue with the given capacity (in packets)
    pub fn new(capacity: usize) -> PacketQueue {
        PacketQueue {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                    keyframe_needed: false,
                    dropped: 0,
                }),
                notify: Notify::new(),
                capacity,
            }),
        }
    }

    /// Current queue length
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().items.len()
    }

    /// True if the queue holds no packets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Packets dropped so far
    pub fn dropped(&self) -> u64 {
        self.shared.state.lock().unwrap().dropped
    }

    /// Pushes a live packet, applying the drop policy on overflow
    ///
    /// # Return value
    ///
    /// False if the queue was closed
    pub fn push(&self, packet: Arc<StreamPacket>) -> bool {
        let mut state = self.shared.state.lock().unwrap();

        if state.closed {
            return false;
        }

        // After a keyframe drop, discard video until the next keyframe
        if state.keyframe_needed && packet.kind == PacketKind::Video {
            if packet.is_key_frame() {
                state.keyframe_needed = false;
            } else {
                state.dropped += 1;
                return true;
            }
        }

        if state.items.len() >= self.shared.capacity {
            Self::drop_pass(&mut state, self.shared.capacity);
        }

        if state.items.len() >= self.shared.capacity {
            // Sequence headers are never dropped, they may exceed the
            // capacity by the few slots they need
            if !packet.is_video_seq_header() && !packet.is_audio_seq_header() {
                // No room: the incoming packet is the victim
                if packet.is_key_frame() {
                    state.keyframe_needed = true;
                }

                state.dropped += 1;
                return true;
            }
        }

        state.items.push_back(packet);
        drop(state);

        self.shared.notify.notify_one();

        true
    }

    /// Walks the queue dropping droppable packets, targeting about 10%
    /// of free space. Keyframes and sequence headers survive; audio is
    /// kept while there is head-room.
    fn drop_pass(state: &mut QueueState, capacity: usize) {
        let target = capacity - capacity / 10;

        let mut kept: VecDeque<Arc<StreamPacket>> = VecDeque::with_capacity(capacity);

        while let Some(packet) = state.items.pop_front() {
            let keep = match packet.kind {
                PacketKind::Audio => packet.is_audio_seq_header() || kept.len() < target,
                PacketKind::Video => {
                    packet.is_video_seq_header() || packet.is_key_frame()
                }
                PacketKind::Metadata => true,
            };

            if keep && kept.len() < capacity {
                kept.push_back(packet);
            } else {
                if packet.is_key_frame() && !packet.is_video_seq_header() {
                    state.keyframe_needed = true;
                }

                state.dropped += 1;
            }
        }

        state.items = kept;
    }

    /// Pushes a cached header packet during replay
    /// Unlike live pushes, a full queue is an error for the caller
    pub fn push_header(&self, packet: Arc<StreamPacket>) -> RtmpResult<()> {
        let mut state = self.shared.state.lock().unwrap();

        if state.closed {
            return Err(RtmpError::Resource("queue closed".to_string()));
        }

        if state.items.len() >= self.shared.capacity {
            return Err(RtmpError::Resource("replay: header channel full".to_string()));
        }

        state.items.push_back(packet);
        drop(state);

        self.shared.notify.notify_one();

        Ok(())
    }

    /// Pushes a cached GOP packet during replay, best effort:
    /// a full queue drops the packet instead of blocking
    pub fn push_cached(&self, packet: Arc<StreamPacket>) {
        let mut state = self.shared.state.lock().unwrap();

        if state.closed || state.items.len() >= self.shared.capacity {
            state.dropped += 1;
            return;
        }

        state.items.push_back(packet);
        drop(state);

        self.shared.notify.notify_one();
    }

    /// Pops the next packet, waiting for one to arrive
    ///
    /// # Return value
    ///
    /// None once the queue is closed and drained
    pub async fn pop(&self) -> Option<Arc<StreamPacket>> {
        loop {
            let notified = self.shared.notify.notified();

            {
                let mut state = self.shared.state.lock().unwrap();

                if let Some(packet) = state.items.pop_front() {
                    return Some(packet);
                }

                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Closes the queue, waking any pending pop
    pub fn close(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.closed = true;
        drop(state);

        self.shared.notify.notify_waiters();
        self.shared.notify.notify_one();
    }

    /// True if the queue was closed
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().unwrap().closed
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flv::{
        mux_video_tag_header, AudioTagHeader, VideoTagHeader, AAC_RAW, AVC_NALU, AVC_SEQ_HEADER,
        FRAME_INTER, FRAME_KEY, SOUND_16_BIT, SOUND_AAC, SOUND_RATE_44_KHZ, SOUND_STEREO,
        VIDEO_H264,
    };
    use crate::stream::{PacketHeader, PacketKind};

    fn video_packet(frame_type: u8, avc_packet_type: u8, timestamp: i64) -> Arc<StreamPacket> {
        let header = VideoTagHeader {
            frame_type,
            codec_id: VIDEO_H264,
            avc_packet_type,
            composition_time: 0,
        };

        Arc::new(StreamPacket {
            kind: PacketKind::Video,
            header: PacketHeader::Video(header),
            timestamp,
            stream_id: 1,
            payload: mux_video_tag_header(&header),
        })
    }

    fn audio_packet(timestamp: i64) -> Arc<StreamPacket> {
        let header = AudioTagHeader {
            sound_format: SOUND_AAC,
            sound_rate: SOUND_RATE_44_KHZ,
            sound_size: SOUND_16_BIT,
            sound_type: SOUND_STEREO,
            aac_packet_type: AAC_RAW,
        };

        Arc::new(StreamPacket {
            kind: PacketKind::Audio,
            header: PacketHeader::Audio(header),
            timestamp,
            stream_id: 1,
            payload: vec![0xaf, AAC_RAW],
        })
    }

    #[tokio::test]
    async fn test_push_pop_in_order() {
        let queue = PacketQueue::new(8);

        assert!(queue.push(audio_packet(0)));
        assert!(queue.push(audio_packet(20)));

        assert_eq!(queue.pop().await.unwrap().timestamp, 0);
        assert_eq!(queue.pop().await.unwrap().timestamp, 20);

        queue.close();
        assert!(queue.pop().await.is_none());
    }

    #[test]
    fn test_overflow_drops_inter_frames_keeps_keyframes() {
        let queue = PacketQueue::new(16);

        // One keyframe then inter frames until overflow
        queue.push(video_packet(FRAME_KEY, AVC_NALU, 0));

        for i in 1..=40 {
            queue.push(video_packet(FRAME_INTER, AVC_NALU, (i * 40) as i64));
        }

        assert!(queue.len() <= 16);
        assert!(queue.dropped() > 0);

        // The keyframe survived the drop pass
        let state = queue.shared.state.lock().unwrap();
        assert!(state
            .items
            .iter()
            .any(|p| p.is_key_frame()));
    }

    #[test]
    fn test_no_inter_frame_before_keyframe_after_drop() {
        let queue = PacketQueue::new(4);

        // Saturate so a keyframe gets dropped
        for i in 0..4 {
            queue.push(video_packet(FRAME_KEY, AVC_NALU, i));
        }

        // Overflow with a keyframe: everything is a keeper, so the
        // incoming keyframe is dropped and the latch raises
        queue.push(video_packet(FRAME_KEY, AVC_NALU, 100));

        assert!(queue.shared.state.lock().unwrap().keyframe_needed);

        let len_before = queue.len();

        // Inter frames are now discarded silently
        queue.push(video_packet(FRAME_INTER, AVC_NALU, 140));
        assert_eq!(queue.len(), len_before);

        // Drain and push the next keyframe: accepted, latch cleared
        while queue.shared.state.lock().unwrap().items.pop_front().is_some() {}

        queue.push(video_packet(FRAME_KEY, AVC_NALU, 200));

        assert_eq!(queue.len(), 1);
        assert!(!queue.shared.state.lock().unwrap().keyframe_needed);
    }

    #[test]
    fn test_sequence_headers_never_dropped() {
        let queue = PacketQueue::new(8);

        queue.push(video_packet(FRAME_KEY, AVC_SEQ_HEADER, 0));

        for i in 0..50 {
            queue.push(video_packet(FRAME_INTER, AVC_NALU, i));
        }

        let state = queue.shared.state.lock().unwrap();
        assert!(state.items.iter().any(|p| p.is_video_seq_header()));
    }

    #[test]
    fn test_push_header_fails_when_full() {
        let queue = PacketQueue::new(2);

        queue.push_header(audio_packet(0)).unwrap();
        queue.push_header(audio_packet(1)).unwrap();

        match queue.push_header(audio_packet(2)) {
            Err(RtmpError::Resource(msg)) => {
                assert!(msg.contains("replay: header channel full"));
            }
            _ => panic!("expected resource error"),
        }
    }

    #[test]
    fn test_push_cached_drops_on_full() {
        let queue = PacketQueue::new(2);

        queue.push_cached(audio_packet(0));
        queue.push_cached(audio_packet(1));
        queue.push_cached(audio_packet(2));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
    }
}
