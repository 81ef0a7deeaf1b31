// Stream actor: one reader fanned out to many writers

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{channel, error::TrySendError, Receiver, Sender};

use crate::log::Logger;
use crate::{log_debug, log_info};

use crate::rtmp::RTMP_STREAM_TICK_TIME;

use super::{PacketKind, PacketQueue, StreamCache, StreamPacket};

/// Default soft write timeout: a peer quiet for longer is dead
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Stream engine configuration
#[derive(Clone)]
pub struct StreamEngineConfig {
    /// Frame capacity of the GOP cached for late joiners,
    /// anchoring keyframe included
    pub gop_num: usize,

    /// Per-writer queue capacity, in packets
    pub queue_capacity: usize,

    /// Liveness window for readers and writers
    pub write_timeout: Duration,
}

impl Default for StreamEngineConfig {
    fn default() -> Self {
        StreamEngineConfig {
            gop_num: super::DEFAULT_GOP_NUM,
            queue_capacity: super::DEFAULT_QUEUE_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Activity tracker shared between a session task and the stream actor
pub struct Liveness {
    last_active: Mutex<Instant>,
    timeout: Duration,
}

impl Liveness {
    /// Creates a tracker that starts alive now
    pub fn new(timeout: Duration) -> Arc<Liveness> {
        Arc::new(Liveness {
            last_active: Mutex::new(Instant::now()),
            timeout,
        })
    }

    /// Records activity
    pub fn touch(&self) {
        let mut last_active = self.last_active.lock().unwrap();
        *last_active = Instant::now();
    }

    /// True while the last activity is within the timeout window
    pub fn alive(&self) -> bool {
        let last_active = self.last_active.lock().unwrap();
        last_active.elapsed() < self.timeout
    }
}

/// Timestamp rebasing state for one writer.
///
/// The base is added to every outgoing timestamp; when a new reader
/// takes over it is bumped to the highest emitted timestamp so the
/// output stays monotonic.
pub struct TimestampRebase {
    inner: Mutex<RebaseState>,
}

struct RebaseState {
    base: i64,
    last_audio: i64,
    last_video: i64,
}

impl TimestampRebase {
    /// Creates a rebase starting at zero
    pub fn new() -> Arc<TimestampRebase> {
        Arc::new(TimestampRebase {
            inner: Mutex::new(RebaseState {
                base: 0,
                last_audio: 0,
                last_video: 0,
            }),
        })
    }

    /// Maps a packet timestamp to the outgoing timestamp and records it
    pub fn output_timestamp(&self, kind: PacketKind, timestamp: i64) -> i64 {
        let mut state = self.inner.lock().unwrap();

        let out = timestamp + state.base;

        match kind {
            PacketKind::Audio => {
                state.last_audio = out.max(state.last_audio);
            }
            PacketKind::Video => {
                state.last_video = out.max(state.last_video);
            }
            PacketKind::Metadata => {}
        }

        out
    }

    /// Bumps the base so the next output timestamp never goes backward
    /// Called when the stream's reader is replaced
    pub fn recalculate(&self) {
        let mut state = self.inner.lock().unwrap();

        state.base = state.base.max(state.last_audio).max(state.last_video);
    }

    /// Current base value
    pub fn base(&self) -> i64 {
        self.inner.lock().unwrap().base
    }
}

/// One-slot close signal, edge triggered: repeat closes never block
#[derive(Clone)]
pub struct CloseSignal {
    sender: Sender<()>,
}

impl CloseSignal {
    /// Creates the signal and its receiving end
    pub fn new() -> (CloseSignal, Receiver<()>) {
        let (sender, receiver) = channel(1);

        (CloseSignal { sender }, receiver)
    }

    /// Fires the signal; a second call is a no-op
    pub fn close(&self) {
        match self.sender.try_send(()) {
            Ok(_) => {}
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Reader registration: the publisher side of a stream
pub struct StreamReaderHandle {
    /// Session ID of the publisher
    pub id: u64,

    /// Activity tracker, touched by the publisher's read loop
    pub liveness: Arc<Liveness>,

    /// Signal to close the publisher session
    pub close: CloseSignal,
}

impl StreamReaderHandle {
    /// True while the publisher showed recent activity
    pub fn alive(&self) -> bool {
        self.liveness.alive()
    }
}

/// Writer registration: the player side of a stream
pub struct StreamWriterHandle {
    /// Session ID of the player
    pub id: u64,

    /// False to skip the GOP replay on admission (cache=clear)
    pub receive_gop: bool,

    /// Queue feeding the player's send task
    pub queue: PacketQueue,

    /// Timestamp rebase shared with the player's send task
    pub rebase: Arc<TimestampRebase>,

    /// Activity tracker, touched by the player's send task
    pub liveness: Arc<Liveness>,

    /// Signal to close the player session
    pub close: CloseSignal,
}

impl StreamWriterHandle {
    /// True while the player showed recent activity
    pub fn alive(&self) -> bool {
        self.liveness.alive()
    }

    /// Closes the writer: queue first so its send task drains out
    pub fn shutdown(&self) {
        self.queue.close();
        self.close.close();
    }
}

/// Inbound channel ends of one stream actor
#[derive(Clone)]
pub struct StreamHandle {
    /// Stream key ("<app>/<name>")
    pub key: String,

    reader_admit: Sender<StreamReaderHandle>,
    writer_admit: Sender<StreamWriterHandle>,
    packets: Sender<Arc<StreamPacket>>,
}

impl StreamHandle {
    /// Registers a reader, replacing the current one
    pub async fn admit_reader(&self, reader: StreamReaderHandle) -> bool {
        self.reader_admit.send(reader).await.is_ok()
    }

    /// Registers a writer
    pub async fn admit_writer(&self, writer: StreamWriterHandle) -> bool {
        self.writer_admit.send(writer).await.is_ok()
    }

    /// Sends a packet produced by the current reader
    pub async fn send_packet(&self, packet: Arc<StreamPacket>) -> bool {
        self.packets.send(packet).await.is_ok()
    }
}

/// Actor state for one stream key
struct RtmpStream {
    key: String,
    cache: StreamCache,
    reader: Option<StreamReaderHandle>,
    writers: Vec<StreamWriterHandle>,
    logger: Logger,
}

/// Channel capacity for the reader-fed packet channel
const PACKET_CHANNEL_CAPACITY: usize = 64;

/// Spawns the actor task for one stream key
///
/// # Arguments
///
/// * `key` - Stream key
/// * `config` - Engine configuration
/// * `on_exit` - Called once when the actor stops, for registry removal
/// * `logger` - Stream logger
pub fn spawn_stream_actor<F>(
    key: String,
    config: StreamEngineConfig,
    on_exit: F,
    logger: Logger,
) -> StreamHandle
where
    F: FnOnce(String) + Send + 'static,
{
    let (reader_admit_sender, mut reader_admit) = channel::<StreamReaderHandle>(1);
    let (writer_admit_sender, mut writer_admit) = channel::<StreamWriterHandle>(16);
    let (packet_sender, mut packets) = channel::<Arc<StreamPacket>>(PACKET_CHANNEL_CAPACITY);

    let handle = StreamHandle {
        key: key.clone(),
        reader_admit: reader_admit_sender,
        writer_admit: writer_admit_sender,
        packets: packet_sender,
    };

    tokio::spawn(async move {
        let mut stream = RtmpStream {
            key: key.clone(),
            cache: StreamCache::new(config.gop_num),
            reader: None,
            writers: Vec::new(),
            logger,
        };

        log_info!(stream.logger, format!("Stream created: {}", stream.key));

        let mut tick = tokio::time::interval(Duration::from_secs(RTMP_STREAM_TICK_TIME));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // First tick fires immediately, skip it

        loop {
            tokio::select! {
                reader = reader_admit.recv() => {
                    match reader {
                        Some(reader) => {
                            stream.replace_reader(reader, &mut packets);
                        }
                        None => break,
                    }
                }
                writer = writer_admit.recv() => {
                    match writer {
                        Some(writer) => {
                            stream.admit_writer(writer);
                        }
                        None => break,
                    }
                }
                packet = packets.recv() => {
                    match packet {
                        Some(packet) => {
                            stream.dispatch_packet(packet);
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    if !stream.liveness_tick() {
                        break;
                    }
                }
            }
        }

        stream.shutdown();

        on_exit(stream.key.clone());

        log_info!(stream.logger, format!("Stream closed: {}", stream.key));
    });

    handle
}

impl RtmpStream {
    /// Installs a new reader. A previous reader is closed, pending
    /// packets are drained and every writer's timestamp base is bumped
    /// so its output stays monotonic across the switch.
    fn replace_reader(
        &mut self,
        reader: StreamReaderHandle,
        packets: &mut Receiver<Arc<StreamPacket>>,
    ) {
        if let Some(old_reader) = self.reader.take() {
            log_info!(
                self.logger,
                format!("Replacing publisher for stream: {}", self.key)
            );

            old_reader.close.close();

            while packets.try_recv().is_ok() {}

            for writer in &self.writers {
                writer.rebase.recalculate();
            }
        }

        self.reader = Some(reader);
    }

    /// Offers the cache to a joining writer, then adds it to the
    /// active set. A failed replay closes the writer instead.
    fn admit_writer(&mut self, writer: StreamWriterHandle) {
        match self.cache.replay(&writer.queue, writer.receive_gop) {
            Ok(_) => {
                log_debug!(
                    self.logger,
                    format!("Writer {} joined stream: {}", writer.id, self.key)
                );

                self.writers.push(writer);
            }
            Err(e) => {
                log_debug!(
                    self.logger,
                    format!("Writer {} rejected from {}: {}", writer.id, self.key, e)
                );

                writer.shutdown();
            }
        }
    }

    /// Caches the packet and fans it out to every writer, in
    /// admission order. A writer whose queue was closed is removed.
    fn dispatch_packet(&mut self, packet: Arc<StreamPacket>) {
        self.cache.save(&packet);

        if let Some(reader) = &self.reader {
            reader.liveness.touch();
        }

        self.writers.retain(|writer| {
            if writer.queue.push(packet.clone()) {
                true
            } else {
                writer.shutdown();
                false
            }
        });
    }

    /// Periodic maintenance: drops stale writers; reports whether the
    /// actor should keep running. The stream dies once the reader is
    /// gone or dead and no writers remain.
    fn liveness_tick(&mut self) -> bool {
        self.writers.retain(|writer| {
            // Stale means the writer stopped draining its queue; a
            // writer with an empty queue is just waiting for packets
            let stale = !writer.alive() && !writer.queue.is_empty();

            if !stale && !writer.queue.is_closed() {
                true
            } else {
                log_debug!(
                    self.logger,
                    format!("Dropping stale writer {} from {}", writer.id, self.key)
                );

                writer.shutdown();
                false
            }
        });

        let reader_alive = match &self.reader {
            Some(reader) => {
                if reader.alive() {
                    true
                } else {
                    log_info!(
                        self.logger,
                        format!("Publisher timed out for stream: {}", self.key)
                    );

                    if let Some(old_reader) = self.reader.take() {
                        old_reader.close.close();
                    }

                    false
                }
            }
            None => false,
        };

        reader_alive || !self.writers.is_empty()
    }

    /// Closes everything still attached on actor exit
    fn shutdown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.close.close();
        }

        for writer in self.writers.drain(..) {
            writer.shutdown();
        }
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flv::{VideoTagHeader, AVC_NALU, FRAME_KEY, VIDEO_H264};
    use crate::stream::PacketHeader;

    fn video_key_packet(timestamp: i64) -> Arc<StreamPacket> {
        Arc::new(StreamPacket {
            kind: PacketKind::Video,
            header: PacketHeader::Video(VideoTagHeader {
                frame_type: FRAME_KEY,
                codec_id: VIDEO_H264,
                avc_packet_type: AVC_NALU,
                composition_time: 0,
            }),
            timestamp,
            stream_id: 1,
            payload: vec![0x17, 0x01, 0, 0, 0],
        })
    }

    #[test]
    fn test_rebase_monotonic_across_reader_switch() {
        let rebase = TimestampRebase::new();

        // First publisher emits up to 5000
        assert_eq!(rebase.output_timestamp(PacketKind::Video, 5000), 5000);
        assert_eq!(rebase.output_timestamp(PacketKind::Audio, 4980), 4980);

        // Reader replaced: new publisher starts near zero
        rebase.recalculate();

        assert_eq!(rebase.base(), 5000);
        assert_eq!(rebase.output_timestamp(PacketKind::Video, 0), 5000);
        assert_eq!(rebase.output_timestamp(PacketKind::Video, 40), 5040);
    }

    #[test]
    fn test_close_signal_is_edge_triggered() {
        let (signal, mut receiver) = CloseSignal::new();

        signal.close();
        signal.close();
        signal.close();

        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_actor_fans_out_to_writer() {
        let handle = spawn_stream_actor(
            "live/test".to_string(),
            StreamEngineConfig::default(),
            |_| {},
            Logger::new_disabled(),
        );

        let (reader_close, _reader_close_receiver) = CloseSignal::new();

        let admitted = handle
            .admit_reader(StreamReaderHandle {
                id: 1,
                liveness: Liveness::new(DEFAULT_WRITE_TIMEOUT),
                close: reader_close,
            })
            .await;
        assert!(admitted);

        let queue = PacketQueue::new(16);
        let (writer_close, _writer_close_receiver) = CloseSignal::new();

        let admitted = handle
            .admit_writer(StreamWriterHandle {
                id: 2,
                receive_gop: true,
                queue: queue.clone(),
                rebase: TimestampRebase::new(),
                liveness: Liveness::new(DEFAULT_WRITE_TIMEOUT),
                close: writer_close,
            })
            .await;
        assert!(admitted);

        // Let the actor process the admissions before feeding packets
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.send_packet(video_key_packet(0)).await);
        assert!(handle.send_packet(video_key_packet(40)).await);

        assert_eq!(queue.pop().await.unwrap().timestamp, 0);
        assert_eq!(queue.pop().await.unwrap().timestamp, 40);
    }

    #[tokio::test]
    async fn test_late_writer_gets_gop_from_cache() {
        let handle = spawn_stream_actor(
            "live/late".to_string(),
            StreamEngineConfig::default(),
            |_| {},
            Logger::new_disabled(),
        );

        let (reader_close, _guard) = CloseSignal::new();

        handle
            .admit_reader(StreamReaderHandle {
                id: 1,
                liveness: Liveness::new(DEFAULT_WRITE_TIMEOUT),
                close: reader_close,
            })
            .await;

        handle.send_packet(video_key_packet(0)).await;
        handle.send_packet(video_key_packet(1000)).await;

        // Let the actor cache the packets before the writer joins
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Writer joins after packets flowed: receives the cached GOP
        let queue = PacketQueue::new(16);
        let (writer_close, _guard2) = CloseSignal::new();

        handle
            .admit_writer(StreamWriterHandle {
                id: 2,
                receive_gop: true,
                queue: queue.clone(),
                rebase: TimestampRebase::new(),
                liveness: Liveness::new(DEFAULT_WRITE_TIMEOUT),
                close: writer_close,
            })
            .await;

        let first = queue.pop().await.unwrap();

        assert!(first.is_key_frame());
        assert_eq!(first.timestamp, 1000);
    }
}
