// Chunk read logic

use std::collections::HashMap;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    time::timeout,
};

use crate::error::{RtmpError, RtmpResult};
use crate::log::Logger;
use crate::log_debug;

use super::{
    get_rtmp_header_size, rtmp_make_ack, rtmp_make_ping_response, rtmp_make_window_ack,
    RtmpPacket, PING_REQUEST, RTMP_ACK_WRAP, RTMP_CHANNEL_PROTOCOL, RTMP_CHUNK_TYPE_0,
    RTMP_CHUNK_TYPE_1, RTMP_CHUNK_TYPE_2, RTMP_CHUNK_TYPE_3, RTMP_DEFAULT_CHUNK_SIZE,
    RTMP_DEFAULT_WINDOW_ACK_SIZE, RTMP_PING_TIMEOUT, RTMP_TYPE_ABORT, RTMP_TYPE_ACKNOWLEDGEMENT,
    RTMP_TYPE_EVENT, RTMP_TYPE_SET_CHUNK_SIZE, RTMP_TYPE_SET_PEER_BANDWIDTH,
    RTMP_TYPE_WINDOW_ACKNOWLEDGEMENT_SIZE,
};

/// Reassembly slot for one chunk stream ID
struct ChunkAssembly {
    /// Message under assembly, the header persists between
    /// messages on the same chunk stream
    packet: RtmpPacket,

    /// Last timestamp delta (formats 1 and 2)
    delta: u32,

    /// True if the current header used an extended timestamp
    extended: bool,

    /// Payload bytes still expected
    remain: usize,
}

impl ChunkAssembly {
    fn new(channel_id: u32) -> ChunkAssembly {
        let mut packet = RtmpPacket::new_blank();
        packet.header.channel_id = channel_id;

        ChunkAssembly {
            packet,
            delta: 0,
            extended: false,
            remain: 0,
        }
    }

    /// Prepares the slot for a new message after the header was parsed
    fn begin_message(&mut self) {
        self.packet.reset_payload();
        self.packet.payload.reserve(self.packet.header.length);
        self.remain = self.packet.header.length;
    }
}

/// Per-connection chunk layer state
pub struct ChunkReadState {
    /// Maximum chunk size the peer sends
    pub remote_chunk_size: usize,

    /// Acknowledgement window advertised by this side
    pub window_ack_size: u32,

    /// Acknowledgement window advertised by the peer
    pub remote_window_ack_size: u32,

    /// Running total of received message bytes, wraps at RTMP_ACK_WRAP
    pub received: u32,

    /// Bytes received since the last acknowledgement was sent
    pub ack_pending: u32,

    /// Reassembly slots, by chunk stream ID
    assemblies: HashMap<u32, ChunkAssembly>,
}

impl ChunkReadState {
    /// Creates the initial state, before any negotiation
    pub fn new() -> ChunkReadState {
        ChunkReadState {
            remote_chunk_size: RTMP_DEFAULT_CHUNK_SIZE,
            window_ack_size: RTMP_DEFAULT_WINDOW_ACK_SIZE,
            remote_window_ack_size: RTMP_DEFAULT_WINDOW_ACK_SIZE,
            received: 0,
            ack_pending: 0,
            assemblies: HashMap::new(),
        }
    }
}

impl Default for ChunkReadState {
    fn default() -> Self {
        ChunkReadState::new()
    }
}

/// Reads a single byte, with a timeout
async fn read_byte<TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin>(
    read_stream: &mut TR,
) -> RtmpResult<u8> {
    match timeout(Duration::from_secs(RTMP_PING_TIMEOUT), read_stream.read_u8()).await {
        Ok(r) => Ok(r?),
        Err(_) => Err(RtmpError::protocol("read timed out")),
    }
}

/// Reads an exact amount of bytes, with a timeout
async fn read_bytes<TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin>(
    read_stream: &mut TR,
    buf: &mut [u8],
) -> RtmpResult<()> {
    match timeout(
        Duration::from_secs(RTMP_PING_TIMEOUT),
        read_stream.read_exact(buf),
    )
    .await
    {
        Ok(r) => {
            r?;
            Ok(())
        }
        Err(_) => Err(RtmpError::protocol("read timed out")),
    }
}

/// Reads RTMP chunks until a full message is assembled
///
/// Protocol control messages (type ids 1..6 on the protocol channel) are
/// handled inline and never returned: chunk-size and window negotiation,
/// abort, acknowledgements, ping request/response.
///
/// # Arguments
///
/// * `read_stream` - IO stream to read bytes
/// * `write_stream` - IO stream to write bytes (acks, ping responses)
/// * `state` - Chunk layer state of the connection
/// * `logger` - Connection logger
///
/// # Return value
///
/// The next complete non-control message
pub async fn read_rtmp_packet<
    TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin,
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin,
>(
    read_stream: &mut TR,
    write_stream: &Mutex<TW>,
    state: &mut ChunkReadState,
    logger: &Logger,
) -> RtmpResult<RtmpPacket> {
    loop {
        // Basic header

        let start_byte = read_byte(read_stream).await?;

        let format = (start_byte >> 6) as u32;

        let mut channel_id = (start_byte & 0x3f) as u32;

        if channel_id == 0 {
            channel_id = 64 + (read_byte(read_stream).await? as u32);
        } else if channel_id == 1 {
            let mut b: [u8; 2] = [0; 2];
            read_bytes(read_stream, &mut b).await?;
            channel_id = 64 + (LittleEndian::read_u16(&b) as u32);
        }

        let assembly = state
            .assemblies
            .entry(channel_id)
            .or_insert_with(|| ChunkAssembly::new(channel_id));

        if assembly.remain > 0 && format != RTMP_CHUNK_TYPE_3 {
            return Err(RtmpError::Protocol(format!(
                "chunk format {} interleaved into unfinished message (csid: {})",
                format, channel_id
            )));
        }

        // Message header

        let header_size = get_rtmp_header_size(format as u8);

        let mut header: Vec<u8> = vec![0; header_size];
        read_bytes(read_stream, &mut header).await?;

        match format {
            RTMP_CHUNK_TYPE_0 => {
                let timestamp = BigEndian::read_u24(&header[0..3]);

                assembly.packet.header.format = format;
                assembly.packet.header.length = BigEndian::read_u24(&header[3..6]) as usize;
                assembly.packet.header.packet_type = header[6] as u32;
                assembly.packet.header.stream_id = LittleEndian::read_u32(&header[7..11]);

                if timestamp == 0xffffff {
                    let mut ext: [u8; 4] = [0; 4];
                    read_bytes(read_stream, &mut ext).await?;
                    assembly.packet.header.timestamp = BigEndian::read_u32(&ext) as i64;
                    assembly.extended = true;
                } else {
                    assembly.packet.header.timestamp = timestamp as i64;
                    assembly.extended = false;
                }

                assembly.begin_message();
            }
            RTMP_CHUNK_TYPE_1 => {
                let delta = BigEndian::read_u24(&header[0..3]);

                assembly.packet.header.format = format;
                assembly.packet.header.length = BigEndian::read_u24(&header[3..6]) as usize;
                assembly.packet.header.packet_type = header[6] as u32;

                let delta = if delta == 0xffffff {
                    let mut ext: [u8; 4] = [0; 4];
                    read_bytes(read_stream, &mut ext).await?;
                    assembly.extended = true;
                    BigEndian::read_u32(&ext)
                } else {
                    assembly.extended = false;
                    delta
                };

                assembly.delta = delta;
                assembly.packet.header.timestamp += delta as i64;

                assembly.begin_message();
            }
            RTMP_CHUNK_TYPE_2 => {
                let delta = BigEndian::read_u24(&header[0..3]);

                assembly.packet.header.format = format;

                let delta = if delta == 0xffffff {
                    let mut ext: [u8; 4] = [0; 4];
                    read_bytes(read_stream, &mut ext).await?;
                    assembly.extended = true;
                    BigEndian::read_u32(&ext)
                } else {
                    assembly.extended = false;
                    delta
                };

                assembly.delta = delta;
                assembly.packet.header.timestamp += delta as i64;

                assembly.begin_message();
            }
            RTMP_CHUNK_TYPE_3 => {
                if assembly.remain == 0 {
                    // A new message reusing the previous header
                    match assembly.packet.header.format {
                        RTMP_CHUNK_TYPE_0 => {
                            if assembly.extended {
                                let mut ext: [u8; 4] = [0; 4];
                                read_bytes(read_stream, &mut ext).await?;
                                assembly.packet.header.timestamp =
                                    BigEndian::read_u32(&ext) as i64;
                            }
                        }
                        _ => {
                            let delta = if assembly.extended {
                                let mut ext: [u8; 4] = [0; 4];
                                read_bytes(read_stream, &mut ext).await?;
                                BigEndian::read_u32(&ext)
                            } else {
                                assembly.delta
                            };

                            assembly.packet.header.timestamp += delta as i64;
                        }
                    }

                    assembly.begin_message();
                } else if assembly.extended {
                    // Continuation chunks re-send the extended timestamp
                    let mut ext: [u8; 4] = [0; 4];
                    read_bytes(read_stream, &mut ext).await?;
                }
            }
            _ => {
                return Err(RtmpError::Protocol(format!(
                    "unknown chunk format: {}",
                    format
                )));
            }
        }

        if assembly.packet.header.length > 0xffffff {
            return Err(RtmpError::Protocol(format!(
                "impossible message length: {}",
                assembly.packet.header.length
            )));
        }

        // Payload

        let size = assembly.remain.min(state.remote_chunk_size);

        if size > 0 {
            let start = assembly.packet.payload.len();
            assembly.packet.payload.resize(start + size, 0);
            read_bytes(read_stream, &mut assembly.packet.payload[start..]).await?;
            assembly.remain -= size;
        }

        if assembly.remain > 0 {
            continue;
        }

        // Message complete

        let packet = assembly.packet.clone();

        acknowledge(write_stream, state, packet.header.length as u32).await?;

        if packet.header.channel_id == RTMP_CHANNEL_PROTOCOL
            && packet.header.stream_id == 0
            && packet.header.packet_type >= RTMP_TYPE_SET_CHUNK_SIZE
            && packet.header.packet_type <= RTMP_TYPE_SET_PEER_BANDWIDTH
        {
            handle_control_packet(&packet, write_stream, state, logger).await?;
            continue;
        }

        return Ok(packet);
    }
}

/// Accounts inbound bytes, emitting an acknowledgement when the
/// window is reached. The running total wraps at RTMP_ACK_WRAP.
async fn acknowledge<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin>(
    write_stream: &Mutex<TW>,
    state: &mut ChunkReadState,
    size: u32,
) -> RtmpResult<()> {
    state.received = state.received.wrapping_add(size);

    if state.received >= RTMP_ACK_WRAP {
        state.received = 0;
    }

    state.ack_pending = state.ack_pending.wrapping_add(size);

    if state.ack_pending >= state.remote_window_ack_size {
        state.ack_pending = 0;

        let ack_bytes = rtmp_make_ack(state.received);

        let mut write_stream_v = write_stream.lock().await;
        write_stream_v.write_all(&ack_bytes).await?;
        drop(write_stream_v);
    }

    Ok(())
}

/// Handles a protocol control message inline
async fn handle_control_packet<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin>(
    packet: &RtmpPacket,
    write_stream: &Mutex<TW>,
    state: &mut ChunkReadState,
    logger: &Logger,
) -> RtmpResult<()> {
    match packet.header.packet_type {
        RTMP_TYPE_SET_CHUNK_SIZE => {
            if packet.payload.len() < 4 {
                return Err(RtmpError::protocol("malformed Set Chunk Size"));
            }

            let size = BigEndian::read_u32(&packet.payload[0..4]) & 0x7fffffff;

            if size == 0 {
                return Err(RtmpError::protocol("peer set chunk size to zero"));
            }

            state.remote_chunk_size = size as usize;

            log_debug!(logger, format!("Remote chunk size set to {}", size));
        }
        RTMP_TYPE_ABORT => {
            if packet.payload.len() < 4 {
                return Err(RtmpError::protocol("malformed Abort"));
            }

            let channel_id = BigEndian::read_u32(&packet.payload[0..4]);

            state.assemblies.remove(&channel_id);

            log_debug!(logger, format!("Aborted chunk stream {}", channel_id));
        }
        RTMP_TYPE_ACKNOWLEDGEMENT => {
            // Informational
        }
        RTMP_TYPE_EVENT => {
            if packet.payload.len() < 2 {
                return Err(RtmpError::protocol("malformed User Control"));
            }

            let event = BigEndian::read_u16(&packet.payload[0..2]);

            if event == PING_REQUEST {
                if packet.payload.len() < 6 {
                    return Err(RtmpError::protocol("malformed Ping Request"));
                }

                let pong = rtmp_make_ping_response(&packet.payload[2..6]);

                let mut write_stream_v = write_stream.lock().await;
                write_stream_v.write_all(&pong).await?;
                drop(write_stream_v);

                log_debug!(logger, "Responded to ping request");
            }
        }
        RTMP_TYPE_WINDOW_ACKNOWLEDGEMENT_SIZE => {
            if packet.payload.len() < 4 {
                return Err(RtmpError::protocol("malformed Window Ack Size"));
            }

            state.remote_window_ack_size = BigEndian::read_u32(&packet.payload[0..4]);

            log_debug!(
                logger,
                format!("Remote window ack size: {}", state.remote_window_ack_size)
            );
        }
        RTMP_TYPE_SET_PEER_BANDWIDTH => {
            if packet.payload.len() < 5 {
                return Err(RtmpError::protocol("malformed Set Peer Bandwidth"));
            }

            let size = BigEndian::read_u32(&packet.payload[0..4]);
            let limit_type = packet.payload[4];

            // A hard limit requires adopting the window and confirming it
            if limit_type == 0 {
                state.window_ack_size = size;

                let window_ack_bytes = rtmp_make_window_ack(size);

                let mut write_stream_v = write_stream.lock().await;
                write_stream_v.write_all(&window_ack_bytes).await?;
                drop(write_stream_v);
            }
        }
        _ => {}
    }

    Ok(())
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::{RTMP_CHANNEL_AUDIO, RTMP_TYPE_AUDIO, RTMP_TYPE_VIDEO};

    async fn read_one(bytes: Vec<u8>, state: &mut ChunkReadState) -> RtmpResult<RtmpPacket> {
        let (mut reader, writer) = tokio::io::simplex(64 * 1024);

        {
            use tokio::io::AsyncWriteExt;
            let mut writer = writer;
            writer.write_all(&bytes).await.unwrap();
        }

        let (_, sink) = tokio::io::simplex(64 * 1024);
        let sink = Mutex::new(sink);
        let logger = Logger::new_disabled();

        read_rtmp_packet(&mut reader, &sink, state, &logger).await
    }

    #[tokio::test]
    async fn test_round_trip_single_chunk() {
        let mut packet = RtmpPacket::new_blank();

        packet.header.channel_id = RTMP_CHANNEL_AUDIO;
        packet.header.packet_type = RTMP_TYPE_AUDIO;
        packet.header.stream_id = 1;
        packet.header.timestamp = 1234;
        packet.payload = vec![0xAF, 0x01, 0x10, 0x20];
        packet.header.length = packet.payload.len();

        let bytes = packet.create_chunks(128);

        let mut state = ChunkReadState::new();
        let decoded = read_one(bytes, &mut state).await.unwrap();

        assert_eq!(decoded.header.packet_type, RTMP_TYPE_AUDIO);
        assert_eq!(decoded.header.stream_id, 1);
        assert_eq!(decoded.header.timestamp, 1234);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[tokio::test]
    async fn test_round_trip_multi_chunk() {
        let mut packet = RtmpPacket::new_blank();

        packet.header.channel_id = RTMP_CHANNEL_AUDIO;
        packet.header.packet_type = RTMP_TYPE_AUDIO;
        packet.header.stream_id = 1;
        packet.header.timestamp = 40;
        packet.payload = (0..10000u32).map(|i| (i % 251) as u8).collect();
        packet.header.length = packet.payload.len();

        // Sender splits at 4096, receiver expects the same after negotiation
        let bytes = packet.create_chunks(4096);

        let mut state = ChunkReadState::new();
        state.remote_chunk_size = 4096;

        let decoded = read_one(bytes, &mut state).await.unwrap();

        assert_eq!(decoded.payload.len(), 10000);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[tokio::test]
    async fn test_round_trip_extended_timestamp() {
        let mut packet = RtmpPacket::new_blank();

        packet.header.channel_id = RTMP_CHANNEL_DATA;
        packet.header.packet_type = RTMP_TYPE_VIDEO;
        packet.header.stream_id = 1;
        packet.header.timestamp = 0x01000000;
        packet.payload = vec![0x27, 0x01, 0, 0, 0, 1, 2, 3];
        packet.header.length = packet.payload.len();

        let bytes = packet.create_chunks(128);

        let mut state = ChunkReadState::new();
        let decoded = read_one(bytes, &mut state).await.unwrap();

        assert_eq!(decoded.header.timestamp, 0x01000000);
        assert_eq!(decoded.payload, packet.payload);
    }

    use crate::rtmp::RTMP_CHANNEL_DATA;

    #[tokio::test]
    async fn test_set_chunk_size_is_consumed_inline() {
        let mut bytes = crate::rtmp::rtmp_make_chunk_size_set_message(4096);

        let mut media = RtmpPacket::new_blank();
        media.header.channel_id = RTMP_CHANNEL_AUDIO;
        media.header.packet_type = RTMP_TYPE_AUDIO;
        media.header.stream_id = 1;
        media.payload = vec![1; 300];
        media.header.length = media.payload.len();

        bytes.extend(media.create_chunks(4096));

        let mut state = ChunkReadState::new();
        let decoded = read_one(bytes, &mut state).await.unwrap();

        // The control message updated the state and was not surfaced
        assert_eq!(state.remote_chunk_size, 4096);
        assert_eq!(decoded.header.packet_type, RTMP_TYPE_AUDIO);
        assert_eq!(decoded.payload.len(), 300);
    }
}
