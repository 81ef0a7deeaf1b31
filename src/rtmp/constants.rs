// RTMP constants

// Handshake

pub const RTMP_VERSION: u8 = 3;
pub const RTMP_SIG_SIZE: usize = 1536;

// Chunk types
pub const RTMP_CHUNK_TYPE_0: u32 = 0; // 11-bytes: timestamp(3) + length(3) + stream type(1) + stream id(4)
pub const RTMP_CHUNK_TYPE_1: u32 = 1; // 7-bytes: delta(3) + length(3) + stream type(1)
pub const RTMP_CHUNK_TYPE_2: u32 = 2; // 3-bytes: delta(3)
pub const RTMP_CHUNK_TYPE_3: u32 = 3; // 0-byte

// RTMP channel types
pub const RTMP_CHANNEL_PROTOCOL: u32 = 2;
pub const RTMP_CHANNEL_INVOKE: u32 = 3;
pub const RTMP_CHANNEL_AUDIO: u32 = 4;
pub const RTMP_CHANNEL_VIDEO: u32 = 6;
pub const RTMP_CHANNEL_DATA: u32 = 6;

/// Gets RTMP message header size from the format bits
pub fn get_rtmp_header_size(format: u8) -> usize {
    match format {
        0 => 11,
        1 => 7,
        2 => 3,
        _ => 0,
    }
}

// Packet types

/* Protocol Control Messages */
pub const RTMP_TYPE_SET_CHUNK_SIZE: u32 = 1;
pub const RTMP_TYPE_ABORT: u32 = 2;
pub const RTMP_TYPE_ACKNOWLEDGEMENT: u32 = 3; // bytes read report
pub const RTMP_TYPE_WINDOW_ACKNOWLEDGEMENT_SIZE: u32 = 5; // server bandwidth
pub const RTMP_TYPE_SET_PEER_BANDWIDTH: u32 = 6; // client bandwidth

/* User Control Messages Event (4) */
pub const RTMP_TYPE_EVENT: u32 = 4;

pub const RTMP_TYPE_AUDIO: u32 = 8;
pub const RTMP_TYPE_VIDEO: u32 = 9;

/* Data Message */
pub const RTMP_TYPE_FLEX_STREAM: u32 = 15; // AMF3
pub const RTMP_TYPE_DATA: u32 = 18; // AMF0

/* Shared Object Message */
pub const RTMP_TYPE_FLEX_OBJECT: u32 = 16; // AMF3
pub const RTMP_TYPE_SHARED_OBJECT: u32 = 19; // AMF0

/* Command Message */
pub const RTMP_TYPE_FLEX_MESSAGE: u32 = 17; // AMF3
pub const RTMP_TYPE_INVOKE: u32 = 20; // AMF0

/* Aggregate Message */
pub const RTMP_TYPE_METADATA: u32 = 22;

// User control events

pub const STREAM_BEGIN: u16 = 0x00;
pub const STREAM_EOF: u16 = 0x01;
pub const STREAM_DRY: u16 = 0x02;
pub const SET_BUFFER_LENGTH: u16 = 0x03;
pub const STREAM_IS_RECORDED: u16 = 0x04;
pub const PING_REQUEST: u16 = 0x06;
pub const PING_RESPONSE: u16 = 0x07;

// Protocol defaults

/// Chunk size both sides start with, until negotiated
pub const RTMP_DEFAULT_CHUNK_SIZE: usize = 128;

/// Initial acknowledgement window, both directions
pub const RTMP_DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;

/// Received byte counter wraps at this value
pub const RTMP_ACK_WRAP: u32 = 0xF0000000;

/// Chunk size the server switches to after connect
pub const RTMP_SERVER_OUT_CHUNK_SIZE: usize = 1024;

// Timers (seconds)

pub const RTMP_PING_TIME: u64 = 60;
pub const RTMP_PING_TIMEOUT: u64 = 30;
pub const RTMP_STREAM_TICK_TIME: u64 = 30;
