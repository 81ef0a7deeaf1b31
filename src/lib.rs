// RTMP server/client library
// Carries live audio/video (H.264, AAC) and script metadata between
// publishers and players, working both as a client and as a relay server.

pub mod amf;
pub mod api;
pub mod client;
pub mod error;
pub mod flv;
pub mod log;
pub mod rtmp;
pub mod server;
pub mod session;
pub mod stream;

pub use api::{ApiSettings, RtmpApi};
pub use client::{
    AudioTrackInfo, ClientState, RtmpClient, StreamMessage, StreamMessageKind, StreamTrack,
    VideoTrackInfo,
};
pub use error::{RtmpError, RtmpResult};
pub use log::{LogConfig, LogLevel, Logger};
pub use stream::StreamEngineConfig;
