// RTMP session status model

/// Role the session settled into after the command handshake
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Publisher,
    Player,
}

/// Shared status of one RTMP session
pub struct RtmpSessionStatus {
    /// Application name, set by the connect command
    pub app: Option<String>,

    /// tcUrl reported by the connect command
    pub tc_url: Option<String>,

    /// Object encoding requested by the client
    pub object_encoding: Option<u32>,

    /// Current role
    pub mode: SessionMode,

    /// Stream key, set on publish or play
    pub stream_key: Option<String>,

    /// Next message stream ID handed out by createStream
    pub next_stream_id: u32,

    /// Message stream ID the session publishes or plays on
    pub current_stream_id: u32,

    /// receiveAudio setting (players)
    pub receive_audio: bool,

    /// receiveVideo setting (players)
    pub receive_video: bool,

    /// Set when the session was killed by the server
    pub killed: bool,
}

impl RtmpSessionStatus {
    /// Creates the initial status
    pub fn new() -> RtmpSessionStatus {
        RtmpSessionStatus {
            app: None,
            tc_url: None,
            object_encoding: None,
            mode: SessionMode::Idle,
            stream_key: None,
            next_stream_id: 1,
            current_stream_id: 0,
            receive_audio: true,
            receive_video: true,
            killed: false,
        }
    }
}

impl Default for RtmpSessionStatus {
    fn default() -> Self {
        RtmpSessionStatus::new()
    }
}
