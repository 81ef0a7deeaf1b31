// Context types to group parameters

use std::{net::IpAddr, sync::Arc};

use tokio::sync::Mutex;

use crate::stream::{CloseSignal, Liveness, PacketQueue, StreamHandle};

use super::{RtmpSessionStatus, SessionMode};

/// Session context, shared between the session tasks
#[derive(Clone)]
pub struct SessionContext {
    /// Session ID
    pub id: u64,

    /// Client IP address
    pub ip: IpAddr,

    /// Session status
    pub status: Arc<Mutex<RtmpSessionStatus>>,
}

impl SessionContext {
    /// Sets the session as killed
    pub async fn set_killed(&self) {
        let mut status = self.status.lock().await;
        status.killed = true;
    }

    /// Checks if the session is killed
    pub async fn is_killed(&self) -> bool {
        let status = self.status.lock().await;
        status.killed
    }

    /// Current role of the session
    pub async fn mode(&self) -> SessionMode {
        let status = self.status.lock().await;
        status.mode
    }

    /// App name set by connect, if any
    pub async fn app(&self) -> Option<String> {
        let status = self.status.lock().await;
        status.app.clone()
    }

    /// Allocates the next message stream ID
    pub async fn allocate_stream_id(&self) -> u32 {
        let mut status = self.status.lock().await;

        let id = status.next_stream_id;
        status.next_stream_id += 1;

        id
    }

    /// Updates session status for publishing
    ///
    /// # Arguments
    ///
    /// * `stream_key` - Key of the published stream
    /// * `stream_id` - ID of the message stream used for publishing
    pub async fn set_publisher(&self, stream_key: &str, stream_id: u32) {
        let mut status = self.status.lock().await;

        status.mode = SessionMode::Publisher;
        status.stream_key = Some(stream_key.to_string());
        status.current_stream_id = stream_id;
    }

    /// Updates session status for playing
    ///
    /// # Arguments
    ///
    /// * `stream_key` - Key of the played stream
    /// * `stream_id` - ID of the message stream used for playing
    pub async fn set_player(&self, stream_key: &str, stream_id: u32) {
        let mut status = self.status.lock().await;

        status.mode = SessionMode::Player;
        status.stream_key = Some(stream_key.to_string());
        status.current_stream_id = stream_id;
    }

    /// Returns the session to the idle role
    pub async fn set_idle(&self) {
        let mut status = self.status.lock().await;

        status.mode = SessionMode::Idle;
        status.stream_key = None;
    }
}

/// Attachment of a session to the stream engine
pub enum SessionStream {
    /// Not attached
    None,

    /// Publisher: the session feeds packets into the stream
    Publishing {
        handle: StreamHandle,
        liveness: Arc<Liveness>,
    },

    /// Player: the session drains its queue into the socket
    Playing { queue: PacketQueue },
}

/// State owned by the session read loop
pub struct SessionReadState {
    /// Engine attachment
    pub stream: SessionStream,

    /// Chunk size for outgoing messages
    pub out_chunk_size: usize,

    /// Signal that ends the session main loop
    pub close_signal: CloseSignal,
}
