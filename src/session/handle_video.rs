// Logic to handle video packets

use std::sync::Arc;

use crate::{
    log::Logger,
    log_debug, log_trace,
    rtmp::{RtmpPacket, RTMP_TYPE_VIDEO},
    stream::StreamPacket,
};

use super::{SessionReadState, SessionStream};

/// Handles VIDEO RTMP packet
///
/// # Arguments
///
/// * `logger` - Session logger
/// * `read_state` - State owned by the read loop
/// * `packet` - The packet
///
/// # Return value
///
/// Returns true to continue receiving chunks.
/// Returns false to end the session main loop.
pub async fn handle_rtmp_packet_video(
    logger: &Arc<Logger>,
    read_state: &mut SessionReadState,
    packet: &RtmpPacket,
) -> bool {
    let (stream_handle, liveness) = match &read_state.stream {
        SessionStream::Publishing { handle, liveness } => (handle, liveness),
        _ => {
            log_debug!(logger, "Video packet ignored since it was not publishing");

            return true;
        }
    };

    log_trace!(
        logger,
        format!("VIDEO PACKET: {} bytes", packet.payload.len())
    );

    let stream_packet = match StreamPacket::from_message(
        RTMP_TYPE_VIDEO,
        packet.header.stream_id,
        packet.header.timestamp,
        packet.payload.clone(),
    ) {
        Ok(p) => p,
        Err(e) => {
            // A bad payload drops the packet, the connection survives
            log_debug!(logger, format!("Video packet dropped: {}", e));

            return true;
        }
    };

    liveness.touch();

    if !stream_handle.send_packet(Arc::new(stream_packet)).await {
        log_debug!(logger, "Stream engine is gone, ending session");

        return false;
    }

    true
}
