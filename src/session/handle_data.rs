// Logic to handle data (script) packets

use std::sync::Arc;

use crate::{
    log::Logger,
    log_debug,
    rtmp::{rtmp_build_metadata, RtmpData, RtmpPacket, RTMP_TYPE_DATA, RTMP_TYPE_FLEX_MESSAGE},
    stream::StreamPacket,
};

use super::{SessionReadState, SessionStream};

/// Handles DATA RTMP packet (onMetaData and other script messages)
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
pub async fn handle_rtmp_packet_data(
    logger: &Arc<Logger>,
    read_state: &mut SessionReadState,
    packet: &RtmpPacket,
) -> bool {
    let (stream_handle, liveness) = match &read_state.stream {
        SessionStream::Publishing { handle, liveness } => (handle, liveness),
        _ => {
            log_debug!(logger, "Data packet ignored since it was not publishing");

            return true;
        }
    };

    // An AMF3 script message carries one extra leading byte
    let offset: usize = if packet.header.packet_type == RTMP_TYPE_FLEX_MESSAGE {
        1
    } else {
        0
    };

    if packet.payload.len() <= offset {
        log_debug!(logger, "Data packet ignored: too short");

        return true;
    }

    // Publishers wrap onMetaData in @setDataFrame; players expect the
    // bare onMetaData message, so it is rebuilt before caching
    let payload = match RtmpData::decode(&packet.payload[offset..]) {
        Ok(data) => match data.tag.as_str() {
            "@setDataFrame" | "onMetaData" => rtmp_build_metadata(&data),
            _ => packet.payload[offset..].to_vec(),
        },
        Err(e) => {
            log_debug!(logger, format!("Data packet dropped: {}", e));

            return true;
        }
    };

    let stream_packet = match StreamPacket::from_message(
        RTMP_TYPE_DATA,
        packet.header.stream_id,
        packet.header.timestamp,
        payload,
    ) {
        Ok(p) => p,
        Err(e) => {
            log_debug!(logger, format!("Data packet dropped: {}", e));

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
