// Player send task: drains the packet queue into the socket

use std::sync::Arc;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::{
    log::Logger,
    log_debug,
    rtmp::{
        rtmp_make_stream_status_message, RtmpPacket, RTMP_CHUNK_TYPE_0, STREAM_EOF,
    },
    stream::{Liveness, PacketKind, PacketQueue, TimestampRebase},
};

use super::{send_status_message, session_write_bytes, RtmpSessionStatus};

/// Spawns the task serializing stream packets for one player
///
/// The task ends when the queue is closed (stream over, slow consumer
/// collected, or session ended) or when a socket write fails.
///
/// # Arguments
///
/// * `write_stream` - IO stream to write bytes
/// * `queue` - Queue fed by the stream actor
/// * `rebase` - Timestamp rebase for this player
/// * `liveness` - Activity tracker, touched on every delivered packet
/// * `status` - Session status (receiveAudio / receiveVideo flags)
/// * `play_stream_id` - Message stream ID the client plays on
/// * `out_chunk_size` - Chunk size for outgoing messages
/// * `logger` - Session logger
#[allow(clippy::too_many_arguments)]
pub fn spawn_task_to_send_packets<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin + 'static>(
    write_stream: Arc<Mutex<TW>>,
    queue: PacketQueue,
    rebase: Arc<TimestampRebase>,
    liveness: Arc<Liveness>,
    status: Arc<Mutex<RtmpSessionStatus>>,
    play_stream_id: u32,
    out_chunk_size: usize,
    logger: Arc<Logger>,
) {
    tokio::spawn(async move {
        while let Some(stream_packet) = queue.pop().await {
            // Honor receiveAudio / receiveVideo
            let status_v = status.lock().await;
            let skip = match stream_packet.kind {
                PacketKind::Audio => !status_v.receive_audio,
                PacketKind::Video => !status_v.receive_video,
                PacketKind::Metadata => false,
            };
            drop(status_v);

            if skip {
                continue;
            }

            let timestamp =
                rebase.output_timestamp(stream_packet.kind, stream_packet.timestamp);

            let mut packet = RtmpPacket::new_blank();

            packet.header.format = RTMP_CHUNK_TYPE_0;
            packet.header.channel_id =
                RtmpPacket::channel_for_type(stream_packet.message_type_id(), 0);
            packet.header.packet_type = stream_packet.message_type_id();
            packet.header.timestamp = timestamp;
            packet.payload = stream_packet.payload.clone();
            packet.header.length = packet.payload.len();

            let packet_bytes = packet.create_chunks_for_stream(play_stream_id, out_chunk_size);

            if let Err(e) = session_write_bytes(&write_stream, &packet_bytes).await {
                log_debug!(logger, format!("Send error: Could not send packet: {}", e));

                queue.close();
                return;
            }

            liveness.touch();
        }

        // Queue closed: tell the player the stream is over, best effort

        let _ = send_status_message(
            &write_stream,
            play_stream_id,
            "status",
            "NetStream.Play.UnpublishNotify",
            Some("stream is now unpublished."),
            out_chunk_size,
        )
        .await;

        let stream_status_bytes = rtmp_make_stream_status_message(STREAM_EOF, play_stream_id);

        let _ = session_write_bytes(&write_stream, &stream_status_bytes).await;

        log_debug!(logger, "Play send task finished");
    });
}
