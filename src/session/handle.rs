// Logic to handle RTMP sessions

use std::sync::Arc;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::{
    log::Logger,
    log_debug, log_info,
    rtmp::{
        handshake_server, read_rtmp_packet, ChunkReadState, RtmpPacket, RTMP_DEFAULT_CHUNK_SIZE,
        RTMP_TYPE_AUDIO, RTMP_TYPE_DATA, RTMP_TYPE_FLEX_MESSAGE, RTMP_TYPE_FLEX_STREAM,
        RTMP_TYPE_INVOKE, RTMP_TYPE_VIDEO,
    },
    server::RtmpServerContext,
    stream::CloseSignal,
};

use super::{
    handle_rtmp_packet_audio, handle_rtmp_packet_data, handle_rtmp_packet_invoke,
    handle_rtmp_packet_video, spawn_task_to_send_pings, SessionContext, SessionReadState,
    SessionStream,
};

/// Handles RTMP session
///
/// # Arguments
///
/// * `logger` - Session logger
/// * `server_context` - The server context
/// * `session_context` - The session context
/// * `read_stream` - IO stream to read bytes
/// * `write_stream` - IO stream to write bytes
pub async fn handle_rtmp_session<
    TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin,
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin + 'static,
>(
    logger: Arc<Logger>,
    server_context: RtmpServerContext,
    session_context: SessionContext,
    mut read_stream: TR,
    write_stream: Arc<Mutex<TW>>,
) {
    // Handshake

    if let Err(e) = handshake_server(&mut read_stream, &write_stream).await {
        if server_context.config.log_requests {
            log_debug!(logger, format!("BAD HANDSHAKE: {}", e));
        }

        return;
    }

    log_debug!(logger, "Handshake completed");

    // Spawn task to send pings

    let (cancel_pings_sender, cancel_pings_receiver) = tokio::sync::mpsc::channel::<()>(1);

    spawn_task_to_send_pings(
        write_stream.clone(),
        cancel_pings_receiver,
        logger.clone(),
    );

    // Read chunks until the session ends

    let (close_signal, mut close_receiver) = CloseSignal::new();

    let mut chunk_state = ChunkReadState::new();

    let mut read_state = SessionReadState {
        stream: SessionStream::None,
        out_chunk_size: RTMP_DEFAULT_CHUNK_SIZE,
        close_signal,
    };

    loop {
        tokio::select! {
            _ = close_receiver.recv() => {
                log_debug!(logger, "Session closed by the stream engine");
                break;
            }
            packet_res = read_rtmp_packet(&mut read_stream, &write_stream, &mut chunk_state, &logger) => {
                let packet = match packet_res {
                    Ok(p) => p,
                    Err(e) => {
                        if server_context.config.log_requests {
                            log_debug!(logger, format!("Chunk read error: {}", e));
                        }

                        break;
                    }
                };

                let continue_loop = handle_rtmp_packet(
                    &logger,
                    &server_context,
                    &session_context,
                    &mut read_state,
                    &mut chunk_state,
                    &packet,
                    &write_stream,
                )
                .await;

                if !continue_loop || session_context.is_killed().await {
                    break;
                }
            }
        }
    }

    // Cleanup

    let _ = cancel_pings_sender.send(()).await;

    if let SessionStream::Playing { queue } = &read_state.stream {
        queue.close();
    }

    if server_context.config.log_requests {
        log_info!(logger, "Connection closed");
    }
}

/// Handles a complete RTMP packet, dispatching on its type
///
/// # Return value
///
/// Returns true to continue receiving chunks.
/// Returns false to end the session main loop.
pub async fn handle_rtmp_packet<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin + 'static>(
    logger: &Arc<Logger>,
    server_context: &RtmpServerContext,
    session_context: &SessionContext,
    read_state: &mut SessionReadState,
    chunk_state: &mut ChunkReadState,
    packet: &RtmpPacket,
    write_stream: &Arc<Mutex<TW>>,
) -> bool {
    match packet.header.packet_type {
        RTMP_TYPE_INVOKE | RTMP_TYPE_FLEX_MESSAGE => {
            handle_rtmp_packet_invoke(
                logger,
                server_context,
                session_context,
                read_state,
                chunk_state,
                packet,
                write_stream,
            )
            .await
        }
        RTMP_TYPE_AUDIO => handle_rtmp_packet_audio(logger, read_state, packet).await,
        RTMP_TYPE_VIDEO => handle_rtmp_packet_video(logger, read_state, packet).await,
        RTMP_TYPE_DATA | RTMP_TYPE_FLEX_STREAM => {
            handle_rtmp_packet_data(logger, read_state, packet).await
        }
        _ => {
            log_debug!(
                logger,
                format!("Ignored packet of type {}", packet.header.packet_type)
            );

            true
        }
    }
}
