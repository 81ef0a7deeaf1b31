// Invoke packet handling logic

use std::sync::Arc;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::{
    log::Logger,
    log_debug, log_info,
    rtmp::{
        rtmp_make_chunk_size_set_message, rtmp_make_connect_response,
        rtmp_make_create_stream_response, rtmp_make_peer_bandwidth_set_message,
        rtmp_make_sample_access_message, rtmp_make_stream_status_message, rtmp_make_window_ack,
        ChunkReadState, RtmpCommand, RtmpPacket, RTMP_DEFAULT_WINDOW_ACK_SIZE,
        RTMP_TYPE_FLEX_MESSAGE, STREAM_BEGIN, STREAM_IS_RECORDED,
    },
    server::RtmpServerContext,
    stream::{
        stream_query_params, Liveness, PacketQueue, StreamReaderHandle, StreamWriterHandle,
        TimestampRebase,
    },
};

use super::{
    send_status_message, session_write_bytes, spawn_task_to_send_packets, SessionContext,
    SessionMode, SessionReadState, SessionStream,
};

/// Handles RTMP packet (INVOKE)
///
/// # Arguments
///
/// * `logger` - Session logger
/// * `server_context` - The server context
/// * `session_context` - The session context
/// * `read_state` - State owned by the read loop
/// * `packet` - The packet to handle
/// * `write_stream` - IO stream to write bytes
///
/// # Return value
///
/// Returns true to continue receiving chunks.
/// Returns false to end the session main loop.
pub async fn handle_rtmp_packet_invoke<
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin + 'static,
>(
    logger: &Arc<Logger>,
    server_context: &RtmpServerContext,
    session_context: &SessionContext,
    read_state: &mut SessionReadState,
    chunk_state: &mut ChunkReadState,
    packet: &RtmpPacket,
    write_stream: &Arc<Mutex<TW>>,
) -> bool {
    // An AMF3 command carries one extra leading byte
    let offset: usize = if packet.header.packet_type == RTMP_TYPE_FLEX_MESSAGE {
        1
    } else {
        0
    };

    if packet.payload.len() <= offset {
        log_debug!(logger, "Packet error: Packet length too short");

        return false;
    }

    let cmd = match RtmpCommand::decode(&packet.payload[offset..]) {
        Ok(c) => c,
        Err(e) => {
            log_debug!(
                logger,
                format!("Packet error: Could not decode RTMP command: {}", e)
            );

            // An unsupported AMF marker only invalidates this message,
            // anything else is fatal to the connection
            let skip_message = match &e {
                crate::error::RtmpError::Protocol(msg) => {
                    msg.contains("unsupported AMF marker")
                }
                _ => false,
            };

            return skip_message;
        }
    };

    if logger.config.trace_enabled {
        logger.log_trace(&format!("COMMAND: {}", cmd.to_debug_string()));
    }

    match cmd.cmd.as_str() {
        "connect" => {
            handle_rtmp_command_connect(
                logger,
                server_context,
                session_context,
                read_state,
                chunk_state,
                &cmd,
                write_stream,
            )
            .await
        }
        "createStream" => {
            handle_rtmp_command_create_stream(
                logger,
                session_context,
                read_state,
                &cmd,
                write_stream,
            )
            .await
        }
        "publish" => {
            handle_rtmp_command_publish(
                logger,
                server_context,
                session_context,
                read_state,
                packet,
                &cmd,
                write_stream,
            )
            .await
        }
        "play" => {
            handle_rtmp_command_play(
                logger,
                server_context,
                session_context,
                read_state,
                packet,
                &cmd,
                write_stream,
            )
            .await
        }
        "receiveAudio" => {
            let receive = cmd
                .get_argument("bool")
                .map(|v| v.get_bool())
                .unwrap_or(true);

            let mut status = session_context.status.lock().await;
            status.receive_audio = receive;

            true
        }
        "receiveVideo" => {
            let receive = cmd
                .get_argument("bool")
                .map(|v| v.get_bool())
                .unwrap_or(true);

            let mut status = session_context.status.lock().await;
            status.receive_video = receive;

            true
        }
        "deleteStream" | "closeStream" => {
            handle_rtmp_command_close_stream(logger, session_context, read_state).await
        }
        "releaseStream" | "FCPublish" | "FCUnpublish" => {
            // Polite no-ops
            true
        }
        "pause" => {
            log_debug!(logger, "Pause requested, not supported for live streams");

            true
        }
        _ => {
            log_debug!(logger, format!("Unrecognized command: {}", cmd.cmd));

            true
        }
    }
}

/// Handles RTMP command (connect)
async fn handle_rtmp_command_connect<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin>(
    logger: &Arc<Logger>,
    server_context: &RtmpServerContext,
    session_context: &SessionContext,
    read_state: &mut SessionReadState,
    chunk_state: &mut ChunkReadState,
    cmd: &RtmpCommand,
    write_stream: &Mutex<TW>,
) -> bool {
    // Load and validate parameters

    let cmd_obj = match cmd.get_argument("cmdObj") {
        Some(o) => o,
        None => {
            log_debug!(logger, "Command error: cmdObj argument not provided");

            return false;
        }
    };

    let app = match cmd_obj.get_object_property("app") {
        Some(app) => app.get_string().trim_end_matches('/').to_string(),
        None => {
            log_debug!(logger, "Command error: app property not provided");

            return false;
        }
    };

    if app.is_empty() {
        log_debug!(logger, "Command error: empty app name");

        return false;
    }

    let trans_id = cmd
        .get_argument("transId")
        .map(|v| v.get_integer())
        .unwrap_or(1);

    let object_encoding = cmd_obj
        .get_object_property("objectEncoding")
        .map(|v| v.get_integer() as u32);

    let tc_url = cmd_obj
        .get_object_property("tcUrl")
        .map(|v| v.get_string().to_string());

    // Update status

    let mut status = session_context.status.lock().await;

    if status.app.is_some() {
        drop(status);

        log_debug!(logger, "Protocol error: Received connect twice");

        return false;
    }

    status.app = Some(app.clone());
    status.tc_url = tc_url;
    status.object_encoding = object_encoding;

    drop(status);

    // Respond: window ack size, peer bandwidth, chunk size, _result

    let window_ack_bytes = rtmp_make_window_ack(RTMP_DEFAULT_WINDOW_ACK_SIZE);

    if let Err(e) = session_write_bytes(write_stream, &window_ack_bytes).await {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    let peer_bw_bytes =
        rtmp_make_peer_bandwidth_set_message(RTMP_DEFAULT_WINDOW_ACK_SIZE, 2);

    if let Err(e) = session_write_bytes(write_stream, &peer_bw_bytes).await {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    let chunk_size_bytes =
        rtmp_make_chunk_size_set_message(server_context.config.chunk_size as u32);

    if let Err(e) = session_write_bytes(write_stream, &chunk_size_bytes).await {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    // The announced chunk size governs both directions: outgoing
    // messages use it from now on and peers adopt it for their sends
    read_state.out_chunk_size = server_context.config.chunk_size;
    chunk_state.remote_chunk_size = server_context.config.chunk_size;

    let response_bytes =
        rtmp_make_connect_response(trans_id, object_encoding, read_state.out_chunk_size);

    if let Err(e) = session_write_bytes(write_stream, &response_bytes).await {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    if server_context.config.log_requests {
        log_info!(logger, format!("CONNECT: {}", app));
    }

    true
}

/// Handles RTMP command (createStream)
async fn handle_rtmp_command_create_stream<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin>(
    logger: &Arc<Logger>,
    session_context: &SessionContext,
    read_state: &mut SessionReadState,
    cmd: &RtmpCommand,
    write_stream: &Mutex<TW>,
) -> bool {
    if session_context.app().await.is_none() {
        log_debug!(logger, "Protocol error: createStream before connect");

        return false;
    }

    let trans_id = cmd
        .get_argument("transId")
        .map(|v| v.get_integer())
        .unwrap_or(0);

    let stream_id = session_context.allocate_stream_id().await;

    let response_bytes =
        rtmp_make_create_stream_response(trans_id, stream_id, read_state.out_chunk_size);

    if let Err(e) = session_write_bytes(write_stream, &response_bytes).await {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    log_debug!(logger, format!("Created stream: {}", stream_id));

    true
}

/// Extracts the stream name from a publish or play command,
/// separating any query string
fn get_stream_name(cmd: &RtmpCommand) -> Option<(String, String)> {
    let raw = cmd.get_argument("streamName")?.get_string();

    if raw.is_empty() {
        return None;
    }

    let mut parts = raw.splitn(2, '?');

    let name = parts.next().unwrap_or("").to_string();
    let query = parts.next().unwrap_or("").to_string();

    if name.is_empty() {
        return None;
    }

    Some((name, query))
}

/// Calls the admission hook, if configured
///
/// # Return value
///
/// Returns true if the session was admitted
async fn check_stream_admission(
    logger: &Arc<Logger>,
    server_context: &RtmpServerContext,
    session_context: &SessionContext,
    key: &str,
    query: &str,
) -> bool {
    let hook = match &server_context.on_verify {
        Some(h) => h.clone(),
        None => return true,
    };

    let status = session_context.status.lock().await;
    let tc_url = status.tc_url.clone();
    drop(status);

    let mut url = match tc_url {
        Some(tc_url) => {
            let name_part = key.splitn(2, '/').nth(1).unwrap_or(key);
            format!("{}/{}", tc_url.trim_end_matches('/'), name_part)
        }
        None => format!("rtmp://{}", key),
    };

    if !query.is_empty() {
        url = format!("{}?{}", url, query);
    }

    match hook(&url) {
        Ok(_) => true,
        Err(e) => {
            log_info!(logger, format!("Admission rejected for {}: {}", url, e));

            false
        }
    }
}

/// Handles RTMP command (publish)
/// The session becomes the reader of the stream
#[allow(clippy::too_many_arguments)]
async fn handle_rtmp_command_publish<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin>(
    logger: &Arc<Logger>,
    server_context: &RtmpServerContext,
    session_context: &SessionContext,
    read_state: &mut SessionReadState,
    packet: &RtmpPacket,
    cmd: &RtmpCommand,
    write_stream: &Mutex<TW>,
) -> bool {
    let app = match session_context.app().await {
        Some(a) => a,
        None => {
            log_debug!(logger, "Protocol error: publish before connect");

            return false;
        }
    };

    if session_context.mode().await != SessionMode::Idle {
        let _ = send_status_message(
            write_stream,
            packet.header.stream_id,
            "error",
            "NetStream.Publish.BadConnection",
            Some("Connection already publishing or playing"),
            read_state.out_chunk_size,
        )
        .await;

        return true;
    }

    let (name, query) = match get_stream_name(cmd) {
        Some(r) => r,
        None => {
            log_debug!(logger, "Command error: missing stream name");

            return false;
        }
    };

    let key = format!("{}/{}", app, name);

    // Admission hook

    if !check_stream_admission(logger, server_context, session_context, &key, &query).await {
        let _ = send_status_message(
            write_stream,
            packet.header.stream_id,
            "error",
            "NetStream.Publish.BadName",
            Some("Stream rejected"),
            read_state.out_chunk_size,
        )
        .await;

        return false;
    }

    // Register as the reader of the stream

    let stream_handle = server_context.registry.get_or_create(&key).await;

    let liveness = Liveness::new(server_context.registry.config().write_timeout);

    let admitted = stream_handle
        .admit_reader(StreamReaderHandle {
            id: session_context.id,
            liveness: liveness.clone(),
            close: read_state.close_signal.clone(),
        })
        .await;

    if !admitted {
        log_debug!(logger, format!("Stream gone during admission: {}", key));

        return false;
    }

    read_state.stream = SessionStream::Publishing {
        handle: stream_handle,
        liveness,
    };

    session_context
        .set_publisher(&key, packet.header.stream_id)
        .await;

    // Respond

    if let Err(e) = send_status_message(
        write_stream,
        packet.header.stream_id,
        "status",
        "NetStream.Publish.Start",
        Some("Start publishing."),
        read_state.out_chunk_size,
    )
    .await
    {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    if server_context.config.log_requests {
        log_info!(logger, format!("PUBLISH: {}", key));
    }

    true
}

/// Handles RTMP command (play)
/// The session becomes a writer of the stream
#[allow(clippy::too_many_arguments)]
async fn handle_rtmp_command_play<
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin + 'static,
>(
    logger: &Arc<Logger>,
    server_context: &RtmpServerContext,
    session_context: &SessionContext,
    read_state: &mut SessionReadState,
    packet: &RtmpPacket,
    cmd: &RtmpCommand,
    write_stream: &Arc<Mutex<TW>>,
) -> bool {
    let app = match session_context.app().await {
        Some(a) => a,
        None => {
            log_debug!(logger, "Protocol error: play before connect");

            return false;
        }
    };

    if session_context.mode().await != SessionMode::Idle {
        let _ = send_status_message(
            write_stream,
            packet.header.stream_id,
            "error",
            "NetStream.Play.BadConnection",
            Some("Connection already publishing or playing"),
            read_state.out_chunk_size,
        )
        .await;

        return true;
    }

    let (name, query) = match get_stream_name(cmd) {
        Some(r) => r,
        None => {
            log_debug!(logger, "Command error: missing stream name");

            return false;
        }
    };

    let key = format!("{}/{}", app, name);
    let play_stream_id = packet.header.stream_id;

    // Play parameters

    let play_params = stream_query_params(&query);

    let receive_gop = play_params
        .get("cache")
        .map(|v| v != "clear")
        .unwrap_or(true);

    // Admission hook

    if !check_stream_admission(logger, server_context, session_context, &key, &query).await {
        let _ = send_status_message(
            write_stream,
            play_stream_id,
            "error",
            "NetStream.Play.Failed",
            Some("Stream rejected"),
            read_state.out_chunk_size,
        )
        .await;

        return false;
    }

    // Stream status events + onStatus sequence

    let recorded_bytes = rtmp_make_stream_status_message(STREAM_IS_RECORDED, play_stream_id);

    if let Err(e) = session_write_bytes(write_stream, &recorded_bytes).await {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    let begin_bytes = rtmp_make_stream_status_message(STREAM_BEGIN, play_stream_id);

    if let Err(e) = session_write_bytes(write_stream, &begin_bytes).await {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    for (code, description) in [
        ("NetStream.Play.Reset", "Playing and resetting stream."),
        ("NetStream.Play.Start", "Started playing stream."),
        ("NetStream.Data.Start", "Started playing stream."),
        ("NetStream.Play.PublishNotify", "Started playing notify."),
    ] {
        if let Err(e) = send_status_message(
            write_stream,
            play_stream_id,
            "status",
            code,
            Some(description),
            read_state.out_chunk_size,
        )
        .await
        {
            log_debug!(logger, format!("Send error: {}", e));
            return false;
        }
    }

    let sample_access_bytes =
        rtmp_make_sample_access_message(play_stream_id, read_state.out_chunk_size);

    if let Err(e) = session_write_bytes(write_stream, &sample_access_bytes).await {
        log_debug!(logger, format!("Send error: {}", e));
        return false;
    }

    // Register as a writer of the stream

    let engine_config = server_context.registry.config();

    let queue = PacketQueue::new(engine_config.queue_capacity);
    let rebase = TimestampRebase::new();
    let liveness = Liveness::new(engine_config.write_timeout);

    let stream_handle = server_context.registry.get_or_create(&key).await;

    let admitted = stream_handle
        .admit_writer(StreamWriterHandle {
            id: session_context.id,
            receive_gop,
            queue: queue.clone(),
            rebase: rebase.clone(),
            liveness: liveness.clone(),
            close: read_state.close_signal.clone(),
        })
        .await;

    if !admitted {
        log_debug!(logger, format!("Stream gone during admission: {}", key));

        return false;
    }

    read_state.stream = SessionStream::Playing {
        queue: queue.clone(),
    };

    session_context.set_player(&key, play_stream_id).await;

    // Spawn the send task draining the queue into the socket

    spawn_task_to_send_packets(
        write_stream.clone(),
        queue,
        rebase,
        liveness,
        session_context.status.clone(),
        play_stream_id,
        read_state.out_chunk_size,
        logger.clone(),
    );

    if server_context.config.log_requests {
        log_info!(logger, format!("PLAY: {}", key));
    }

    true
}

/// Handles RTMP commands (deleteStream, closeStream)
/// Detaches the session from its stream, the connection stays open
async fn handle_rtmp_command_close_stream(
    logger: &Arc<Logger>,
    session_context: &SessionContext,
    read_state: &mut SessionReadState,
) -> bool {
    match std::mem::replace(&mut read_state.stream, SessionStream::None) {
        SessionStream::Publishing { .. } => {
            log_debug!(logger, "Publisher detached from stream");
        }
        SessionStream::Playing { queue } => {
            queue.close();

            log_debug!(logger, "Player detached from stream");
        }
        SessionStream::None => {}
    }

    session_context.set_idle().await;

    true
}
