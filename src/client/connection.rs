// Client connection logic: command handshake and session loops

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use indexmap::IndexMap;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, Mutex},
};

use crate::amf::{metadata_reform, Amf0Value, MetadataReformOp};
use crate::error::{RtmpError, RtmpResult};
use crate::flv::{
    parse_audio_tag_header, parse_avc_decoder_configuration_record, parse_nalus_length_prefixed,
    parse_video_tag_header, sample_rate_for_index, AAC_RAW, AAC_SEQ_HEADER, AVC_EOS, AVC_NALU,
    AVC_SEQ_HEADER, SOUND_AAC, VIDEO_H264,
};
use crate::log::Logger;
use crate::log_debug;
use crate::rtmp::{
    read_rtmp_packet, rtmp_make_invoke_message, ChunkReadState, RtmpCommand, RtmpPacket,
    RTMP_CHUNK_TYPE_0, RTMP_TYPE_AUDIO, RTMP_TYPE_DATA, RTMP_TYPE_FLEX_MESSAGE,
    RTMP_TYPE_FLEX_STREAM, RTMP_TYPE_INVOKE, RTMP_TYPE_VIDEO,
};
use crate::session::session_write_bytes;

use super::{
    AudioTrackInfo, OutboundMessage, StreamMessage, StreamMessageKind, StreamTrack, TrackState,
    VideoTrackInfo,
};

/// Connection state reported to the application
pub enum ClientState {
    /// Command handshake completed
    ConnectSuccess,

    /// Connection or command handshake failed
    ConnectFailed(RtmpError),

    /// An established connection was lost
    Disconnect(RtmpError),
}

/// Callback receiving connection state changes
pub type ClientStateCallback = Arc<dyn Fn(ClientState) + Send + Sync>;

/// Callback receiving tracks discovered on a play connection
pub type StreamTrackCallback = Arc<dyn Fn(StreamTrack) + Send + Sync>;

/// Role of a client connection
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Publish,
    Play,
}

/// Track registration owned by the read loop
pub(crate) struct TrackEntry {
    pub sender: mpsc::Sender<StreamMessage>,
    pub state: Arc<StdMutex<TrackState>>,
}

/// Sends a command message to the server
pub(crate) async fn send_command<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin>(
    write_stream: &Mutex<TW>,
    cmd: &RtmpCommand,
    stream_id: u32,
    out_chunk_size: &AtomicUsize,
) -> RtmpResult<()> {
    let bytes = rtmp_make_invoke_message(cmd, stream_id, out_chunk_size.load(Ordering::Relaxed));

    session_write_bytes(write_stream, &bytes).await?;

    Ok(())
}

/// Finds the first object argument carrying a "code" property
fn find_status_code(values: &[Amf0Value]) -> Option<String> {
    for value in values {
        if let Some(code) = value.get_object_property("code") {
            return Some(code.get_string().to_string());
        }
    }

    None
}

/// Waits for the response to a sent command.
///
/// One state machine covers the whole client handshake: `_result` is
/// matched by transaction ID for connect/createStream, `onStatus` by
/// its info code for publish/play.
///
/// # Arguments
///
/// * `read_stream` - IO stream to read bytes
/// * `write_stream` - IO stream to write bytes
/// * `chunk_state` - Chunk layer state
/// * `out_chunk_size` - Outgoing chunk size, kept in sync with negotiation
/// * `command_name` - The command awaiting its response
/// * `trans_id` - Transaction ID the response must carry
/// * `logger` - Connection logger
///
/// # Return value
///
/// The stream ID allocated by the server, for createStream
pub(crate) async fn wait_for<
    TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin,
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin,
>(
    read_stream: &mut TR,
    write_stream: &Mutex<TW>,
    chunk_state: &mut ChunkReadState,
    out_chunk_size: &AtomicUsize,
    command_name: &str,
    trans_id: i64,
    logger: &Logger,
) -> RtmpResult<Option<u32>> {
    loop {
        let packet = read_rtmp_packet(read_stream, write_stream, chunk_state, logger).await?;

        // Follow the chunk size announced by the peer
        out_chunk_size.store(chunk_state.remote_chunk_size, Ordering::Relaxed);

        let offset: usize = match packet.header.packet_type {
            RTMP_TYPE_INVOKE => 0,
            RTMP_TYPE_FLEX_MESSAGE => 1,
            RTMP_TYPE_AUDIO | RTMP_TYPE_VIDEO => {
                // Media before the handshake completed is a protocol error
                return Err(RtmpError::Protocol(
                    "unexpected media message during command handshake".to_string(),
                ));
            }
            _ => {
                // User control, metadata and shared objects are ignored
                continue;
            }
        };

        if packet.payload.len() <= offset {
            continue;
        }

        let values = match Amf0Value::decode_all(&packet.payload[offset..]) {
            Ok(v) => v,
            Err(e) => {
                log_debug!(logger, format!("Skipping undecodable command: {}", e));
                continue;
            }
        };

        let name = match values.first() {
            Some(v) => v.get_string().to_string(),
            None => continue,
        };

        match command_name {
            "connect" | "createStream" => match name.as_str() {
                "_result" => {
                    let response_trans_id =
                        values.get(1).map(|v| v.get_integer()).unwrap_or(-1);

                    if response_trans_id != trans_id {
                        continue;
                    }

                    if command_name == "connect" {
                        match find_status_code(&values) {
                            Some(code) => {
                                if code == "NetConnection.Connect.Success" {
                                    return Ok(None);
                                }

                                return Err(RtmpError::Admission(code));
                            }
                            None => {
                                return Err(RtmpError::protocol(
                                    "connect response carries no status code",
                                ));
                            }
                        }
                    }

                    // createStream: the fourth field is the stream ID
                    match values.get(3) {
                        Some(id) => {
                            return Ok(Some(id.get_integer() as u32));
                        }
                        None => {
                            return Err(RtmpError::protocol(
                                "createStream response carries no stream id",
                            ));
                        }
                    }
                }
                "_error" => {
                    let code = find_status_code(&values)
                        .unwrap_or_else(|| "unknown error".to_string());

                    return Err(RtmpError::Admission(code));
                }
                _ => continue,
            },
            "publish" => {
                if name != "onStatus" {
                    continue;
                }

                match find_status_code(&values) {
                    Some(code) => {
                        if code == "NetStream.Publish.Start" {
                            return Ok(None);
                        }

                        return Err(RtmpError::Admission(code));
                    }
                    None => continue,
                }
            }
            "play" => {
                if name != "onStatus" {
                    continue;
                }

                match find_status_code(&values) {
                    Some(code) => {
                        if code == "NetStream.Play.Start" {
                            return Ok(None);
                        }

                        // Reset precedes Start and is not an error
                        if code == "NetStream.Play.Reset"
                            || code == "NetStream.Data.Start"
                            || code == "NetStream.Play.PublishNotify"
                        {
                            continue;
                        }

                        return Err(RtmpError::Admission(code));
                    }
                    None => continue,
                }
            }
            _ => {
                return Err(RtmpError::Protocol(format!(
                    "no response handler for command: {}",
                    command_name
                )));
            }
        }
    }
}

/// Builds the connect command for a client connection
pub(crate) fn make_connect_command(app: &str, tc_url: &str, trans_id: i64) -> RtmpCommand {
    let mut cmd = RtmpCommand::new("connect".to_string());

    cmd.set_argument(
        "transId".to_string(),
        Amf0Value::Number {
            value: trans_id as f64,
        },
    );

    let mut cmd_obj: IndexMap<String, Amf0Value> = IndexMap::new();

    cmd_obj.insert(
        "app".to_string(),
        Amf0Value::String {
            value: app.to_string(),
        },
    );
    cmd_obj.insert(
        "type".to_string(),
        Amf0Value::String {
            value: "nonprivate".to_string(),
        },
    );
    cmd_obj.insert(
        "flashVer".to_string(),
        Amf0Value::String {
            value: "FMS.3.1".to_string(),
        },
    );
    cmd_obj.insert(
        "tcUrl".to_string(),
        Amf0Value::String {
            value: tc_url.to_string(),
        },
    );

    cmd.set_argument(
        "cmdObj".to_string(),
        Amf0Value::Object {
            properties: cmd_obj,
        },
    );

    cmd
}

/// Spawns the loop serializing outbound messages into the socket
pub(crate) fn spawn_client_send_loop<
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin + 'static,
>(
    write_stream: Arc<Mutex<TW>>,
    out_chunk_size: Arc<AtomicUsize>,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    logger: Arc<Logger>,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let mut packet = RtmpPacket::new_blank();

            packet.header.format = RTMP_CHUNK_TYPE_0;
            packet.header.channel_id = RtmpPacket::channel_for_type(message.packet_type, 0);
            packet.header.packet_type = message.packet_type;
            packet.header.stream_id = message.stream_id;
            packet.header.timestamp = message.timestamp;
            packet.payload = message.payload;
            packet.header.length = packet.payload.len();

            let bytes = packet.create_chunks(out_chunk_size.load(Ordering::Relaxed));

            if let Err(e) = session_write_bytes(&write_stream, &bytes).await {
                log_debug!(logger, format!("Send error: {}", e));

                return;
            }
        }
    });
}

/// Context of the client read loop
pub(crate) struct ClientReadContext {
    pub mode: ClientMode,
    pub tracks: Arc<Mutex<HashMap<u32, TrackEntry>>>,
    pub outbound: mpsc::Sender<OutboundMessage>,
    pub on_state: ClientStateCallback,
    pub on_track: Option<StreamTrackCallback>,
    pub out_chunk_size: Arc<AtomicUsize>,
}

/// Spawns the loop reading messages from the server after the command
/// handshake completed: media and metadata are demuxed and routed to
/// their track, everything else is consumed here
pub(crate) fn spawn_client_read_loop<
    TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin + 'static,
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin + 'static,
>(
    mut read_stream: TR,
    write_stream: Arc<Mutex<TW>>,
    mut chunk_state: ChunkReadState,
    context: ClientReadContext,
    mut close_receiver: mpsc::Receiver<()>,
    logger: Arc<Logger>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                // Fires on an explicit close and when the client is dropped
                _ = close_receiver.recv() => {
                    log_debug!(logger, "Connection closed by the application");
                    break;
                }
                packet_res = read_rtmp_packet(&mut read_stream, &write_stream, &mut chunk_state, &logger) => {
                    let packet = match packet_res {
                        Ok(p) => p,
                        Err(e) => {
                            (context.on_state)(ClientState::Disconnect(e));
                            break;
                        }
                    };

                    context
                        .out_chunk_size
                        .store(chunk_state.remote_chunk_size, Ordering::Relaxed);

                    handle_server_message(&context, &packet, &logger).await;
                }
            }
        }

        // Dropping the senders makes every pending read_message fail
        let mut tracks = context.tracks.lock().await;
        tracks.clear();
    });
}

/// Routes one message from the server
async fn handle_server_message(
    context: &ClientReadContext,
    packet: &RtmpPacket,
    logger: &Arc<Logger>,
) {
    match packet.header.packet_type {
        RTMP_TYPE_AUDIO | RTMP_TYPE_VIDEO | RTMP_TYPE_DATA | RTMP_TYPE_FLEX_STREAM => {
            if context.mode != ClientMode::Play {
                log_debug!(logger, "Ignored media message on a publish connection");

                return;
            }

            let entry_ready = ensure_track(context, packet.header.stream_id, logger).await;

            if !entry_ready {
                return;
            }

            let tracks = context.tracks.lock().await;

            let entry = match tracks.get(&packet.header.stream_id) {
                Some(e) => e,
                None => return,
            };

            let messages = match demux_server_message(packet, entry) {
                Ok(m) => m,
                Err(e) => {
                    // Codec errors drop the packet, the connection survives
                    log_debug!(logger, format!("Dropped media message: {}", e));

                    return;
                }
            };

            for message in messages {
                if entry.sender.send(message).await.is_err() {
                    return;
                }
            }
        }
        RTMP_TYPE_INVOKE | RTMP_TYPE_FLEX_MESSAGE => {
            log_debug!(logger, "Ignored command message in active phase");
        }
        _ => {}
    }
}

/// Creates the track for a newly seen message stream (play mode)
///
/// # Return value
///
/// True if a track entry exists for the stream
async fn ensure_track(context: &ClientReadContext, stream_id: u32, logger: &Arc<Logger>) -> bool {
    let mut tracks = context.tracks.lock().await;

    if tracks.contains_key(&stream_id) {
        return true;
    }

    let on_track = match &context.on_track {
        Some(cb) => cb.clone(),
        None => {
            log_debug!(
                logger,
                format!("No track callback, dropping messages for stream {}", stream_id)
            );

            return false;
        }
    };

    let (sender, receiver) = mpsc::channel::<StreamMessage>(64);

    let state = Arc::new(StdMutex::new(TrackState {
        video: None,
        audio: None,
        first_video_message: true,
        first_audio_message: true,
    }));

    let track = StreamTrack::new(stream_id, context.outbound.clone(), receiver, state.clone());

    tracks.insert(stream_id, TrackEntry { sender, state });

    drop(tracks);

    log_debug!(logger, format!("New track for stream {}", stream_id));

    on_track(track);

    true
}

/// Demuxes one server media/script message into track messages,
/// surfacing sequence-header parameter sets and individual NAL units
fn demux_server_message(
    packet: &RtmpPacket,
    entry: &TrackEntry,
) -> RtmpResult<Vec<StreamMessage>> {
    let timestamp = packet.header.timestamp;

    match packet.header.packet_type {
        RTMP_TYPE_VIDEO => {
            let (header, n) = parse_video_tag_header(&packet.payload)?;

            if header.codec_id != VIDEO_H264 {
                return Ok(vec![StreamMessage {
                    kind: StreamMessageKind::Video,
                    pts: timestamp,
                    dts: timestamp,
                    payload: packet.payload[n..].to_vec(),
                }]);
            }

            // Record the video parameters on first sight
            {
                let mut state = entry.state.lock().unwrap();

                if state.video.is_none() {
                    state.video = Some(VideoTrackInfo {
                        codec_id: header.codec_id as u32,
                        width: 0,
                        height: 0,
                    });
                }
            }

            let body = &packet.payload[n..];

            match header.avc_packet_type {
                AVC_SEQ_HEADER => {
                    let (sps, pps) = parse_avc_decoder_configuration_record(body)?;

                    Ok(vec![
                        StreamMessage {
                            kind: StreamMessageKind::Video,
                            pts: timestamp,
                            dts: timestamp,
                            payload: sps,
                        },
                        StreamMessage {
                            kind: StreamMessageKind::Video,
                            pts: timestamp,
                            dts: timestamp,
                            payload: pps,
                        },
                    ])
                }
                AVC_NALU => {
                    let pts = timestamp + header.composition_time as i64;

                    let nalus = parse_nalus_length_prefixed(body)?;

                    Ok(nalus
                        .into_iter()
                        .map(|nalu| StreamMessage {
                            kind: StreamMessageKind::Video,
                            pts,
                            dts: timestamp,
                            payload: nalu.to_vec(),
                        })
                        .collect())
                }
                AVC_EOS => Ok(Vec::new()),
                other => Err(RtmpError::Codec(format!(
                    "unknown AVC packet type: {}",
                    other
                ))),
            }
        }
        RTMP_TYPE_AUDIO => {
            let (header, n) = parse_audio_tag_header(&packet.payload)?;

            if header.sound_format != SOUND_AAC {
                {
                    let mut state = entry.state.lock().unwrap();

                    if state.audio.is_none() {
                        state.audio = Some(AudioTrackInfo {
                            codec_id: header.sound_format as u32,
                            sample_rate: 0,
                            data_bit: 0,
                            channels: 0,
                        });
                    }
                }

                return Ok(vec![StreamMessage {
                    kind: StreamMessageKind::Audio,
                    pts: timestamp,
                    dts: timestamp,
                    payload: packet.payload[n..].to_vec(),
                }]);
            }

            match header.aac_packet_type {
                AAC_SEQ_HEADER => {
                    let config =
                        crate::flv::parse_audio_specific_config(&packet.payload[n..])?;

                    let mut state = entry.state.lock().unwrap();

                    state.audio = Some(AudioTrackInfo {
                        codec_id: SOUND_AAC as u32,
                        sample_rate: sample_rate_for_index(config.sampling_frequency_index),
                        data_bit: 16,
                        channels: config.channel_config as u32,
                    });

                    Ok(Vec::new())
                }
                AAC_RAW => Ok(vec![StreamMessage {
                    kind: StreamMessageKind::Audio,
                    pts: timestamp,
                    dts: timestamp,
                    payload: packet.payload[n..].to_vec(),
                }]),
                other => Err(RtmpError::Codec(format!(
                    "unknown AAC packet type: {}",
                    other
                ))),
            }
        }
        RTMP_TYPE_DATA | RTMP_TYPE_FLEX_STREAM => {
            let offset: usize = if packet.header.packet_type == RTMP_TYPE_FLEX_STREAM {
                1
            } else {
                0
            };

            if packet.payload.len() <= offset {
                return Ok(Vec::new());
            }

            // Strip the @setDataFrame wrapper for the consumer
            let payload = metadata_reform(&packet.payload[offset..], MetadataReformOp::Del)?;

            update_track_dimensions(entry, &payload);

            Ok(vec![StreamMessage {
                kind: StreamMessageKind::Metadata,
                pts: timestamp,
                dts: timestamp,
                payload,
            }])
        }
        _ => Ok(Vec::new()),
    }
}

/// Picks width and height out of an onMetaData message
fn update_track_dimensions(entry: &TrackEntry, payload: &[u8]) {
    let values = match Amf0Value::decode_all(payload) {
        Ok(v) => v,
        Err(_) => return,
    };

    if values.first().map(|v| v.get_string()) != Some("onMetaData") {
        return;
    }

    let data = match values.iter().find(|v| v.get_object().is_some()) {
        Some(d) => d,
        None => return,
    };

    let width = data
        .get_object_property("width")
        .map(|v| v.get_integer() as u32);
    let height = data
        .get_object_property("height")
        .map(|v| v.get_integer() as u32);

    if width.is_none() && height.is_none() {
        return;
    }

    let mut state = entry.state.lock().unwrap();

    let mut video = state.video.unwrap_or(VideoTrackInfo {
        codec_id: VIDEO_H264 as u32,
        width: 0,
        height: 0,
    });

    if let Some(w) = width {
        video.width = w;
    }

    if let Some(h) = height {
        video.height = h;
    }

    state.video = Some(video);
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_status_code() {
        let mut info: IndexMap<String, Amf0Value> = IndexMap::new();
        info.insert(
            "code".to_string(),
            Amf0Value::String {
                value: "NetStream.Play.Start".to_string(),
            },
        );

        let values = vec![
            Amf0Value::String {
                value: "onStatus".to_string(),
            },
            Amf0Value::Number { value: 0.0 },
            Amf0Value::Null,
            Amf0Value::Object { properties: info },
        ];

        assert_eq!(
            find_status_code(&values).as_deref(),
            Some("NetStream.Play.Start")
        );

        assert!(find_status_code(&[Amf0Value::Null]).is_none());
    }

    #[test]
    fn test_make_connect_command_shape() {
        let cmd = make_connect_command("live", "rtmp://example.com/live", 1);

        let decoded = RtmpCommand::decode(&cmd.encode()).unwrap();

        assert_eq!(decoded.cmd, "connect");
        assert_eq!(decoded.get_argument("transId").unwrap().get_integer(), 1);

        let obj = decoded.get_argument("cmdObj").unwrap();

        assert_eq!(obj.get_object_property("app").unwrap().get_string(), "live");
        assert_eq!(
            obj.get_object_property("tcUrl").unwrap().get_string(),
            "rtmp://example.com/live"
        );
        assert_eq!(
            obj.get_object_property("type").unwrap().get_string(),
            "nonprivate"
        );
    }
}
