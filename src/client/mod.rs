// RTMP client

mod connection;
mod track;

pub use connection::{ClientMode, ClientState, ClientStateCallback, StreamTrackCallback};
pub use track::{AudioTrackInfo, StreamMessage, StreamMessageKind, StreamTrack, VideoTrackInfo};

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{rustls, TlsConnector};

use crate::amf::Amf0Value;
use crate::error::{RtmpError, RtmpResult};
use crate::log::Logger;
use crate::log_debug;
use crate::rtmp::{handshake_client, ChunkReadState, RtmpCommand, RTMP_DEFAULT_CHUNK_SIZE};
use crate::stream::{CloseSignal, RtmpUrl};

use connection::{
    make_connect_command, send_command, spawn_client_read_loop, spawn_client_send_loop, wait_for,
    ClientReadContext, TrackEntry,
};
use track::{OutboundMessage, TrackState};

/// Established connection state of a client
struct ClientSession {
    mode: ClientMode,
    stream_id: u32,
    outbound: mpsc::Sender<OutboundMessage>,
    tracks: Arc<Mutex<HashMap<u32, TrackEntry>>>,
    close: CloseSignal,
    track_taken: bool,
}

/// RTMP client: publishes to or plays from a remote server
pub struct RtmpClient {
    logger: Arc<Logger>,
    tls_config: StdMutex<Option<Arc<rustls::ClientConfig>>>,
    on_track: StdMutex<Option<StreamTrackCallback>>,
    session: Mutex<Option<ClientSession>>,
}

impl RtmpClient {
    /// Creates a client
    pub fn new(logger: Arc<Logger>) -> RtmpClient {
        RtmpClient {
            logger,
            tls_config: StdMutex::new(None),
            on_track: StdMutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Sets the TLS configuration used for rtmps:// URLs
    pub fn set_tls_config(&self, config: Arc<rustls::ClientConfig>) {
        let mut tls_config = self.tls_config.lock().unwrap();
        *tls_config = Some(config);
    }

    /// Registers the callback receiving tracks discovered on a play
    /// connection. Must be set before open_play.
    pub fn on_stream_track(&self, callback: StreamTrackCallback) {
        let mut on_track = self.on_track.lock().unwrap();
        *on_track = Some(callback);
    }

    /// Opens a publishing connection
    ///
    /// # Arguments
    ///
    /// * `url` - Stream URL, like "rtmp://host/app/stream"
    /// * `on_state` - Connection state callback
    pub async fn open_publish(&self, url: &str, on_state: ClientStateCallback) -> RtmpResult<()> {
        self.open(url, ClientMode::Publish, on_state).await
    }

    /// Opens a playing connection; discovered tracks are delivered
    /// through the on_stream_track callback
    ///
    /// # Arguments
    ///
    /// * `url` - Stream URL, like "rtmp://host/app/stream"
    /// * `on_state` - Connection state callback
    pub async fn open_play(&self, url: &str, on_state: ClientStateCallback) -> RtmpResult<()> {
        self.open(url, ClientMode::Play, on_state).await
    }

    /// Creates the stream track of a publishing connection
    ///
    /// # Arguments
    ///
    /// * `audio` - Audio parameters, if the track carries audio
    /// * `video` - Video parameters, if the track carries video
    pub async fn add_stream_track(
        &self,
        audio: Option<AudioTrackInfo>,
        video: Option<VideoTrackInfo>,
    ) -> RtmpResult<StreamTrack> {
        let mut session = self.session.lock().await;

        let session = match session.as_mut() {
            Some(s) => s,
            None => {
                return Err(RtmpError::Admission("client is not open".to_string()));
            }
        };

        if session.mode != ClientMode::Publish {
            return Err(RtmpError::Admission(
                "tracks of a play connection are discovered from the stream".to_string(),
            ));
        }

        if session.track_taken {
            return Err(RtmpError::Admission(
                "the stream track was already created".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::channel(64);

        let state = Arc::new(StdMutex::new(TrackState {
            video,
            audio,
            first_video_message: true,
            first_audio_message: true,
        }));

        let track = StreamTrack::new(
            session.stream_id,
            session.outbound.clone(),
            receiver,
            state.clone(),
        );

        let mut tracks = session.tracks.lock().await;
        tracks.insert(session.stream_id, TrackEntry { sender, state });
        drop(tracks);

        session.track_taken = true;

        Ok(track)
    }

    /// Closes the connection. Repeat closes are no-ops.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;

        if let Some(session) = session.take() {
            session.close.close();
        }
    }

    async fn open(
        &self,
        url: &str,
        mode: ClientMode,
        on_state: ClientStateCallback,
    ) -> RtmpResult<()> {
        {
            let session = self.session.lock().await;

            if session.is_some() {
                return Err(RtmpError::Admission("client is already open".to_string()));
            }
        }

        let parsed = match RtmpUrl::parse(url) {
            Ok(p) => p,
            Err(e) => {
                return Err(report_connect_failure(&on_state, e));
            }
        };

        let tcp = match TcpStream::connect(parsed.socket_addr()).await {
            Ok(s) => s,
            Err(e) => {
                return Err(report_connect_failure(&on_state, RtmpError::Io(e)));
            }
        };

        if parsed.tls {
            let tls_config = {
                let tls_config = self.tls_config.lock().unwrap();
                tls_config.clone()
            };

            let tls_config = match tls_config {
                Some(c) => c,
                None => {
                    return Err(report_connect_failure(
                        &on_state,
                        RtmpError::Admission(
                            "a TLS configuration is required for rtmps URLs".to_string(),
                        ),
                    ));
                }
            };

            let server_name = match ServerName::try_from(parsed.host.clone()) {
                Ok(n) => n,
                Err(e) => {
                    return Err(report_connect_failure(
                        &on_state,
                        RtmpError::Protocol(format!("invalid host name: {}", e)),
                    ));
                }
            };

            let connector = TlsConnector::from(tls_config);

            let stream = match connector.connect(server_name, tcp).await {
                Ok(s) => s,
                Err(e) => {
                    return Err(report_connect_failure(&on_state, RtmpError::Io(e)));
                }
            };

            self.start_session(stream, parsed, mode, on_state).await
        } else {
            self.start_session(tcp, parsed, mode, on_state).await
        }
    }

    /// Runs the handshakes over an established transport and spawns
    /// the session loops
    async fn start_session<T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static>(
        &self,
        stream: T,
        parsed: RtmpUrl,
        mode: ClientMode,
        on_state: ClientStateCallback,
    ) -> RtmpResult<()> {
        let (mut read_stream, write_stream) = tokio::io::split(stream);
        let write_stream = Arc::new(Mutex::new(write_stream));

        if let Err(e) = handshake_client(&mut read_stream, &write_stream).await {
            return Err(report_connect_failure(&on_state, e));
        }

        log_debug!(self.logger, "Handshake completed");

        let mut chunk_state = ChunkReadState::new();
        let out_chunk_size = Arc::new(AtomicUsize::new(RTMP_DEFAULT_CHUNK_SIZE));

        // Command handshake: connect, createStream, then publish or play

        let result = self
            .command_handshake(
                &mut read_stream,
                &write_stream,
                &mut chunk_state,
                &out_chunk_size,
                &parsed,
                mode,
            )
            .await;

        let stream_id = match result {
            Ok(id) => id,
            Err(e) => {
                return Err(report_connect_failure(&on_state, e));
            }
        };

        // Spawn the send and read loops

        let (outbound_sender, outbound_receiver) = mpsc::channel::<OutboundMessage>(64);

        spawn_client_send_loop(
            write_stream.clone(),
            out_chunk_size.clone(),
            outbound_receiver,
            Arc::new(self.logger.make_child_logger("[SEND] ")),
        );

        let (close_signal, close_receiver) = CloseSignal::new();

        let tracks: Arc<Mutex<HashMap<u32, TrackEntry>>> = Arc::new(Mutex::new(HashMap::new()));

        let on_track = {
            let on_track = self.on_track.lock().unwrap();
            on_track.clone()
        };

        spawn_client_read_loop(
            read_stream,
            write_stream,
            chunk_state,
            ClientReadContext {
                mode,
                tracks: tracks.clone(),
                outbound: outbound_sender.clone(),
                on_state: on_state.clone(),
                on_track,
                out_chunk_size,
            },
            close_receiver,
            Arc::new(self.logger.make_child_logger("[READ] ")),
        );

        let mut session = self.session.lock().await;

        *session = Some(ClientSession {
            mode,
            stream_id,
            outbound: outbound_sender,
            tracks,
            close: close_signal,
            track_taken: false,
        });

        drop(session);

        on_state(ClientState::ConnectSuccess);

        Ok(())
    }

    /// Sends connect and createStream, then publish or play, awaiting
    /// each response
    ///
    /// # Return value
    ///
    /// The message stream ID allocated by the server
    async fn command_handshake<
        TR: tokio::io::AsyncRead + tokio::io::AsyncReadExt + Send + Sync + Unpin,
        TW: tokio::io::AsyncWrite + tokio::io::AsyncWriteExt + Send + Sync + Unpin,
    >(
        &self,
        read_stream: &mut TR,
        write_stream: &Arc<Mutex<TW>>,
        chunk_state: &mut ChunkReadState,
        out_chunk_size: &Arc<AtomicUsize>,
        parsed: &RtmpUrl,
        mode: ClientMode,
    ) -> RtmpResult<u32> {
        // connect (transaction 1)

        let connect_cmd = make_connect_command(&parsed.app, &parsed.tc_url(), 1);

        send_command(write_stream, &connect_cmd, 0, out_chunk_size).await?;

        wait_for(
            read_stream,
            write_stream,
            chunk_state,
            out_chunk_size,
            "connect",
            1,
            &self.logger,
        )
        .await?;

        log_debug!(self.logger, "Connected");

        // createStream (transaction 2)

        let mut create_stream_cmd = RtmpCommand::new("createStream".to_string());
        create_stream_cmd.set_argument("transId".to_string(), Amf0Value::Number { value: 2.0 });
        create_stream_cmd.set_argument("cmdObj".to_string(), Amf0Value::Null);

        send_command(write_stream, &create_stream_cmd, 0, out_chunk_size).await?;

        let stream_id = wait_for(
            read_stream,
            write_stream,
            chunk_state,
            out_chunk_size,
            "createStream",
            2,
            &self.logger,
        )
        .await?
        .unwrap_or(1);

        log_debug!(self.logger, format!("Stream created: {}", stream_id));

        // The stream name carries the query, servers strip it
        let stream_name = if parsed.query.is_empty() {
            parsed.name.clone()
        } else {
            format!("{}?{}", parsed.name, parsed.query)
        };

        match mode {
            ClientMode::Publish => {
                let mut publish_cmd = RtmpCommand::new("publish".to_string());
                publish_cmd
                    .set_argument("transId".to_string(), Amf0Value::Number { value: 3.0 });
                publish_cmd.set_argument("cmdObj".to_string(), Amf0Value::Null);
                publish_cmd.set_argument(
                    "streamName".to_string(),
                    Amf0Value::String {
                        value: stream_name,
                    },
                );
                publish_cmd.set_argument(
                    "type".to_string(),
                    Amf0Value::String {
                        value: "live".to_string(),
                    },
                );

                send_command(write_stream, &publish_cmd, stream_id, out_chunk_size).await?;

                wait_for(
                    read_stream,
                    write_stream,
                    chunk_state,
                    out_chunk_size,
                    "publish",
                    3,
                    &self.logger,
                )
                .await?;

                log_debug!(self.logger, "Publishing");
            }
            ClientMode::Play => {
                let mut play_cmd = RtmpCommand::new("play".to_string());
                play_cmd.set_argument("transId".to_string(), Amf0Value::Number { value: 0.0 });
                play_cmd.set_argument("cmdObj".to_string(), Amf0Value::Null);
                play_cmd.set_argument(
                    "streamName".to_string(),
                    Amf0Value::String {
                        value: stream_name,
                    },
                );

                send_command(write_stream, &play_cmd, stream_id, out_chunk_size).await?;

                wait_for(
                    read_stream,
                    write_stream,
                    chunk_state,
                    out_chunk_size,
                    "play",
                    0,
                    &self.logger,
                )
                .await?;

                log_debug!(self.logger, "Playing");
            }
        }

        Ok(stream_id)
    }
}

/// Reports a connection failure through the state callback and
/// returns an equivalent error for the caller
fn report_connect_failure(on_state: &ClientStateCallback, e: RtmpError) -> RtmpError {
    let duplicate = e.duplicate();

    on_state(ClientState::ConnectFailed(e));

    duplicate
}
