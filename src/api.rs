// Public API surface

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::RtmpClient;
use crate::log::{LogConfig, Logger};
use crate::server::{
    run_server, RtmpServerConfiguration, RtmpServerContext, SessionIdGenerator,
    StreamVerifyCallback, TlsConfiguration,
};
use crate::stream::{StreamEngineConfig, StreamRegistry};

/// Settings for an RTMP API instance
#[derive(Clone)]
pub struct ApiSettings {
    /// Logger configuration
    pub log: LogConfig,

    /// Admission hook, called once per publish or play session
    pub on_verify: Option<StreamVerifyCallback>,

    /// Stream engine configuration (GOP cache, queues, timeouts)
    pub engine: StreamEngineConfig,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            log: LogConfig::default(),
            on_verify: None,
            engine: StreamEngineConfig::default(),
        }
    }
}

/// Entry point of the library: builds servers and clients sharing
/// one configuration
pub struct RtmpApi {
    settings: ApiSettings,
    logger: Arc<Logger>,
}

impl RtmpApi {
    /// Creates an API instance from its settings
    pub fn new(settings: ApiSettings) -> RtmpApi {
        let logger = Arc::new(Logger::new(settings.log.clone()));

        RtmpApi { settings, logger }
    }

    /// Serves RTMP over plain TCP on the given address.
    /// Runs until the listener fails.
    ///
    /// # Arguments
    ///
    /// * `addr` - Listen address, like "0.0.0.0:1935"
    pub async fn serve_rtmp(&self, addr: &str) {
        let config = RtmpServerConfiguration::new(addr);

        self.serve(config).await;
    }

    /// Serves RTMP over TLS on the given address.
    /// Runs until the listener fails.
    ///
    /// # Arguments
    ///
    /// * `addr` - Listen address, like "0.0.0.0:443"
    /// * `certificate` - Path to the certificate chain (PEM)
    /// * `key` - Path to the private key (PEM)
    pub async fn serve_rtmp_tls(&self, addr: &str, certificate: &str, key: &str) {
        let mut config = RtmpServerConfiguration::new(addr);

        config.tls = Some(TlsConfiguration {
            listen_addr: addr.to_string(),
            certificate: certificate.to_string(),
            key: key.to_string(),
        });

        self.serve(config).await;
    }

    async fn serve(&self, config: RtmpServerConfiguration) {
        let registry = StreamRegistry::new(
            self.settings.engine.clone(),
            Arc::new(self.logger.make_child_logger("[ENGINE] ")),
        );

        let context = RtmpServerContext {
            config: Arc::new(config),
            registry,
            on_verify: self.settings.on_verify.clone(),
            session_id_generator: Arc::new(Mutex::new(SessionIdGenerator::new())),
        };

        run_server(self.logger.make_child_logger("[SERVER] "), context).await;
    }

    /// Creates an RTMP client
    pub fn new_rtmp_client(&self) -> RtmpClient {
        RtmpClient::new(Arc::new(self.logger.make_child_logger("[CLIENT] ")))
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::client::{
        ClientState, StreamMessage, StreamMessageKind, StreamTrack, VideoTrackInfo,
    };
    use crate::flv::VIDEO_H264;
    use crate::log::LogLevel;

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1e, 0xab, 0x40, 0xb0, 0x4b];
    const PPS: &[u8] = &[0x68, 0xce, 0x3c, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x21];
    const INTER: &[u8] = &[0x41, 0x9a, 0x02, 0x05];

    fn annex_b(nalus: &[&[u8]]) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();

        for nalu in nalus {
            out.extend(&[0, 0, 0, 1]);
            out.extend(*nalu);
        }

        out
    }

    fn quiet_settings() -> ApiSettings {
        ApiSettings {
            log: crate::log::LogConfig::with_level(LogLevel::Disabled),
            on_verify: None,
            engine: crate::stream::StreamEngineConfig::default(),
        }
    }

    fn ignore_state() -> crate::client::ClientStateCallback {
        Arc::new(|_state: ClientState| {})
    }

    #[tokio::test]
    async fn test_publish_play_end_to_end() {
        let mut settings = quiet_settings();

        // Cache a whole GOP so the late joiner receives every frame
        settings.engine.gop_num = 32;

        let api = Arc::new(RtmpApi::new(settings));

        let server_api = api.clone();
        tokio::spawn(async move {
            server_api.serve_rtmp("127.0.0.1:19431").await;
        });

        tokio::time::sleep(Duration::from_millis(300)).await;

        // Publisher

        let publisher = api.new_rtmp_client();

        publisher
            .open_publish("rtmp://127.0.0.1:19431/live/cam1", ignore_state())
            .await
            .unwrap();

        let publish_track = publisher
            .add_stream_track(
                None,
                Some(VideoTrackInfo {
                    codec_id: VIDEO_H264 as u32,
                    width: 1280,
                    height: 720,
                }),
            )
            .await
            .unwrap();

        // First keyframe carries SPS and PPS, then one inter frame
        publish_track
            .write_message(&StreamMessage {
                kind: StreamMessageKind::Video,
                pts: 0,
                dts: 0,
                payload: annex_b(&[SPS, PPS, IDR]),
            })
            .await
            .unwrap();

        publish_track
            .write_message(&StreamMessage {
                kind: StreamMessageKind::Video,
                pts: 40,
                dts: 40,
                payload: annex_b(&[INTER]),
            })
            .await
            .unwrap();

        // Let the packets reach the stream cache
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Player

        let player = api.new_rtmp_client();

        let (track_sender, mut track_receiver) = tokio::sync::mpsc::channel::<StreamTrack>(1);

        player.on_stream_track(Arc::new(move |track| {
            let _ = track_sender.try_send(track);
        }));

        player
            .open_play("rtmp://127.0.0.1:19431/live/cam1", ignore_state())
            .await
            .unwrap();

        let play_track = tokio::time::timeout(Duration::from_secs(5), track_receiver.recv())
            .await
            .expect("no track discovered")
            .expect("track channel closed");

        // Collect video messages: SPS and PPS surfaced from the cached
        // sequence header, then the GOP NAL units in order
        let mut video_payloads: Vec<Vec<u8>> = Vec::new();
        let mut last_dts: i64 = 0;

        while video_payloads.len() < 6 {
            let msg = tokio::time::timeout(Duration::from_secs(5), play_track.read_message())
                .await
                .expect("timed out waiting for message")
                .expect("read failed");

            if msg.kind != StreamMessageKind::Video {
                continue;
            }

            assert!(msg.dts >= last_dts);
            last_dts = msg.dts;

            video_payloads.push(msg.payload);
        }

        assert_eq!(video_payloads[0], SPS);
        assert_eq!(video_payloads[1], PPS);
        assert_eq!(video_payloads[2], SPS);
        assert_eq!(video_payloads[3], PPS);
        assert_eq!(video_payloads[4], IDR);
        assert_eq!(video_payloads[5], INTER);

        assert_eq!(last_dts, 40);

        assert!(play_track.video_info().is_some());

        publisher.close().await;
        player.close().await;
    }

    #[tokio::test]
    async fn test_admission_hook_rejects_publisher() {
        let mut settings = quiet_settings();

        settings.on_verify = Some(Arc::new(|url: &str| {
            if url.contains("secret") {
                Ok(())
            } else {
                Err("unknown stream".to_string())
            }
        }));

        let api = Arc::new(RtmpApi::new(settings));

        let server_api = api.clone();
        tokio::spawn(async move {
            server_api.serve_rtmp("127.0.0.1:19432").await;
        });

        tokio::time::sleep(Duration::from_millis(300)).await;

        let rejected = api.new_rtmp_client();

        assert!(rejected
            .open_publish("rtmp://127.0.0.1:19432/live/cam1", ignore_state())
            .await
            .is_err());

        let admitted = api.new_rtmp_client();

        admitted
            .open_publish("rtmp://127.0.0.1:19432/live/secret", ignore_state())
            .await
            .unwrap();

        admitted.close().await;
    }
}

