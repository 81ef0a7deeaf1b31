// RTMP server configuration

use std::sync::Arc;

use crate::rtmp::RTMP_SERVER_OUT_CHUNK_SIZE;

/// Admission hook: called once per publish or play session with the
/// full stream URL; an error terminates the session before any data
pub type StreamVerifyCallback = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// TLS listener configuration
#[derive(Clone)]
pub struct TlsConfiguration {
    /// Listen address, like "0.0.0.0:443"
    pub listen_addr: String,

    /// Path to the certificate chain (PEM)
    pub certificate: String,

    /// Path to the private key (PEM)
    pub key: String,
}

/// RTMP server configuration
#[derive(Clone)]
pub struct RtmpServerConfiguration {
    /// TCP listen address, like "0.0.0.0:1935"
    pub listen_addr: String,

    /// TLS listener, if enabled
    pub tls: Option<TlsConfiguration>,

    /// Chunk size announced to clients after connect
    pub chunk_size: usize,

    /// Log each request
    pub log_requests: bool,
}

impl RtmpServerConfiguration {
    /// Creates the configuration for a plain TCP listener
    pub fn new(listen_addr: &str) -> RtmpServerConfiguration {
        RtmpServerConfiguration {
            listen_addr: listen_addr.to_string(),
            tls: None,
            chunk_size: RTMP_SERVER_OUT_CHUNK_SIZE,
            log_requests: true,
        }
    }
}
