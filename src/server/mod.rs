// RTMP server

mod config;
mod connection_handle;
mod session_id_generator;
mod tcp;
mod tls;

use std::sync::Arc;

pub use config::*;
pub use connection_handle::*;
pub use session_id_generator::*;
pub use tcp::*;
pub use tls::*;

use tokio::sync::Mutex;

use crate::log::Logger;
use crate::stream::StreamRegistry;

/// Shared context of a running server
#[derive(Clone)]
pub struct RtmpServerContext {
    /// Server configuration
    pub config: Arc<RtmpServerConfiguration>,

    /// Live stream registry
    pub registry: Arc<StreamRegistry>,

    /// Admission hook, if configured
    pub on_verify: Option<StreamVerifyCallback>,

    /// Session ID generator
    pub session_id_generator: Arc<Mutex<SessionIdGenerator>>,
}

/// Runs the RTMP server until a listener fails
pub async fn run_server(logger: Logger, context: RtmpServerContext) {
    let (end_notifier_tcp, mut end_receiver_tcp) = tokio::sync::mpsc::channel::<()>(1);

    tcp_server(
        Arc::new(logger.make_child_logger("[SERVER:TCP] ")),
        context.clone(),
        end_notifier_tcp,
    );

    if context.config.tls.is_some() {
        let (end_notifier_tls, mut end_receiver_tls) = tokio::sync::mpsc::channel::<()>(1);

        tls_server(
            Arc::new(logger.make_child_logger("[SERVER:TLS] ")),
            context.clone(),
            end_notifier_tls,
        );

        end_receiver_tls
            .recv()
            .await
            .expect("could not receive signal from TLS server thread");
    }

    end_receiver_tcp
        .recv()
        .await
        .expect("could not receive signal from TCP server thread");
}
