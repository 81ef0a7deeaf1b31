// Logic to send pings to the peer

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{mpsc::Receiver, Mutex},
};

use crate::{
    log::Logger,
    log_debug,
    rtmp::{rtmp_make_ping_request, RTMP_PING_TIME},
    session::session_write_bytes,
};

/// Spawns the task sending periodic ping requests to the peer
///
/// # Arguments
///
/// * `write_stream` - IO stream to write bytes
/// * `cancel_pings_receiver` - Fires when the session ends
/// * `logger` - Session logger
pub fn spawn_task_to_send_pings<TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin + 'static>(
    write_stream: Arc<Mutex<TW>>,
    mut cancel_pings_receiver: Receiver<()>,
    logger: Arc<Logger>,
) {
    tokio::spawn(async move {
        let connect_time = Utc::now().timestamp_millis();

        let mut finished = false;

        while !finished {
            // Wait
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(RTMP_PING_TIME)) => {}
                _ = cancel_pings_receiver.recv() => {
                    finished = true;
                    continue;
                }
            }

            let current_timestamp = Utc::now().timestamp_millis().wrapping_sub(connect_time);

            let packet_bytes = rtmp_make_ping_request(current_timestamp);

            match session_write_bytes(&write_stream, &packet_bytes).await {
                Ok(_) => {
                    log_debug!(logger, "Sent ping request to client");
                }
                Err(e) => {
                    log_debug!(logger, format!("Could not send ping request: {}", e));

                    finished = true;
                }
            }
        }
    });
}
