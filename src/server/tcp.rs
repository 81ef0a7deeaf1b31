// TCP server

use std::sync::Arc;

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{mpsc::Sender, Mutex},
};

use crate::log::Logger;

use super::{handle_connection, RtmpServerContext};

/// Runs the TCP listener
pub fn tcp_server(logger: Arc<Logger>, context: RtmpServerContext, end_notifier: Sender<()>) {
    tokio::spawn(async move {
        let listen_addr = context.config.listen_addr.clone();

        // Create listener
        let listener = match TcpListener::bind(&listen_addr).await {
            Ok(l) => l,
            Err(e) => {
                logger.log_error(&format!("Could not create TCP listener: {}", e));
                end_notifier
                    .send(())
                    .await
                    .expect("failed to notify to main thread");
                return;
            }
        };

        logger.log_info(&format!("Listening on {}", listen_addr));

        loop {
            match listener.accept().await {
                Ok((connection, addr)) => {
                    // Handle connection
                    handle_connection_tcp(connection, addr.ip(), context.clone(), logger.clone());
                }
                Err(e) => {
                    logger.log_error(&format!("Could not accept connection: {}", e));
                    end_notifier
                        .send(())
                        .await
                        .expect("failed to notify to main thread");
                    return;
                }
            }
        }
    });
}

fn handle_connection_tcp(
    connection: TcpStream,
    ip: std::net::IpAddr,
    context: RtmpServerContext,
    logger: Arc<Logger>,
) {
    tokio::spawn(async move {
        let (read_stream, write_stream) = tokio::io::split(connection);

        let write_stream_mu = Arc::new(Mutex::new(write_stream));

        handle_connection(
            logger,
            context,
            read_stream,
            write_stream_mu.clone(),
            ip,
        )
        .await;

        // Ensure connection is closed
        let mut write_stream_mu_v = write_stream_mu.lock().await;
        let _ = (*write_stream_mu_v).shutdown().await;
        drop(write_stream_mu_v);
    });
}
