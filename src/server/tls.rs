// TLS server

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::{net::TcpListener, sync::mpsc::Sender};

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use tokio_rustls::{rustls, TlsAcceptor};

use crate::log::Logger;

use super::{handle_connection, RtmpServerContext};

/// Runs the TLS listener
pub fn tls_server(logger: Arc<Logger>, context: RtmpServerContext, end_notifier: Sender<()>) {
    tokio::spawn(async move {
        let tls_config = match &context.config.tls {
            Some(c) => c.clone(),
            None => {
                return;
            }
        };

        let mut certificate: Vec<CertificateDer<'_>> = Vec::new();

        match CertificateDer::pem_file_iter(&tls_config.certificate) {
            Ok(certs_iter) => {
                for c in certs_iter.flatten() {
                    certificate.push(c);
                }
            }
            Err(e) => {
                logger.log_error(&format!("Could not load certificate: {}", e));
                end_notifier
                    .send(())
                    .await
                    .expect("failed to notify to main thread");
                return;
            }
        }

        let key: PrivateKeyDer<'_> = match PrivateKeyDer::from_pem_file(&tls_config.key) {
            Ok(k) => k,
            Err(e) => {
                logger.log_error(&format!("Could not load private key: {}", e));
                end_notifier
                    .send(())
                    .await
                    .expect("failed to notify to main thread");
                return;
            }
        };

        let server_config = match rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certificate, key)
        {
            Ok(c) => c,
            Err(e) => {
                logger.log_error(&format!("Could not load TLS configuration: {}", e));
                end_notifier
                    .send(())
                    .await
                    .expect("failed to notify to main thread");
                return;
            }
        };

        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listen_addr = tls_config.listen_addr.clone();

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
                    handle_connection_tls(
                        acceptor.clone(),
                        connection,
                        addr.ip(),
                        context.clone(),
                        logger.clone(),
                    );
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

fn handle_connection_tls(
    acceptor: TlsAcceptor,
    connection: TcpStream,
    ip: std::net::IpAddr,
    context: RtmpServerContext,
    logger: Arc<Logger>,
) {
    tokio::spawn(async move {
        let stream = match acceptor.accept(connection).await {
            Ok(s) => s,
            Err(e) => {
                logger.log_debug(&format!("Could not accept connection: {}", e));
                return;
            }
        };

        let (read_stream, write_stream) = tokio::io::split(stream);

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
