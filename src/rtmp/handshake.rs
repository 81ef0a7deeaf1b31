// RTMP simple handshake

use std::time::Duration;

use rand::{rngs::StdRng, RngCore, SeedableRng};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    time::timeout,
};

use crate::error::{RtmpError, RtmpResult};

use super::{RTMP_PING_TIMEOUT, RTMP_SIG_SIZE, RTMP_VERSION};

/// Generates the C1/S1 signature: 4 bytes time, 4 bytes zero,
/// pseudo-random remainder
pub fn generate_signature() -> Vec<u8> {
    let mut signature: Vec<u8> = vec![0; RTMP_SIG_SIZE];

    let mut rng = StdRng::from_os_rng();

    rng.fill_bytes(&mut signature[8..]);

    signature[0..8].copy_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);

    signature
}

/// Reads an exact amount of handshake bytes, with a timeout
async fn read_handshake_bytes<TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin>(
    read_stream: &mut TR,
    buf: &mut [u8],
) -> RtmpResult<()> {
    match timeout(
        Duration::from_secs(RTMP_PING_TIMEOUT),
        read_stream.read_exact(buf),
    )
    .await
    {
        Ok(r) => match r {
            Ok(_) => Ok(()),
            Err(e) => Err(RtmpError::Handshake(format!("short read: {}", e))),
        },
        Err(_) => Err(RtmpError::handshake("timed out")),
    }
}

/// Performs the client side of the simple handshake:
/// send C0 + C1, read S0/S1/S2, send C2 = echo of S1
///
/// # Arguments
///
/// * `read_stream` - IO stream to read bytes
/// * `write_stream` - IO stream to write bytes
pub async fn handshake_client<
    TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin,
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin,
>(
    read_stream: &mut TR,
    write_stream: &Mutex<TW>,
) -> RtmpResult<()> {
    // Send C0 + C1

    let c1 = generate_signature();

    let mut c0_c1: Vec<u8> = Vec::with_capacity(1 + RTMP_SIG_SIZE);
    c0_c1.push(RTMP_VERSION);
    c0_c1.extend(&c1);

    let mut write_stream_v = write_stream.lock().await;
    write_stream_v.write_all(&c0_c1).await?;
    drop(write_stream_v);

    // Read S0

    let mut s0: [u8; 1] = [0];
    read_handshake_bytes(read_stream, &mut s0).await?;

    if s0[0] != RTMP_VERSION {
        return Err(RtmpError::Handshake(format!(
            "unexpected server version: {}",
            s0[0]
        )));
    }

    // Read S1 + S2

    let mut s1: Vec<u8> = vec![0; RTMP_SIG_SIZE];
    read_handshake_bytes(read_stream, &mut s1).await?;

    let mut s2: Vec<u8> = vec![0; RTMP_SIG_SIZE];
    read_handshake_bytes(read_stream, &mut s2).await?;

    // Send C2 = echo of S1

    let mut write_stream_v = write_stream.lock().await;
    write_stream_v.write_all(&s1).await?;
    drop(write_stream_v);

    Ok(())
}

/// Performs the server side of the simple handshake:
/// read C0 + C1, send S0 + S1 + S2 (echo of C1), read C2
///
/// # Arguments
///
/// * `read_stream` - IO stream to read bytes
/// * `write_stream` - IO stream to write bytes
pub async fn handshake_server<
    TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin,
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin,
>(
    read_stream: &mut TR,
    write_stream: &Mutex<TW>,
) -> RtmpResult<()> {
    // Read C0

    let mut c0: [u8; 1] = [0];
    read_handshake_bytes(read_stream, &mut c0).await?;

    if c0[0] != RTMP_VERSION {
        return Err(RtmpError::Handshake(format!(
            "unexpected client version: {}",
            c0[0]
        )));
    }

    // Read C1

    let mut c1: Vec<u8> = vec![0; RTMP_SIG_SIZE];
    read_handshake_bytes(read_stream, &mut c1).await?;

    // Send S0 + S1 + S2 (echo of C1)

    let s1 = generate_signature();

    let mut response: Vec<u8> = Vec::with_capacity(1 + RTMP_SIG_SIZE * 2);
    response.push(RTMP_VERSION);
    response.extend(&s1);
    response.extend(&c1);

    let mut write_stream_v = write_stream.lock().await;
    write_stream_v.write_all(&response).await?;
    drop(write_stream_v);

    // Read C2, the content is not verified in the simple handshake

    let mut c2: Vec<u8> = vec![0; RTMP_SIG_SIZE];
    read_handshake_bytes(read_stream, &mut c2).await?;

    Ok(())
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_signature_shape() {
        let sig = generate_signature();

        assert_eq!(sig.len(), RTMP_SIG_SIZE);
        assert_eq!(&sig[0..8], &[0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_handshake_both_sides() {
        let (client_side, server_side) = tokio::io::duplex(RTMP_SIG_SIZE * 4);

        let (mut client_read, client_write) = tokio::io::split(client_side);
        let (mut server_read, server_write) = tokio::io::split(server_side);

        let client_write = Mutex::new(client_write);
        let server_write = Mutex::new(server_write);

        let (client_res, server_res) = tokio::join!(
            handshake_client(&mut client_read, &client_write),
            handshake_server(&mut server_read, &server_write),
        );

        client_res.unwrap();
        server_res.unwrap();
    }
}
