use crate::errors::{Error, ErrorKind, Result};
use krpc_encoding::MAX_MESSAGE_LEN;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Number of fallback ports tried after the preferred one, matching
/// the k-bucket size by convention rather than necessity.
pub const PORT_FALLBACK_ATTEMPTS: usize = 10;

/// Thin non-blocking UDP wrapper: binds with fallback ports, and
/// hands every received datagram to the caller as `(bytes, sender)`.
pub struct KrpcSocket {
    socket: tokio::sync::Mutex<UdpSocket>,
    local_addr: SocketAddr,
}

impl KrpcSocket {
    /// Bind on `preferred_port`, trying up to
    /// [`PORT_FALLBACK_ATTEMPTS`] following ports on `EADDRINUSE`.
    pub async fn bind(preferred_port: u16) -> Result<KrpcSocket> {
        let mut last_err = None;
        for offset in 0..=PORT_FALLBACK_ATTEMPTS as u16 {
            let port = preferred_port.wrapping_add(offset);
            let addr: SocketAddr = ([0, 0, 0, 0], port).into();
            match UdpSocket::bind(addr).await {
                Ok(socket) => {
                    let local_addr = socket.local_addr().map_err(|cause| {
                        Error::from(ErrorKind::SendFailed {
                            to: addr,
                            cause,
                        })
                    })?;
                    log::info!("bound KRPC socket on {}", local_addr);
                    return Ok(KrpcSocket {
                        socket: tokio::sync::Mutex::new(socket),
                        local_addr,
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        log::error!(
            "failed to bind any of {} candidate ports starting at {}: {:?}",
            PORT_FALLBACK_ATTEMPTS + 1,
            preferred_port,
            last_err
        );
        Err(Error::from(ErrorKind::BindFailed {
            attempts: PORT_FALLBACK_ATTEMPTS + 1,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<usize> {
        self.socket
            .lock()
            .await
            .send_to(bytes, dest)
            .await
            .map_err(|cause| Error::from(ErrorKind::SendFailed { to: dest, cause }))
    }

    /// Receive one datagram. Oversize reads are truncated by the fixed
    /// buffer and the codec itself rejects anything past
    /// [`MAX_MESSAGE_LEN`].
    pub async fn recv_from(&self, buf: &mut [u8; MAX_MESSAGE_LEN]) -> Result<(usize, SocketAddr)> {
        self.socket.lock().await.recv_from(buf).await.map_err(|cause| {
            Error::from(ErrorKind::RecvFailed {
                on: self.local_addr,
                cause,
            })
        })
    }
}
