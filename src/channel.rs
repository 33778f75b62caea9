//! The datagram channel shared by client traffic and upstream traffic.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::UdpSocket;

/// Largest datagram the relay reads or produces.
pub const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("cannot open datagram channel on {addr}: {source}")]
    ChannelUnavailable { addr: SocketAddr, source: io::Error },
}

#[async_trait::async_trait]
pub trait DatagramChannel: Send + Sync {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

#[async_trait::async_trait]
impl DatagramChannel for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }
}

pub async fn bind(addr: SocketAddr) -> Result<UdpSocket, ChannelError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| ChannelError::ChannelUnavailable { addr, source })
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// In-memory channel: inbound datagrams are pushed by the test, outbound
    /// ones are captured for inspection.
    pub struct MockChannel {
        inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
        inbound_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
        sent: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
        fail_sends: AtomicBool,
    }

    impl MockChannel {
        pub fn new() -> Self {
            let (inbound_tx, rx) = mpsc::unbounded_channel();
            Self { inbound: tokio::sync::Mutex::new(rx), inbound_tx, sent: Mutex::new(VecDeque::new()), fail_sends: AtomicBool::new(false) }
        }

        pub fn push(&self, payload: Vec<u8>, from: SocketAddr) {
            let _ = self.inbound_tx.send((payload, from));
        }

        /// While set, every send fails with `ConnectionRefused` and is not captured.
        pub fn fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::Relaxed);
        }

        pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
            self.sent.lock().unwrap().iter().cloned().collect()
        }
    }

    #[async_trait::async_trait]
    impl DatagramChannel for MockChannel {
        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let mut rx = self.inbound.lock().await;
            match rx.recv().await {
                Some((payload, from)) => {
                    let n = payload.len().min(buf.len());
                    buf[..n].copy_from_slice(&payload[..n]);
                    Ok((n, from))
                }
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock channel closed")),
            }
        }

        async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
            if self.fail_sends.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "mock send failure"));
            }
            self.sent.lock().unwrap().push_back((buf.to_vec(), target));
            Ok(buf.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_socket_round_trip() {
        let a = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        let chan: &dyn DatagramChannel = &a;
        chan.send_to(b"ping", b_addr).await.unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, from) = DatagramChannel::recv_from(&b, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_channel_unavailable() {
        let first = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let taken = first.local_addr().unwrap();
        let err = bind(taken).await.unwrap_err();
        assert!(matches!(err, ChannelError::ChannelUnavailable { addr, .. } if addr == taken));
    }
}
