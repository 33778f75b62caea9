use crate::channel::DatagramChannel;
use std::net::SocketAddr;
use std::sync::Arc;

/// Relays query bytes to the upstream resolver chosen at construction.
/// Replies come back through the engine's receive loop, not through here.
pub struct UpstreamForwarder {
    upstream: SocketAddr,
    channel: Arc<dyn DatagramChannel>,
}

impl UpstreamForwarder {
    pub fn new(upstream: SocketAddr, channel: Arc<dyn DatagramChannel>) -> Self {
        Self { upstream, channel }
    }

    pub fn upstream(&self) -> SocketAddr { self.upstream }

    /// Sends `query` unchanged as exactly one datagram. No retry.
    pub async fn forward(&self, query: &[u8]) -> std::io::Result<()> {
        self.channel.send_to(query, self.upstream).await?;
        tracing::debug!("Forwarded {} bytes to {}", query.len(), self.upstream);
        Ok(())
    }
}
