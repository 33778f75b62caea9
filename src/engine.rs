//! The receive loop: classifies each datagram and answers, forwards or
//! relays it.

use crate::channel::{DatagramChannel, MAX_DATAGRAM};
use crate::codec::{self, DecodeError};
use crate::config::RelayConfig;
use crate::forwarder::UpstreamForwarder;
use crate::metrics::{DATAGRAMS_TOTAL, PENDING_QUERIES, STORE_LEARNED_TOTAL};
use crate::pending::PendingQueries;
use crate::store::RecordStore;
use crate::types::{Message, CLASS_IN, TYPE_A};
use anyhow::Result;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    Malformed(DecodeError),
    UnmatchedResponse,
    SendFailed,
}

/// What happened to one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AnsweredLocally,
    Forwarded,
    Relayed,
    Discarded(Discard),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::AnsweredLocally => "answered",
            Outcome::Forwarded => "forwarded",
            Outcome::Relayed => "relayed",
            Outcome::Discarded(_) => "discarded",
        }
    }
}

pub struct ResolutionEngine {
    channel: Arc<dyn DatagramChannel>,
    store: RecordStore,
    forwarder: UpstreamForwarder,
    pending: PendingQueries,
    forward_only: bool,
    max_inflight: usize,
}

impl ResolutionEngine {
    pub fn new(config: &RelayConfig, channel: Arc<dyn DatagramChannel>) -> Self {
        Self {
            store: RecordStore::new(config.store_path.clone()),
            forwarder: UpstreamForwarder::new(config.upstream, channel.clone()),
            pending: PendingQueries::new(config.pending_ttl),
            forward_only: config.forward_only,
            max_inflight: config.max_inflight,
            channel,
        }
    }

    pub fn store(&self) -> &RecordStore { &self.store }

    pub fn pending(&self) -> &PendingQueries { &self.pending }

    /// Receives until `shutdown` fires. Each datagram is handled in its own
    /// task, at most `max_inflight` at a time.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.max_inflight));
        let mut buf = vec![0u8; MAX_DATAGRAM];
        info!(
            "Relay ready (upstream: {}, store: {}, forward_only: {})",
            self.forwarder.upstream(), self.store.path().display(), self.forward_only
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => permit?,
            };
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.channel.recv_from(&mut buf) => received,
            };
            let (size, src) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    continue;
                }
            };

            let payload = buf[..size].to_vec();
            let engine = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                engine.handle_datagram(&payload, src).await;
            });
        }

        info!("Relay receive loop stopped");
        Ok(())
    }

    pub async fn handle_datagram(&self, payload: &[u8], src: SocketAddr) -> Outcome {
        let outcome = match codec::decode(payload) {
            Err(e) => {
                warn!("Discarding {} byte datagram from {}: {}", payload.len(), src, e);
                Outcome::Discarded(Discard::Malformed(e))
            }
            Ok(msg) if msg.is_response => self.relay_response(payload, &msg).await,
            Ok(msg) => self.answer_query(payload, &msg, src).await,
        };
        DATAGRAMS_TOTAL.with_label_values(&[outcome.label()]).inc();
        outcome
    }

    async fn answer_query(&self, payload: &[u8], msg: &Message, src: SocketAddr) -> Outcome {
        let name = msg.question.name.to_string();
        debug!("=> [Incoming Query] TxID: {:#06x} '{}' from {}", msg.id, name, src);

        let answerable = msg.question.qtype == TYPE_A && msg.question.qclass == CLASS_IN;
        if !self.forward_only && answerable {
            let addrs = self.store.lookup(&name).await;
            if !addrs.is_empty() {
                return match self.reply(payload, &addrs, src).await {
                    Ok(()) => {
                        info!("     |-- [store] HIT '{}' ({} address(es)) TxID: {:#06x}", name, addrs.len(), msg.id);
                        Outcome::AnsweredLocally
                    }
                    Err(discard) => Outcome::Discarded(discard),
                };
            }
        }

        self.pending.register(msg.id, src);
        let result = self.forwarder.forward(payload).await;
        if let Err(e) = result {
            self.pending.take(msg.id);
            warn!("Failed to forward '{}' to {}: {}", name, self.forwarder.upstream(), e);
            return Outcome::Discarded(Discard::SendFailed);
        }
        PENDING_QUERIES.set(self.pending.approx_len() as i64);
        info!("     |-- [forward] '{}' -> {} TxID: {:#06x}", name, self.forwarder.upstream(), msg.id);
        Outcome::Forwarded
    }

    async fn relay_response(&self, payload: &[u8], msg: &Message) -> Outcome {
        let name = msg.question.name.to_string();
        let addrs = msg.addresses();

        if !addrs.is_empty() {
            let learned = self.store.record_all(&name, &addrs).await;
            STORE_LEARNED_TOTAL.inc_by(learned as u64);
        }

        let Some(requester) = self.pending.take(msg.id) else {
            debug!("No pending query for response TxID: {:#06x} '{}', discarding", msg.id, name);
            return Outcome::Discarded(Discard::UnmatchedResponse);
        };
        PENDING_QUERIES.set(self.pending.approx_len() as i64);

        match self.reply(payload, &addrs, requester).await {
            Ok(()) => {
                info!("Relayed '{}' ({} address(es)) to {} TxID: {:#06x}", name, addrs.len(), requester, msg.id);
                Outcome::Relayed
            }
            Err(discard) => Outcome::Discarded(discard),
        }
    }

    async fn reply(&self, template: &[u8], addrs: &[Ipv4Addr], to: SocketAddr) -> Result<(), Discard> {
        let resp = codec::encode_answer(template, addrs).map_err(Discard::Malformed)?;
        if let Err(e) = self.channel.send_to(&resp, to).await {
            warn!("Failed to send answer to {}: {}", to, e);
            return Err(Discard::SendFailed);
        }
        Ok(())
    }
}
