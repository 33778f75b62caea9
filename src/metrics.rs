use prometheus::{register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec, IntGauge};
use lazy_static::lazy_static;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

lazy_static! {
    pub static ref DATAGRAMS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dnsrelay_datagrams_total",
        "Counter of handled datagrams by outcome.",
        &["outcome"]
    ).unwrap();

    pub static ref STORE_LEARNED_TOTAL: IntCounter = register_int_counter!(
        "dnsrelay_store_learned_total",
        "Counter of addresses appended to the record store from upstream answers."
    ).unwrap();

    pub static ref PENDING_QUERIES: IntGauge = register_int_gauge!(
        "dnsrelay_pending_queries",
        "Number of forwarded queries awaiting an upstream response."
    ).unwrap();
}

/// Serves the text exposition format to any `GET` until `shutdown` fires.
pub async fn serve(addr: SocketAddr, shutdown: CancellationToken) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("[metrics] Failed to bind {}: {}", addr, e);
            return;
        }
    };
    tracing::info!("[metrics] Serving on {}", addr);

    loop {
        let mut stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::debug!("[metrics] accept failed: {}", e);
                    continue;
                }
            },
        };
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            if let Ok(Ok(n)) = tokio::time::timeout(std::time::Duration::from_secs(2), stream.read(&mut buf)).await {
                if n > 0 && buf.starts_with(b"GET ") {
                    let body = render();
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let mut response = header.into_bytes();
                    response.extend_from_slice(&body);
                    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), stream.write_all(&response)).await;
                    let _ = stream.shutdown().await;
                }
            }
        });
    }
}

pub fn render() -> Vec<u8> {
    use prometheus::Encoder;
    let mut buffer = Vec::new();
    if let Err(e) = prometheus::TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("[metrics] encode failed: {}", e);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_relay_metrics() {
        DATAGRAMS_TOTAL.with_label_values(&["answered"]).inc();
        STORE_LEARNED_TOTAL.inc_by(0);
        PENDING_QUERIES.set(0);
        let text = String::from_utf8(render()).unwrap();
        assert!(text.contains("dnsrelay_datagrams_total"));
        assert!(text.contains("dnsrelay_pending_queries"));
    }

    #[tokio::test]
    async fn test_serve_answers_get() {
        let scratch = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = scratch.local_addr().unwrap();
        drop(scratch);

        DATAGRAMS_TOTAL.with_label_values(&["forwarded"]).inc();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(addr, token.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /metrics HTTP/1.1\r\n\r\n").await.unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.contains("dnsrelay_datagrams_total"));

        token.cancel();
        server.await.unwrap();
    }
}
