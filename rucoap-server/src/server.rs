//! CoAP endpoint dispatch for reliable transports.
//!
//! The receive pipeline classifies every inbound packet as a ping, a
//! signaling message, a request or a response, answers the signaling
//! sub-protocol itself, routes requests to the handler and matches responses
//! to pending transactions.

use crate::config::EndpointConfig;
use crate::error::ServerError;
use crate::handler::RequestHandler;
use crate::transaction::{TransactionCallback, TransactionId, Transactions};
use crate::transport::Transport;
use bytes::Bytes;
use dashmap::DashMap;
use rucoap_packet::{tcp, Code, Packet, PacketCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct EndpointStats {
    pub requests_total: AtomicU64,
    pub responses_matched: AtomicU64,
    pub responses_orphaned: AtomicU64,
    pub malformed_total: AtomicU64,
}

/// A CoAP endpoint over a reliable transport.
///
/// Symmetric by design: it serves inbound requests through the configured
/// handler and originates outbound requests through [`make_request`], pairing
/// responses to them by (token, remote).
///
/// [`make_request`]: TcpEndpoint::make_request
pub struct TcpEndpoint {
    transport: Arc<dyn Transport>,
    handler: Option<Arc<dyn RequestHandler>>,
    config: EndpointConfig,
    transactions: Transactions,
    decoders: DashMap<SocketAddr, tcp::Decoder>,
    token_counter: AtomicU64,
    stats: EndpointStats,
}

impl TcpEndpoint {
    pub fn new(config: EndpointConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handler: None,
            config,
            transactions: Transactions::new(),
            decoders: DashMap::new(),
            token_counter: AtomicU64::new(0),
            stats: EndpointStats::default(),
        }
    }

    /// Installs the request handler. Without one, every request is answered
    /// with 4.04 Not Found.
    pub fn with_handler(mut self, handler: impl RequestHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Feeds bytes received from a remote into the endpoint. Complete
    /// packets are dispatched in arrival order; a partial packet stays
    /// buffered until more bytes arrive.
    pub async fn on_received(&self, remote: SocketAddr, data: &[u8]) {
        let packets = {
            let mut decoder = self.decoders.entry(remote).or_default();
            decoder.extend(data);

            let mut packets = Vec::new();
            loop {
                match decoder.decode(remote) {
                    Ok(Some(packet)) => packets.push(packet),
                    Ok(None) => {
                        if decoder.buffered() > self.config.max_message_size {
                            tracing::warn!(
                                "[{}] {} bytes buffered without a complete message, dropping buffer",
                                remote,
                                decoder.buffered()
                            );
                            self.stats.malformed_total.fetch_add(1, Ordering::Relaxed);
                            decoder.clear();
                        }
                        break;
                    }
                    Err(e) => {
                        // The stream framing cannot be resynchronized after
                        // a bad prefix; drop whatever is buffered.
                        tracing::warn!("[{}] malformed packet dropped: {}", remote, e);
                        self.stats.malformed_total.fetch_add(1, Ordering::Relaxed);
                        decoder.clear();
                        break;
                    }
                }
            }
            packets
        };

        for packet in packets {
            self.dispatch(packet).await;
        }
    }

    /// Fails every transaction bound to `remote` with a connection-closed
    /// error and forgets its receive buffer.
    pub fn on_disconnected(&self, remote: SocketAddr) {
        self.decoders.remove(&remote);

        let drained = self.transactions.drain_remote(remote);
        if !drained.is_empty() {
            tracing::debug!("[{}] failing {} pending transactions", remote, drained.len());
        }
        for (_, callback) in drained {
            callback.complete(Err(ServerError::ConnectionClosed(remote)));
        }

        tracing::info!("[{}] disconnected", remote);
    }

    /// Sends a request and registers `callback` for its response.
    ///
    /// The transaction is registered before the send so a fast response
    /// cannot race past it. All failure is reported through the callback:
    /// when the send fails, the transaction is removed and the callback
    /// fails exactly once with the transport error, and its sent hook never
    /// fires.
    pub async fn make_request(&self, packet: Packet, callback: TransactionCallback) {
        let remote = packet.remote();
        if self.transactions.len() >= self.config.max_pending_transactions {
            tracing::warn!("[{}] transaction limit reached, refusing request", remote);
            callback.complete(Err(ServerError::TransactionLimit));
            return;
        }

        let id = TransactionId::of(&packet);
        self.transactions.insert(id.clone(), callback);

        match self.send_packet(&packet).await {
            Ok(()) => {
                // Taken out of the map before it runs, so a concurrent
                // response cannot double-fire it.
                if let Some(sent) = self.transactions.take_sent_hook(&id) {
                    sent();
                }
            }
            Err(e) => {
                if let Some(callback) = self.transactions.take(&id) {
                    callback.complete(Err(e));
                }
            }
        }
    }

    /// [`make_request`](TcpEndpoint::make_request) wired to a oneshot
    /// channel.
    pub async fn request(&self, packet: Packet) -> Result<Packet, ServerError> {
        let (callback, rx) = TransactionCallback::channel();
        self.make_request(packet, callback).await;
        rx.await.map_err(|_| ServerError::Canceled)?
    }

    /// Sends a 7.02 PING with a fresh token and resolves with the 7.03 PONG.
    pub async fn ping(&self, remote: SocketAddr) -> Result<Packet, ServerError> {
        let packet = Packet::response(remote, Code::PING).with_token(self.next_token());
        self.request(packet).await
    }

    /// Number of transactions awaiting responses.
    pub fn pending_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    async fn dispatch(&self, packet: Packet) {
        match packet.code() {
            PacketCode::Empty => {
                tracing::debug!("[{}] CoAP ping received", packet.remote());
            }
            PacketCode::Code(code) if code.is_signaling() && code != Code::PONG => {
                self.handle_signal(packet, code).await;
            }
            PacketCode::Method(_) => {
                self.handle_request(packet).await;
            }
            // Responses, and PONG which completes a ping transaction.
            _ => {
                self.handle_response(packet);
            }
        }
    }

    async fn handle_signal(&self, packet: Packet, code: Code) {
        let remote = packet.remote();
        if code == Code::PING {
            tracing::debug!("[{}] ping, sending pong", remote);
            let pong = Packet::response(remote, Code::PONG).with_token(packet.token().clone());
            if let Err(e) = self.send_packet(&pong).await {
                tracing::warn!("[{}] failed to send pong: {}", remote, e);
            }
        } else if code == Code::ABORT {
            tracing::info!("[{}] abort received", remote);
            self.on_disconnected(remote);
        } else {
            tracing::debug!("[{}] ignored signal message: {}", remote, code);
        }
    }

    async fn handle_request(&self, request: Packet) {
        let remote = request.remote();
        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[{}] request: {}", remote, request);

        let response = match &self.handler {
            Some(handler) => match handler.handle(&request) {
                Ok(response) => {
                    if response.token().is_empty() && !request.token().is_empty() {
                        response.with_token(request.token().clone())
                    } else {
                        response
                    }
                }
                Err(e) => {
                    tracing::warn!("[{}] handler failed: {}", remote, e);
                    request.response_to(Code::INTERNAL_SERVER_ERROR)
                }
            },
            None => request.response_to(Code::NOT_FOUND),
        };

        if let Err(e) = self.send_packet(&response).await {
            tracing::warn!("[{}] failed to send response: {}", remote, e);
        }
    }

    fn handle_response(&self, packet: Packet) {
        let remote = packet.remote();
        let id = TransactionId::of(&packet);
        match self.transactions.take(&id) {
            Some(callback) => {
                self.stats.responses_matched.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[{}] response matched: {}", remote, packet);
                callback.complete(Ok(packet));
            }
            None => {
                self.stats.responses_orphaned.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[{}] response without transaction dropped: {}", remote, packet);
            }
        }
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ServerError> {
        let data = tcp::encode(packet)?;
        tracing::debug!("[{}] sending {} bytes: {}", packet.remote(), data.len(), packet);
        self.transport
            .send(data.freeze(), packet.remote())
            .await
            .map_err(ServerError::Transport)
    }

    /// Fresh non-empty token from a process-local counter, minimal width.
    fn next_token(&self) -> Bytes {
        let n = self.token_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = n.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
        Bytes::copy_from_slice(&bytes[skip..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SendFuture;
    use rucoap_packet::Method;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .try_init();
    }

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<(Bytes, SocketAddr)>>,
        fail: AtomicBool,
    }

    impl MockTransport {
        fn sent_packets(&self) -> Vec<Packet> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(data, remote)| {
                    let mut decoder = tcp::Decoder::new();
                    decoder.extend(data);
                    decoder.decode(*remote).unwrap().unwrap()
                })
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn send(&self, data: Bytes, remote: SocketAddr) -> SendFuture<'_> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "send failed",
                    ));
                }
                self.sent.lock().unwrap().push((data, remote));
                Ok(())
            })
        }
    }

    fn endpoint() -> (Arc<MockTransport>, TcpEndpoint) {
        init_tracing();
        let transport = Arc::new(MockTransport::default());
        let endpoint = TcpEndpoint::new(EndpointConfig::default(), transport.clone());
        (transport, endpoint)
    }

    fn remote(port: u16) -> SocketAddr {
        format!("192.0.2.1:{port}").parse().unwrap()
    }

    async fn feed(endpoint: &TcpEndpoint, packet: &Packet) {
        let data = tcp::encode(packet).unwrap();
        endpoint.on_received(packet.remote(), &data).await;
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let (transport, endpoint) = endpoint();
        let ping = Packet::response(remote(1), Code::PING).with_token(&[0x01][..]);

        feed(&endpoint, &ping).await;

        let sent = transport.sent_packets();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code().code().unwrap(), Code::PONG);
        assert_eq!(sent[0].token().as_ref(), &[0x01]);
        assert_eq!(sent[0].remote(), remote(1));
        // Answering a ping creates no transaction.
        assert_eq!(endpoint.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_message_is_ignored() {
        let (transport, endpoint) = endpoint();
        feed(&endpoint, &Packet::new(remote(1))).await;

        assert!(transport.sent_packets().is_empty());
        assert_eq!(endpoint.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_csm_and_release_are_ignored() {
        let (transport, endpoint) = endpoint();
        feed(&endpoint, &Packet::response(remote(1), Code::CSM)).await;
        feed(&endpoint, &Packet::response(remote(1), Code::RELEASE)).await;

        assert!(transport.sent_packets().is_empty());
    }

    fn content_handler(request: &Packet) -> Result<Packet, ServerError> {
        Ok(request
            .response_to(Code::CONTENT)
            .with_payload(&b"22.5"[..]))
    }

    fn failing_handler(_request: &Packet) -> Result<Packet, ServerError> {
        Err(ServerError::Handler("boom".into()))
    }

    fn valid_handler(request: &Packet) -> Result<Packet, ServerError> {
        Ok(request.response_to(Code::VALID))
    }

    #[tokio::test]
    async fn test_request_routed_to_handler() {
        let (transport, endpoint) = endpoint();
        let endpoint = endpoint.with_handler(content_handler);

        let mut request = Packet::request(remote(1), Method::Get).with_token(&[0xAA][..]);
        request.options_mut().set_uri_path("/sensors/temp").unwrap();
        feed(&endpoint, &request).await;

        let sent = transport.sent_packets();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code().code().unwrap(), Code::CONTENT);
        assert_eq!(sent[0].token().as_ref(), &[0xAA]);
        assert_eq!(sent[0].payload().as_ref(), b"22.5");
        assert_eq!(endpoint.stats().requests_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_yields_internal_error() {
        let (transport, endpoint) = endpoint();
        let endpoint = endpoint.with_handler(failing_handler);

        let request = Packet::request(remote(1), Method::Put).with_token(&[0x05][..]);
        feed(&endpoint, &request).await;

        let sent = transport.sent_packets();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code().code().unwrap(), Code::INTERNAL_SERVER_ERROR);
        assert_eq!(sent[0].token().as_ref(), &[0x05]);
    }

    #[tokio::test]
    async fn test_without_handler_yields_not_found() {
        let (transport, endpoint) = endpoint();
        feed(&endpoint, &Packet::request(remote(1), Method::Get)).await;

        let sent = transport.sent_packets();
        assert_eq!(sent[0].code().code().unwrap(), Code::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_response_completes_transaction() {
        let (_transport, endpoint) = endpoint();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let o2 = order.clone();
        let callback = TransactionCallback::new(move |result| {
            let packet = result.unwrap();
            assert_eq!(packet.code().code().unwrap(), Code::CONTENT);
            o1.lock().unwrap().push("response");
        })
        .with_on_sent(move || o2.lock().unwrap().push("sent"));

        let request = Packet::request(remote(1), Method::Get).with_token(&[0x11][..]);
        endpoint.make_request(request, callback).await;
        assert_eq!(endpoint.pending_count(), 1);

        let response = Packet::response(remote(1), Code::CONTENT).with_token(&[0x11][..]);
        feed(&endpoint, &response).await;

        assert_eq!(endpoint.pending_count(), 0);
        assert_eq!(*order.lock().unwrap(), vec!["sent", "response"]);
    }

    #[tokio::test]
    async fn test_orphan_response_leaves_map_alone() {
        let (_transport, endpoint) = endpoint();

        let request = Packet::request(remote(1), Method::Get).with_token(&[0x11][..]);
        endpoint
            .make_request(request, TransactionCallback::new(|_| {}))
            .await;

        // Same token, different remote: no match.
        let response = Packet::response(remote(2), Code::CONTENT).with_token(&[0x11][..]);
        feed(&endpoint, &response).await;

        assert_eq!(endpoint.pending_count(), 1);
        assert_eq!(
            endpoint.stats().responses_orphaned.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_send_failure_fails_callback_once() {
        let (transport, endpoint) = endpoint();
        transport.fail.store(true, Ordering::SeqCst);

        let sent_fired = Arc::new(AtomicBool::new(false));
        let completions = Arc::new(AtomicU64::new(0));

        let s = sent_fired.clone();
        let c = completions.clone();
        let callback = TransactionCallback::new(move |result| {
            assert!(matches!(result, Err(ServerError::Transport(_))));
            c.fetch_add(1, Ordering::SeqCst);
        })
        .with_on_sent(move || s.store(true, Ordering::SeqCst));

        let request = Packet::request(remote(1), Method::Get).with_token(&[0x22][..]);
        endpoint.make_request(request, callback).await;

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(!sent_fired.load(Ordering::SeqCst));
        assert_eq!(endpoint.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abort_drains_only_that_remote() {
        let (_transport, endpoint) = endpoint();
        let failures = Arc::new(Mutex::new(Vec::new()));

        for (token, port) in [(b'A', 1u16), (b'B', 1), (b'C', 2)] {
            let f = failures.clone();
            let callback = TransactionCallback::new(move |result| match result {
                Err(ServerError::ConnectionClosed(addr)) => f.lock().unwrap().push((token, addr)),
                other => panic!("unexpected completion: {other:?}"),
            });
            let request =
                Packet::request(remote(port), Method::Get).with_token(vec![token]);
            endpoint.make_request(request, callback).await;
        }
        assert_eq!(endpoint.pending_count(), 3);

        feed(&endpoint, &Packet::response(remote(1), Code::ABORT)).await;

        let mut failed = failures.lock().unwrap().clone();
        failed.sort();
        assert_eq!(failed, vec![(b'A', remote(1)), (b'B', remote(1))]);
        assert_eq!(endpoint.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_request_convenience_and_ping() {
        let (transport, endpoint) = endpoint();
        let endpoint = Arc::new(endpoint);

        let ep = endpoint.clone();
        let pong_task = tokio::spawn(async move { ep.ping(remote(1)).await });

        // Wait for the ping to hit the transport, then answer it.
        let token = loop {
            let sent = transport.sent_packets();
            if let Some(packet) = sent.first() {
                assert_eq!(packet.code().code().unwrap(), Code::PING);
                break packet.token().clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        };

        let pong = Packet::response(remote(1), Code::PONG).with_token(token);
        feed(&endpoint, &pong).await;

        let result = pong_task.await.unwrap().unwrap();
        assert_eq!(result.code().code().unwrap(), Code::PONG);
        assert_eq!(endpoint.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_bytes_buffered_until_complete() {
        let (transport, endpoint) = endpoint();
        let endpoint = endpoint.with_handler(valid_handler);

        let mut request = Packet::request(remote(1), Method::Get).with_token(&[0x33][..]);
        request.options_mut().set_uri_path("/a/b/c").unwrap();
        let data = tcp::encode(&request).unwrap();

        endpoint.on_received(remote(1), &data[..3]).await;
        assert!(transport.sent_packets().is_empty());

        endpoint.on_received(remote(1), &data[3..]).await;
        let sent = transport.sent_packets();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code().code().unwrap(), Code::VALID);
    }

    #[tokio::test]
    async fn test_malformed_bytes_dropped() {
        let (transport, endpoint) = endpoint();

        // TKL 9 is reserved; everything buffered is discarded.
        endpoint.on_received(remote(1), &[0x09, 0x45, 0x00]).await;

        assert!(transport.sent_packets().is_empty());
        assert_eq!(endpoint.stats().malformed_total.load(Ordering::Relaxed), 1);

        // The connection keeps working afterwards.
        feed(
            &endpoint,
            &Packet::response(remote(1), Code::PING).with_token(&[0x02][..]),
        )
        .await;
        assert_eq!(transport.sent_packets().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_buffer_dropped() {
        let transport = Arc::new(MockTransport::default());
        let endpoint = TcpEndpoint::new(
            EndpointConfig::default().with_max_message_size(16),
            transport.clone(),
        );

        // Declared length 100, only a prefix delivered: exceeds the cap
        // without completing.
        let packet = Packet::response(remote(1), Code::CONTENT).with_payload(vec![0u8; 99]);
        let data = tcp::encode(&packet).unwrap();
        endpoint.on_received(remote(1), &data[..40]).await;

        assert_eq!(endpoint.stats().malformed_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_transaction_limit() {
        let transport = Arc::new(MockTransport::default());
        let endpoint = TcpEndpoint::new(
            EndpointConfig::default().with_max_pending_transactions(1),
            transport.clone(),
        );

        endpoint
            .make_request(
                Packet::request(remote(1), Method::Get).with_token(&[0x01][..]),
                TransactionCallback::new(|_| {}),
            )
            .await;

        let refused = Arc::new(AtomicBool::new(false));
        let r = refused.clone();
        endpoint
            .make_request(
                Packet::request(remote(1), Method::Get).with_token(&[0x02][..]),
                TransactionCallback::new(move |result| {
                    assert!(matches!(result, Err(ServerError::TransactionLimit)));
                    r.store(true, Ordering::SeqCst);
                }),
            )
            .await;

        assert!(refused.load(Ordering::SeqCst));
        assert_eq!(endpoint.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_with_no_transactions() {
        let (_transport, endpoint) = endpoint();
        endpoint.on_disconnected(remote(9));
        assert_eq!(endpoint.pending_count(), 0);
    }
}
