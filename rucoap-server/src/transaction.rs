//! Delayed transaction bookkeeping.
//!
//! An outstanding request is keyed by its token and the remote endpoint; the
//! matching response arrives later on the same connection. The table is the
//! only shared mutable state in the endpoint and supports concurrent insert,
//! take and drain.

use crate::error::ServerError;
use bytes::Bytes;
use dashmap::DashMap;
use rucoap_packet::Packet;
use std::fmt;
use std::net::SocketAddr;

/// Identifies an outstanding request: token plus remote endpoint.
///
/// The token may be empty; colliding empty-token requests to the same remote
/// are the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId {
    token: Bytes,
    remote: SocketAddr,
}

impl TransactionId {
    pub fn new(token: Bytes, remote: SocketAddr) -> Self {
        Self { token, remote }
    }

    /// The id a packet's response will carry.
    pub fn of(packet: &Packet) -> Self {
        Self::new(packet.token().clone(), packet.remote())
    }

    pub fn token(&self) -> &Bytes {
        &self.token
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }
}

type OnSent = Box<dyn FnOnce() + Send>;
type OnComplete = Box<dyn FnOnce(Result<Packet, ServerError>) + Send>;

/// Completion slots for an outstanding request: an optional sent-notification
/// and the one-shot completion.
///
/// The completion consumes the callback; if the sent hook has not fired by
/// the time a response completes the transaction, it runs first, so `on_sent`
/// is always observable before the response. A failed completion never fires
/// the sent hook.
pub struct TransactionCallback {
    on_sent: Option<OnSent>,
    on_complete: Option<OnComplete>,
}

impl TransactionCallback {
    pub fn new(on_complete: impl FnOnce(Result<Packet, ServerError>) + Send + 'static) -> Self {
        Self {
            on_sent: None,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    pub fn with_on_sent(mut self, on_sent: impl FnOnce() + Send + 'static) -> Self {
        self.on_sent = Some(Box::new(on_sent));
        self
    }

    /// A callback wired to a oneshot channel, for await-style callers.
    pub fn channel() -> (
        Self,
        tokio::sync::oneshot::Receiver<Result<Packet, ServerError>>,
    ) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let callback = Self::new(move |result| {
            let _ = tx.send(result);
        });
        (callback, rx)
    }

    pub(crate) fn take_sent_hook(&mut self) -> Option<OnSent> {
        self.on_sent.take()
    }

    pub(crate) fn complete(mut self, result: Result<Packet, ServerError>) {
        if result.is_ok() {
            if let Some(sent) = self.on_sent.take() {
                sent();
            }
        }
        if let Some(complete) = self.on_complete.take() {
            complete(result);
        }
    }
}

// Safety: the boxed `FnOnce`s are only ever invoked through an owned
// `TransactionCallback` (`complete`) or via `&mut` access (`take_sent_hook`);
// no code path calls them through a shared `&TransactionCallback`, so sharing
// the type across threads is sound even though `Box<dyn FnOnce>` is not
// itself `Sync`.
unsafe impl Sync for TransactionCallback {}

impl fmt::Debug for TransactionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCallback")
            .field("on_sent", &self.on_sent.is_some())
            .finish()
    }
}

/// Concurrent table of outstanding requests.
#[derive(Debug, Default)]
pub struct Transactions {
    inner: DashMap<TransactionId, TransactionCallback>,
}

impl Transactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request. An existing entry under the same id is
    /// replaced and its callback dropped unfired.
    pub fn insert(&self, id: TransactionId, callback: TransactionCallback) {
        self.inner.insert(id, callback);
    }

    /// Atomically removes and returns the callback for `id`.
    pub fn take(&self, id: &TransactionId) -> Option<TransactionCallback> {
        self.inner.remove(id).map(|(_, callback)| callback)
    }

    /// Atomically removes every transaction bound to `remote`.
    pub fn drain_remote(&self, remote: SocketAddr) -> Vec<(TransactionId, TransactionCallback)> {
        let ids: Vec<TransactionId> = self
            .inner
            .iter()
            .filter(|entry| entry.key().remote() == remote)
            .map(|entry| entry.key().clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.inner.remove(&id))
            .collect()
    }

    /// Removes and returns the sent hook of a pending transaction, leaving
    /// the transaction in place.
    pub(crate) fn take_sent_hook(&self, id: &TransactionId) -> Option<OnSent> {
        self.inner
            .get_mut(id)
            .and_then(|mut entry| entry.take_sent_hook())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn remote(port: u16) -> SocketAddr {
        format!("192.0.2.1:{port}").parse().unwrap()
    }

    fn packet(port: u16) -> Packet {
        Packet::new(remote(port))
    }

    #[test]
    fn test_id_equality_over_both_fields() {
        let a = TransactionId::new(Bytes::from_static(&[1]), remote(1));
        let b = TransactionId::new(Bytes::from_static(&[1]), remote(1));
        let other_token = TransactionId::new(Bytes::from_static(&[2]), remote(1));
        let other_remote = TransactionId::new(Bytes::from_static(&[1]), remote(2));

        assert_eq!(a, b);
        assert_ne!(a, other_token);
        assert_ne!(a, other_remote);
    }

    #[test]
    fn test_take_is_single_shot() {
        let transactions = Transactions::new();
        let id = TransactionId::new(Bytes::from_static(&[1]), remote(1));
        transactions.insert(id.clone(), TransactionCallback::new(|_| {}));

        assert!(transactions.take(&id).is_some());
        assert!(transactions.take(&id).is_none());
        assert!(transactions.is_empty());
    }

    #[test]
    fn test_drain_remote_leaves_other_remotes() {
        let transactions = Transactions::new();
        for (token, port) in [(1u8, 1u16), (2, 1), (3, 2)] {
            transactions.insert(
                TransactionId::new(Bytes::copy_from_slice(&[token]), remote(port)),
                TransactionCallback::new(|_| {}),
            );
        }

        let drained = transactions.drain_remote(remote(1));
        assert_eq!(drained.len(), 2);
        assert_eq!(transactions.len(), 1);
        assert!(transactions
            .take(&TransactionId::new(Bytes::from_static(&[3]), remote(2)))
            .is_some());
    }

    #[test]
    fn test_sent_hook_fires_before_completion() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        let o2 = order.clone();
        let callback = TransactionCallback::new(move |result| {
            assert!(result.is_ok());
            o1.lock().unwrap().push("response");
        })
        .with_on_sent(move || o2.lock().unwrap().push("sent"));

        callback.complete(Ok(packet(1)));
        assert_eq!(*order.lock().unwrap(), vec!["sent", "response"]);
    }

    #[test]
    fn test_failed_completion_skips_sent_hook() {
        let sent = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let s = sent.clone();
        let c = completed.clone();
        let callback = TransactionCallback::new(move |result| {
            assert!(result.is_err());
            c.fetch_add(1, Ordering::SeqCst);
        })
        .with_on_sent(move || {
            s.fetch_add(1, Ordering::SeqCst);
        });

        callback.complete(Err(ServerError::ConnectionClosed(remote(1))));
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_external_sent_hook_not_repeated() {
        let sent = Arc::new(AtomicUsize::new(0));
        let transactions = Transactions::new();
        let id = TransactionId::new(Bytes::from_static(&[9]), remote(1));

        let s = sent.clone();
        transactions.insert(
            id.clone(),
            TransactionCallback::new(|_| {}).with_on_sent(move || {
                s.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let hook = transactions.take_sent_hook(&id).unwrap();
        hook();
        assert!(transactions.take_sent_hook(&id).is_none());

        // Completion must not fire the hook a second time.
        transactions.take(&id).unwrap().complete(Ok(packet(1)));
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_callback() {
        let (callback, rx) = TransactionCallback::channel();
        callback.complete(Ok(packet(7)));
        let result = rx.await.unwrap();
        assert_eq!(result.unwrap().remote(), remote(7));
    }
}
