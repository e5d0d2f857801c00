//! Client half: casts, awaited calls and the in-flight call table.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{CallId, ClientTransport, Envelope, Reply};
use crate::error::{RemoteError, Result, VoxError};

type PendingReply<R> = oneshot::Sender<Result<Option<R>>>;

/// Correlation id → pending result handle.
struct InflightTable<R> {
    pending: Mutex<HashMap<CallId, PendingReply<R>>>,
}

impl<R> InflightTable<R> {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, id: CallId, tx: PendingReply<R>) {
        self.pending.lock().insert(id, tx);
    }

    fn remove(&self, id: CallId) -> Option<PendingReply<R>> {
        self.pending.lock().remove(&id)
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }

    fn settle(&self, id: CallId, result: Option<R>, error: Option<RemoteError>) {
        let Some(tx) = self.remove(id) else {
            warn!(message_id = id, "received reply for unknown call id");
            return;
        };
        let outcome = match error {
            Some(remote) => Err(VoxError::from(remote)),
            None => Ok(result),
        };
        // The caller may have stopped waiting; nothing to do then.
        let _ = tx.send(outcome);
    }

    fn reject_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), "rejecting in-flight calls: server disconnected");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(VoxError::Disconnected));
        }
    }
}

/// Sending side of a request/response/push channel.
///
/// Cheap to clone; all clones share one id sequence and call table. The
/// server sees the channel close once every clone has been dropped.
pub struct RpcClient<M, P, R> {
    outbound: mpsc::UnboundedSender<Envelope<M, P>>,
    inflight: Arc<InflightTable<R>>,
    next_id: Arc<AtomicU64>,
}

impl<M, P, R> Clone for RpcClient<M, P, R> {
    fn clone(&self) -> Self {
        Self {
            outbound: self.outbound.clone(),
            inflight: Arc::clone(&self.inflight),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<M, P, R> RpcClient<M, P, R>
where
    M: Copy + Display + Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    /// Wrap a transport and spawn the task that routes replies and pushes.
    ///
    /// Must be called from within a Tokio runtime. `on_push` runs on that
    /// task for every message that carries no correlation id.
    pub fn connect<F>(transport: ClientTransport<M, P, R>, on_push: F) -> Self
    where
        F: Fn(R) + Send + 'static,
    {
        let ClientTransport { outbound, inbound } = transport;
        let inflight = Arc::new(InflightTable::new());
        tokio::spawn(route_inbound(inbound, Arc::clone(&inflight), on_push));
        Self {
            outbound,
            inflight,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fire-and-forget. Never fails; a closed channel is only logged.
    pub fn cast(&self, method: M, params: Vec<P>) {
        if self.outbound.send(Envelope::cast(method, params)).is_err() {
            warn!(%method, "cast dropped: server disconnected");
        }
    }

    /// Send a call and wait for its reply.
    ///
    /// The call is registered and sent before this returns; the future only
    /// waits for the reply.
    pub fn call(&self, method: M, params: Vec<P>) -> impl Future<Output = Result<Option<R>>> {
        let (_, pending) = self.begin_call(method, params);
        async move { pending.await.map_err(|_| VoxError::Disconnected)? }
    }

    /// Like [`call`](Self::call), but gives up after `timeout`.
    ///
    /// On expiry the table entry is dropped, so a late reply is reported as
    /// an unknown id.
    pub fn call_with_timeout(
        &self,
        method: M,
        params: Vec<P>,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<R>>> {
        let (id, pending) = self.begin_call(method, params);
        let inflight = Arc::clone(&self.inflight);
        async move {
            match tokio::time::timeout(timeout, pending).await {
                Ok(reply) => reply.map_err(|_| VoxError::Disconnected)?,
                Err(_) => {
                    inflight.remove(id);
                    warn!(%method, message_id = id, ?timeout, "call timed out");
                    Err(VoxError::Timeout(timeout))
                }
            }
        }
    }

    /// Number of calls still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    fn begin_call(
        &self,
        method: M,
        params: Vec<P>,
    ) -> (CallId, oneshot::Receiver<Result<Option<R>>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.inflight.insert(id, tx);
        debug!(%method, message_id = id, "call");
        if self.outbound.send(Envelope::call(method, params, id)).is_err() {
            warn!(%method, message_id = id, "call dropped: server disconnected");
            // Dropping the sender resolves the receiver with Disconnected.
            self.inflight.remove(id);
        }
        (id, rx)
    }
}

async fn route_inbound<R, F>(
    mut inbound: mpsc::UnboundedReceiver<Reply<R>>,
    inflight: Arc<InflightTable<R>>,
    on_push: F,
) where
    F: Fn(R),
{
    while let Some(reply) = inbound.recv().await {
        let Reply {
            result,
            error,
            message_id,
        } = reply;
        match message_id {
            Some(id) => inflight.settle(id, result, error),
            None => match result {
                Some(payload) => on_push(payload),
                None => debug!(?error, "ignoring message without id or payload"),
            },
        }
    }
    inflight.reject_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;
    use crate::rpc::{channel, ServerTransport};

    type TestClient = RpcClient<&'static str, u32, String>;

    fn connect() -> (
        TestClient,
        ServerTransport<&'static str, u32, String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (client, server) = channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let rpc = RpcClient::connect(client, move |payload| {
            let _ = push_tx.send(payload);
        });
        (rpc, server, push_rx)
    }

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let (rpc, mut server, _pushes) = connect();
        let _first = rpc.call("a", vec![]);
        let _second = rpc.call("b", vec![]);
        let first = server.inbound.recv().await.expect("first envelope");
        let second = server.inbound.recv().await.expect("second envelope");
        assert_eq!(first.message_id, Some(1));
        assert_eq!(second.message_id, Some(2));
        assert_eq!(rpc.in_flight(), 2);
    }

    #[tokio::test]
    async fn replies_match_by_id_not_order() {
        let (rpc, mut server, _pushes) = connect();
        let first = rpc.call("a", vec![1]);
        let second = rpc.call("b", vec![2]);
        let a = server.inbound.recv().await.expect("a");
        let b = server.inbound.recv().await.expect("b");

        server
            .outbound
            .send(Reply::success(b.message_id.unwrap(), Some("second".into())))
            .unwrap();
        server
            .outbound
            .send(Reply::success(a.message_id.unwrap(), Some("first".into())))
            .unwrap();

        assert_eq!(first.await.unwrap().as_deref(), Some("first"));
        assert_eq!(second.await.unwrap().as_deref(), Some("second"));
        assert_eq!(rpc.in_flight(), 0);
    }

    #[tokio::test]
    async fn remote_error_rejects_only_its_call() {
        let (rpc, mut server, _pushes) = connect();
        let failing = rpc.call("bad", vec![]);
        let fine = rpc.call("good", vec![]);
        let bad = server.inbound.recv().await.unwrap();
        let good = server.inbound.recv().await.unwrap();

        server
            .outbound
            .send(Reply::failure(
                bad.message_id.unwrap(),
                RemoteError::new(RemoteErrorKind::Engine, "nope"),
            ))
            .unwrap();
        server
            .outbound
            .send(Reply::success(good.message_id.unwrap(), None))
            .unwrap();

        assert!(matches!(failing.await, Err(VoxError::Remote(_))));
        assert!(fine.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pushes_and_unknown_ids_do_not_touch_the_table() {
        let (rpc, server, mut pushes) = connect();
        let pending = rpc.call("a", vec![]);

        server.outbound.send(Reply::success(99, None)).unwrap();
        server.outbound.send(Reply::push("hello".into())).unwrap();

        assert_eq!(pushes.recv().await.as_deref(), Some("hello"));
        assert_eq!(rpc.in_flight(), 1);

        server.outbound.send(Reply::success(1, None)).unwrap();
        assert!(pending.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn casts_carry_no_id_and_never_register() {
        let (rpc, mut server, _pushes) = connect();
        rpc.cast("processAudioChunk", vec![7]);
        let envelope = server.inbound.recv().await.unwrap();
        assert!(envelope.message_id.is_none());
        assert_eq!(envelope.params, vec![7]);
        assert_eq!(rpc.in_flight(), 0);
    }

    #[tokio::test]
    async fn timeout_removes_the_entry() {
        let (rpc, mut server, _pushes) = connect();
        let result = rpc
            .call_with_timeout("slow", vec![], Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(VoxError::Timeout(_))));
        assert_eq!(rpc.in_flight(), 0);

        // The late reply is discarded as an unknown id.
        let envelope = server.inbound.recv().await.unwrap();
        server
            .outbound
            .send(Reply::success(envelope.message_id.unwrap(), None))
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(rpc.in_flight(), 0);
    }

    #[tokio::test]
    async fn server_hangup_rejects_pending_calls() {
        let (rpc, server, _pushes) = connect();
        let pending = rpc.call("never", vec![]);
        drop(server);
        assert!(matches!(pending.await, Err(VoxError::Disconnected)));
        assert_eq!(rpc.in_flight(), 0);

        // Calls after hangup fail without waiting.
        assert!(matches!(
            rpc.call("late", vec![]).await,
            Err(VoxError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn steady_call_stream_keeps_table_bounded() {
        let (rpc, mut server, _pushes) = connect();
        for _ in 0..100 {
            let pending = rpc.call("tick", vec![]);
            let envelope = server.inbound.recv().await.unwrap();
            server
                .outbound
                .send(Reply::success(envelope.message_id.unwrap(), None))
                .unwrap();
            pending.await.unwrap();
            assert_eq!(rpc.in_flight(), 0);
        }
    }
}
