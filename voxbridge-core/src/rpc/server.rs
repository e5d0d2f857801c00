//! Server half: routes envelopes to handlers registered per method token.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{CallId, Envelope, Reply};
use crate::error::{RemoteError, Result, VoxError};

/// Future returned by a handler that completes later.
pub type HandlerFuture<'a, R> = Pin<Box<dyn Future<Output = Result<Option<R>>> + 'a>>;

/// What a handler produced.
pub enum Outcome<'a, R> {
    /// No value; a call still gets an empty success reply.
    Nothing,
    Value(R),
    Deferred(HandlerFuture<'a, R>),
}

/// A method implementation. Plain `fn` items so the table stays a closed,
/// construction-time mapping.
pub type Handler<S, P, R> = for<'a> fn(&'a mut S, Vec<P>) -> Result<Outcome<'a, R>>;

/// Sends replies and unsolicited pushes back to the client.
pub struct Pusher<R> {
    outbound: mpsc::UnboundedSender<Reply<R>>,
}

impl<R> Clone for Pusher<R> {
    fn clone(&self) -> Self {
        Self {
            outbound: self.outbound.clone(),
        }
    }
}

impl<R> Pusher<R> {
    pub fn new(outbound: mpsc::UnboundedSender<Reply<R>>) -> Self {
        Self { outbound }
    }

    /// Deliver a payload to the client's push handler.
    ///
    /// Returns `false` if the client has gone away.
    pub fn push(&self, payload: R) -> bool {
        let delivered = self.outbound.send(Reply::push(payload)).is_ok();
        if !delivered {
            warn!("push dropped: client disconnected");
        }
        delivered
    }

    fn reply(&self, id: CallId, outcome: std::result::Result<Option<R>, RemoteError>) {
        let reply = match outcome {
            Ok(result) => Reply::success(id, result),
            Err(error) => Reply::failure(id, error),
        };
        if self.outbound.send(reply).is_err() {
            warn!(message_id = id, "reply dropped: client disconnected");
        }
    }
}

/// Dispatches envelopes to a service `S` one at a time, in arrival order.
pub struct RpcServer<S, M, P, R> {
    service: S,
    handlers: HashMap<M, Handler<S, P, R>>,
    pusher: Pusher<R>,
    _params: PhantomData<fn(P)>,
}

impl<S, M, P, R> RpcServer<S, M, P, R>
where
    M: Copy + Eq + Hash + Display,
{
    pub fn new(service: S, pusher: Pusher<R>) -> Self {
        Self {
            service,
            handlers: HashMap::new(),
            pusher,
            _params: PhantomData,
        }
    }

    /// Register the handler for `method`, replacing any previous one.
    pub fn register(mut self, method: M, handler: Handler<S, P, R>) -> Self {
        self.handlers.insert(method, handler);
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    /// Serve until every client sender has been dropped, then hand the
    /// service back.
    pub async fn serve(mut self, mut inbound: mpsc::UnboundedReceiver<Envelope<M, P>>) -> S {
        info!("rpc server started");
        while let Some(envelope) = inbound.recv().await {
            self.dispatch(envelope).await;
        }
        info!("rpc server stopped: client hung up");
        self.service
    }

    /// Handle one envelope to completion.
    ///
    /// Calls always produce exactly one reply; casts never produce one.
    pub async fn dispatch(&mut self, envelope: Envelope<M, P>) {
        let Envelope {
            method,
            params,
            message_id,
        } = envelope;
        debug!(%method, ?message_id, "dispatching");

        let outcome = self.invoke(method, params).await;
        match (message_id, outcome) {
            (Some(id), Ok(result)) => self.pusher.reply(id, Ok(result)),
            (Some(id), Err(e)) => {
                warn!(%method, message_id = id, "call failed: {e}");
                self.pusher.reply(id, Err(RemoteError::from(&e)));
            }
            // Cast results are discarded.
            (None, Ok(_)) => {}
            (None, Err(VoxError::MethodNotFound(name))) => {
                warn!(method = %name, "cast to unknown method dropped");
            }
            (None, Err(e)) => warn!(%method, "cast failed: {e}"),
        }
    }

    async fn invoke(&mut self, method: M, params: Vec<P>) -> Result<Option<R>> {
        let handler = *self
            .handlers
            .get(&method)
            .ok_or_else(|| VoxError::MethodNotFound(method.to_string()))?;
        match handler(&mut self.service, params)? {
            Outcome::Nothing => Ok(None),
            Outcome::Value(value) => Ok(Some(value)),
            Outcome::Deferred(pending) => pending.await,
        }
    }
}
