//! Request/response/push messaging between two execution contexts.
//!
//! ## Envelopes
//!
//! ```text
//! client → server   Envelope { method, params[], messageId? }
//!                     messageId present  → call (exactly one reply)
//!                     messageId absent   → cast (never replied)
//! server → client   Reply { result?, error?, messageId? }
//!                     messageId present  → reply to the matching call
//!                     messageId absent   → push (unsolicited payload)
//! ```
//!
//! Payloads move through `tokio::sync::mpsc` channels, so anything placed in
//! `params` (audio chunks in particular) is transferred, not copied.

pub mod client;
pub mod server;

pub use client::RpcClient;
pub use server::{Handler, HandlerFuture, Outcome, Pusher, RpcServer};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::RemoteError;

/// Correlation id pairing a call with its reply.
pub type CallId = u64;

/// Outbound message from the client half.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<M, P> {
    pub method: M,
    pub params: Vec<P>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<CallId>,
}

impl<M, P> Envelope<M, P> {
    pub fn call(method: M, params: Vec<P>, id: CallId) -> Self {
        Self {
            method,
            params,
            message_id: Some(id),
        }
    }

    pub fn cast(method: M, params: Vec<P>) -> Self {
        Self {
            method,
            params,
            message_id: None,
        }
    }

    pub fn is_call(&self) -> bool {
        self.message_id.is_some()
    }
}

/// Message from the server half: a reply to a call, or a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply<R> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<CallId>,
}

impl<R> Reply<R> {
    pub fn success(id: CallId, result: Option<R>) -> Self {
        Self {
            result,
            error: None,
            message_id: Some(id),
        }
    }

    pub fn failure(id: CallId, error: RemoteError) -> Self {
        Self {
            result: None,
            error: Some(error),
            message_id: Some(id),
        }
    }

    pub fn push(payload: R) -> Self {
        Self {
            result: Some(payload),
            error: None,
            message_id: None,
        }
    }
}

/// Client end of a channel: sends envelopes, receives replies and pushes.
pub struct ClientTransport<M, P, R> {
    pub outbound: mpsc::UnboundedSender<Envelope<M, P>>,
    pub inbound: mpsc::UnboundedReceiver<Reply<R>>,
}

/// Server end of a channel: receives envelopes, sends replies and pushes.
pub struct ServerTransport<M, P, R> {
    pub inbound: mpsc::UnboundedReceiver<Envelope<M, P>>,
    pub outbound: mpsc::UnboundedSender<Reply<R>>,
}

/// Create a connected client/server transport pair.
pub fn channel<M, P, R>() -> (ClientTransport<M, P, R>, ServerTransport<M, P, R>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    (
        ClientTransport {
            outbound: request_tx,
            inbound: reply_rx,
        },
        ServerTransport {
            inbound: request_rx,
            outbound: reply_tx,
        },
    )
}

/// Run a server on its own OS thread with a single-threaded Tokio runtime.
///
/// `build` runs on the new thread, so the service it constructs never has to
/// be `Send`. The thread exits once every client handle has been dropped.
pub fn spawn_server<S, M, P, R, F>(
    name: &str,
    build: F,
) -> std::io::Result<(ClientTransport<M, P, R>, std::thread::JoinHandle<()>)>
where
    F: FnOnce(Pusher<R>) -> RpcServer<S, M, P, R> + Send + 'static,
    M: Copy + Eq + std::hash::Hash + std::fmt::Display + Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    let (client, server) = channel::<M, P, R>();
    let thread_name = name.to_string();
    let handle = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(thread = %thread_name, "failed to build server runtime: {e}");
                    return;
                }
            };
            let ServerTransport { inbound, outbound } = server;
            let rpc = build(Pusher::new(outbound));
            runtime.block_on(async move {
                rpc.serve(inbound).await;
            });
            info!(thread = %thread_name, "server thread exiting");
        })?;
    Ok((client, handle))
}
