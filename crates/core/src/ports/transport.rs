//! Port trait for the JSON-RPC transport.
//!
//! This trait defines the interface the facade uses to talk to a node.
//! The production implementation lives in the infrastructure layer
//! (`qapi-transport`, WebSocket-based); tests substitute scripted mocks.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::Stream;
use serde_json::Value;

use crate::error::ChainResult;

/// Stream of subscription notifications, in server arrival order.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// Deferred unsubscribe action, run at most once.
pub type UnsubscribeFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An active server-side subscription.
///
/// Dropping the subscription without calling [`unsubscribe`] leaves the
/// server streaming into a dead channel until the connection closes;
/// notifications for an already-removed subscription id are silently
/// dropped by the transport.
///
/// [`unsubscribe`]: RpcSubscription::unsubscribe
pub struct RpcSubscription {
    id: String,
    stream: NotificationStream,
    cancel: Option<UnsubscribeFuture>,
}

impl RpcSubscription {
    /// Assemble a subscription from its parts. Transport-side only.
    pub fn new(id: String, stream: NotificationStream, cancel: UnsubscribeFuture) -> Self {
        Self {
            id,
            stream,
            cancel: Some(cancel),
        }
    }

    /// The server-assigned subscription id, in string form.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next notification payload, or `None` once the channel closes.
    pub async fn next(&mut self) -> Option<Value> {
        self.stream.next().await
    }

    /// Tell the server to stop and drop the local handler.
    ///
    /// The handler is removed even when the unsubscribe RPC fails. A
    /// second call is a no-op: no error, no additional RPC.
    pub async fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.await;
        }
    }
}

impl std::fmt::Debug for RpcSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSubscription")
            .field("id", &self.id)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Port trait for a JSON-RPC 2.0 request/subscription channel.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send one request and await its response.
    ///
    /// A JSON-RPC `error` member resolves to [`ChainError::Rpc`]. Two
    /// outstanding requests carry no ordering guarantee between them.
    ///
    /// [`ChainError::Rpc`]: crate::error::ChainError::Rpc
    async fn request(&self, method: &str, params: Vec<Value>) -> ChainResult<Value>;

    /// Open a server-side subscription.
    ///
    /// `method` is sent with `params` and must return the subscription
    /// id; `unsubscribe_method` is what the returned handle will send to
    /// tear it down.
    async fn subscribe(
        &self,
        method: &str,
        unsubscribe_method: &str,
        params: Vec<Value>,
    ) -> ChainResult<RpcSubscription>;

    /// Stop reconnecting, close the socket, and fail everything pending
    /// with `TransportClosed`.
    async fn disconnect(&self) -> ChainResult<()>;
}
