//! The WebSocket JSON-RPC 2.0 client.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use qapi_core::error::{ChainError, ChainResult};
use qapi_core::metrics::record_reconnect;
use qapi_core::ports::{RpcSubscription, RpcTransport};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    /// Node endpoint (e.g. "ws://127.0.0.1:9944").
    pub url: String,
    /// Reconnect automatically after an unexpected close.
    pub reconnect: bool,
    /// First reconnect delay; doubles per failed attempt.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Per-request deadline. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl WsTransportConfig {
    /// Defaults for an endpoint: reconnect on, 250 ms backoff doubling
    /// to 10 s, 30 s request deadline.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: true,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// A reconnecting JSON-RPC client over one WebSocket connection.
///
/// Cheap to clone; clones share the connection, the pending-request map
/// and the subscription table.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: WsTransportConfig,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<ChainResult<Value>>>>,
    subs: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
    /// Notification channels of subscribe requests still awaiting their
    /// id. Moved into `subs` by the dispatcher, atomically with the
    /// response, so notifications sent right behind the reply cannot
    /// slip past an unregistered handler.
    pending_subs: Mutex<HashMap<u64, mpsc::UnboundedSender<Value>>>,
    /// Outbound queue of the live connection; `None` while disconnected.
    writer: tokio::sync::Mutex<Option<mpsc::UnboundedSender<Message>>>,
    backoff: Mutex<Duration>,
    reconnect: AtomicBool,
}

impl WsTransport {
    /// Build a transport bound to an endpoint, without connecting yet.
    /// The first request connects lazily.
    pub fn new(config: WsTransportConfig) -> ChainResult<Self> {
        let parsed = url::Url::parse(&config.url)
            .map_err(|err| ChainError::ConnectionFailed(format!("{}: {err}", config.url)))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ChainError::ConnectionFailed(format!(
                "{}: expected a ws:// or wss:// endpoint",
                config.url
            )));
        }
        let reconnect = config.reconnect;
        Ok(Self {
            inner: Arc::new(Inner {
                backoff: Mutex::new(config.initial_backoff),
                config,
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                subs: Mutex::new(HashMap::new()),
                pending_subs: Mutex::new(HashMap::new()),
                writer: tokio::sync::Mutex::new(None),
                reconnect: AtomicBool::new(reconnect),
            }),
        })
    }

    /// Build and connect in one step.
    pub async fn connect(config: WsTransportConfig) -> ChainResult<Self> {
        let transport = Self::new(config)?;
        Inner::ensure_connected(&transport.inner).await?;
        Ok(transport)
    }
}

impl Inner {
    /// Open the socket if it is not open. Idempotent; concurrent callers
    /// serialize on the writer slot.
    fn ensure_connected(
        inner: &Arc<Inner>,
    ) -> Pin<Box<dyn Future<Output = ChainResult<()>> + Send + '_>> {
        Box::pin(async move {
            let mut writer = inner.writer.lock().await;
            if writer.is_some() {
                return Ok(());
            }

            let (socket, _response) = connect_async(inner.config.url.as_str())
                .await
                .map_err(|err| ChainError::ConnectionFailed(err.to_string()))?;
            let (sink, stream) = socket.split();

            let (tx, rx) = mpsc::unbounded_channel();
            *writer = Some(tx);
            drop(writer);

            // successful open resets the backoff
            *inner.backoff.lock().unwrap() = inner.config.initial_backoff;
            info!(url = %inner.config.url, "websocket connected");

            tokio::spawn(write_loop(sink, rx));
            tokio::spawn(read_loop(inner.clone(), stream));
            Ok(())
        })
    }

    /// Register a pending completion and put one request frame on the
    /// wire.
    async fn start_request(
        self: &Arc<Inner>,
        id: u64,
        method: &str,
        params: Vec<Value>,
    ) -> ChainResult<oneshot::Receiver<ChainResult<Value>>> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let queued = {
            let writer = self.writer.lock().await;
            match writer.as_ref() {
                Some(out) => out.send(Message::text(payload.to_string())).is_ok(),
                None => false,
            }
        };
        if !queued {
            self.pending.lock().unwrap().remove(&id);
            return Err(ChainError::TransportClosed);
        }
        trace!(id, method, "request sent");
        Ok(rx)
    }

    /// Await a routed response, enforcing the configured deadline.
    async fn await_reply(
        self: &Arc<Inner>,
        id: u64,
        rx: oneshot::Receiver<ChainResult<Value>>,
    ) -> ChainResult<Value> {
        let reply = match self.config.request_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().unwrap().remove(&id);
                    self.pending_subs.lock().unwrap().remove(&id);
                    return Err(ChainError::Timeout(deadline));
                }
            },
            None => rx.await,
        };
        // a dropped sender means the connection died under us
        reply.unwrap_or(Err(ChainError::TransportClosed))
    }

    /// Send one request and await its routed response.
    async fn request(self: &Arc<Inner>, method: &str, params: Vec<Value>) -> ChainResult<Value> {
        Inner::ensure_connected(self).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let rx = self.start_request(id, method, params).await?;
        self.await_reply(id, rx).await
    }

    /// Fail every pending request with `TransportClosed` and end every
    /// subscription stream.
    fn abort_in_flight(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain().collect();
        for (id, tx) in pending {
            trace!(id, "failing pending request: transport closed");
            let _ = tx.send(Err(ChainError::TransportClosed));
        }
        self.pending_subs.lock().unwrap().clear();
        // dropping the senders ends the notification streams, which is
        // how subscribers learn they must re-subscribe
        self.subs.lock().unwrap().clear();
    }
}

/// Forward queued outbound messages; send a close frame when the queue
/// ends (transport dropped or `disconnect` was called).
async fn write_loop(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if let Err(err) = sink.send(message).await {
            debug!(%err, "socket write failed");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Dispatch inbound frames until the socket drops, then run the
/// disconnect path.
async fn read_loop(inner: Arc<Inner>, mut stream: WsRead) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&inner, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong/binary
            Err(err) => {
                debug!(%err, "socket read error");
                break;
            }
        }
    }
    on_disconnect(&inner).await;
}

/// Handle a dropped connection: fail what was in flight and, when
/// enabled, keep trying to reopen with doubling backoff.
async fn on_disconnect(inner: &Arc<Inner>) {
    *inner.writer.lock().await = None;
    inner.abort_in_flight();

    if !inner.reconnect.load(Ordering::SeqCst) {
        debug!("connection closed, reconnect disabled");
        return;
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        loop {
            let delay = {
                let mut backoff = inner.backoff.lock().unwrap();
                let delay = *backoff;
                *backoff = (*backoff * 2).min(inner.config.max_backoff);
                delay
            };
            warn!(?delay, url = %inner.config.url, "connection lost, reconnecting");
            tokio::time::sleep(delay).await;
            if !inner.reconnect.load(Ordering::SeqCst) {
                return;
            }
            record_reconnect();
            match Inner::ensure_connected(&inner).await {
                Ok(()) => return,
                Err(err) => debug!(%err, "reconnect attempt failed"),
            }
        }
    });
}

// =============================================================================
// Inbound classification
// =============================================================================

/// An inbound frame, classified.
#[derive(Debug, PartialEq)]
enum Inbound {
    /// Subscription notification: `method` + `params.subscription`.
    Notification { subscription: String, result: Value },
    /// Response to a pending request.
    Response { id: u64, result: Result<Value, Value> },
}

/// Classify one inbound text frame. Anything unrecognized is `None` and
/// gets ignored.
fn classify(text: &str) -> Option<Inbound> {
    let message: Value = serde_json::from_str(text).ok()?;
    let object = message.as_object()?;

    if object.contains_key("method") {
        let params = object.get("params")?.as_object()?;
        let subscription = sub_key(params.get("subscription")?)?;
        let result = params.get("result").cloned().unwrap_or(Value::Null);
        return Some(Inbound::Notification { subscription, result });
    }

    let id = object.get("id")?.as_u64()?;
    let result = match object.get("error") {
        Some(error) if !error.is_null() => Err(error.clone()),
        _ => Ok(object.get("result").cloned().unwrap_or(Value::Null)),
    };
    Some(Inbound::Response { id, result })
}

/// Subscription ids arrive as strings or integers; key the table by the
/// string form of either.
fn sub_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn dispatch(inner: &Inner, text: &str) {
    match classify(text) {
        Some(Inbound::Notification { subscription, result }) => {
            let subs = inner.subs.lock().unwrap();
            match subs.get(&subscription) {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                // post-unsubscribe race: notifications in flight when
                // the handler was removed
                None => trace!(%subscription, "notification for unknown subscription dropped"),
            }
        }
        Some(Inbound::Response { id, result }) => {
            // a pending subscribe gets its handler installed here,
            // atomically with the response: the very next frame may
            // already be a notification for it
            if let Some(notif_tx) = inner.pending_subs.lock().unwrap().remove(&id)
                && let Ok(value) = &result
                && let Some(key) = sub_key(value)
            {
                inner.subs.lock().unwrap().insert(key, notif_tx);
            }
            match inner.pending.lock().unwrap().remove(&id) {
                Some(tx) => {
                    let _ = tx.send(result.map_err(ChainError::Rpc));
                }
                None => trace!(id, "response for unknown request dropped"),
            }
        }
        None => trace!("unclassifiable frame ignored"),
    }
}

// =============================================================================
// Port implementation
// =============================================================================

#[async_trait]
impl RpcTransport for WsTransport {
    async fn request(&self, method: &str, params: Vec<Value>) -> ChainResult<Value> {
        Inner::request(&self.inner, method, params).await
    }

    async fn subscribe(
        &self,
        method: &str,
        unsubscribe_method: &str,
        params: Vec<Value>,
    ) -> ChainResult<RpcSubscription> {
        Inner::ensure_connected(&self.inner).await?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        // park the notification channel under the request id; the
        // dispatcher re-keys it by the server-assigned subscription id
        // when the reply comes through
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.pending_subs.lock().unwrap().insert(id, tx);

        let rx_reply = match self.inner.start_request(id, method, params).await {
            Ok(rx_reply) => rx_reply,
            Err(err) => {
                self.inner.pending_subs.lock().unwrap().remove(&id);
                return Err(err);
            }
        };
        let reply = self.inner.await_reply(id, rx_reply).await?;
        let key = sub_key(&reply)
            .ok_or_else(|| ChainError::Subscription(format!("unusable subscription id: {reply}")))?;
        debug!(subscription = %key, method, "subscribed");

        let inner = self.inner.clone();
        let unsubscribe_method = unsubscribe_method.to_string();
        let cancel_key = key.clone();
        let cancel = Box::pin(async move {
            // the local handler goes away even when the RPC fails
            if let Err(err) = Inner::request(&inner, &unsubscribe_method, vec![reply]).await {
                debug!(%err, "unsubscribe rpc failed");
            }
            inner.subs.lock().unwrap().remove(&cancel_key);
        });

        Ok(RpcSubscription::new(
            key,
            Box::pin(UnboundedReceiverStream::new(rx)),
            cancel,
        ))
    }

    async fn disconnect(&self) -> ChainResult<()> {
        self.inner.reconnect.store(false, Ordering::SeqCst);
        // dropping the outbound queue makes the write loop send a close
        // frame; the read loop then runs the disconnect path
        *self.inner.writer.lock().await = None;
        self.inner.abort_in_flight();
        debug!("transport disconnected");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
