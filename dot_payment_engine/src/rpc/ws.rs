//! Minimal JSON-RPC-over-WebSocket client: request/response correlation by id plus
//! subscription routing. Everything chain-specific sits one layer up in [`super::RpcChainClient`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use log::*;
use serde_json::{json, Value};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, Mutex},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::traits::ChainAccessError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Per-subscription channel capacity. When a consumer lags this far behind, the read loop
/// blocks, which backpressures the whole connection rather than buffering without bound.
const SUBSCRIPTION_BUFFER: usize = 32;

#[derive(Clone)]
pub struct WsRpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    sink: Mutex<WsSink>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, ChainAccessError>>>>,
    subscriptions: Mutex<HashMap<String, mpsc::Sender<Value>>>,
    next_id: AtomicU64,
}

impl WsRpcClient {
    pub async fn connect(endpoint: &str) -> Result<Self, ChainAccessError> {
        let (stream, _) = connect_async(endpoint)
            .await
            .map_err(|e| ChainAccessError::ConnectFailed(endpoint.to_string(), e.to_string()))?;
        let (sink, source) = stream.split();
        let inner = Arc::new(Inner {
            endpoint: endpoint.to_string(),
            sink: Mutex::new(sink),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });
        tokio::spawn(read_loop(Arc::clone(&inner), source));
        Ok(Self { inner })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Sends one request and awaits its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ChainAccessError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);
        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        trace!("📡️ --> {message}");
        if let Err(e) = self.inner.sink.lock().await.send(Message::text(message.to_string())).await {
            self.inner.pending.lock().await.remove(&id);
            return Err(ChainAccessError::Rpc(format!("send failed: {e}")));
        }
        rx.await.map_err(|_| ChainAccessError::Disconnected)?
    }

    /// Opens a subscription and returns the stream of its notifications. The channel closes
    /// when the connection drops.
    pub async fn subscribe(&self, method: &str, params: Value) -> Result<mpsc::Receiver<Value>, ChainAccessError> {
        let result = self.request(method, params).await?;
        let subscription_id = match result.as_str() {
            Some(s) => s.to_string(),
            None => result.to_string(),
        };
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner.subscriptions.lock().await.insert(subscription_id, tx);
        Ok(rx)
    }
}

async fn read_loop(inner: Arc<Inner>, mut source: WsSource) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(value) => dispatch(&inner, value).await,
                Err(e) => warn!("📡️ Discarding unparseable RPC frame from {}: {e}", inner.endpoint),
            },
            Ok(Message::Ping(data)) => {
                let _ = inner.sink.lock().await.send(Message::Pong(data)).await;
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!("📡️ RPC stream error from {}: {e}", inner.endpoint);
                break;
            },
            _ => {},
        }
    }
    // The connection is gone: fail outstanding requests and end every subscription stream.
    for (_, tx) in inner.pending.lock().await.drain() {
        let _ = tx.send(Err(ChainAccessError::Disconnected));
    }
    inner.subscriptions.lock().await.clear();
    info!("📡️ RPC connection to {} closed", inner.endpoint);
}

async fn dispatch(inner: &Inner, value: Value) {
    trace!("📡️ <-- {value}");
    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        if let Some(tx) = inner.pending.lock().await.remove(&id) {
            let result = match value.get("error") {
                Some(err) => Err(ChainAccessError::Rpc(err.to_string())),
                None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = tx.send(result);
        }
        return;
    }
    let Some(params) = value.get("params") else {
        return;
    };
    let (Some(sub_id), Some(result)) = (params.get("subscription"), params.get("result")) else {
        return;
    };
    let key = match sub_id.as_str() {
        Some(s) => s.to_string(),
        None => sub_id.to_string(),
    };
    let sender = inner.subscriptions.lock().await.get(&key).cloned();
    if let Some(sender) = sender {
        if sender.send(result.clone()).await.is_err() {
            // Receiver dropped; unsubscribe locally.
            inner.subscriptions.lock().await.remove(&key);
        }
    }
}
