//! Query listener: the synchronous-call surface of the bridge.
//!
//! Speaks JSON-RPC 2.0 over `Content-Length` framed streams (stdio in the
//! binary). Methods:
//!
//! - `bridge/query` `{target_agent, query, request_id, timeout_secs?}` ->
//!   [`BridgeResult`]
//! - `bridge/ping` -> `{"pending": <waiters in flight>}`
//! - `$/cancelRequest` `{id}` (notification): ends that query with
//!   `"cancelled"`
//! - `exit` (notification): stop reading; in-flight queries still answer
//!
//! Every query runs in its own task, so a slow peer never holds up another
//! call. Responses go through a single writer task.

pub mod jsonrpc;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bridge::{BridgeResult, CorrelationBridge};
use crate::error::LockResultExt;
use crate::protocol::{FrameReader, FrameWriter, FramingError};
use crate::transport::PeerAddress;
use jsonrpc::{
    CancelParams, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, Request,
    Response,
};

/// Response queue capacity between query tasks and the writer.
const RESPONSE_QUEUE_CAPACITY: usize = 256;

pub const METHOD_QUERY: &str = "bridge/query";
pub const METHOD_PING: &str = "bridge/ping";
pub const METHOD_CANCEL: &str = "$/cancelRequest";
pub const METHOD_EXIT: &str = "exit";

/// Params of `bridge/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryParams {
    pub target_agent: PeerAddress,
    pub query: String,
    pub request_id: String,
    /// Overrides the bridge's default budget for this call.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

pub struct QueryServer {
    bridge: Arc<CorrelationBridge>,
}

impl QueryServer {
    pub fn new(bridge: Arc<CorrelationBridge>) -> Self {
        Self { bridge }
    }

    /// Serve requests from `reader` until EOF, `exit`, or `shutdown`.
    ///
    /// Returns once every accepted query has been answered. Cancelling
    /// `shutdown` cancels all in-flight queries.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> Result<(), FramingError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = FrameReader::new(reader);
        let (tx, rx) = mpsc::channel(RESPONSE_QUEUE_CAPACITY);
        let writer_handle = tokio::spawn(response_writer(FrameWriter::new(writer), rx));
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();

        let read_result = loop {
            let frame = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(target: "nakadachi::server", "Shutdown requested");
                    break Ok(());
                }

                frame = reader.read_json::<Value>() => frame,
            };

            let value = match frame {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!(target: "nakadachi::server", "Input closed");
                    break Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    warn!(target: "nakadachi::server", "Unparseable request: {}", e);
                    let _ = tx
                        .send(Response::error(Value::Null, PARSE_ERROR, e.to_string()))
                        .await;
                    continue;
                }
                Err(e) => break Err(e),
            };

            let request = match parse_request(value) {
                Ok(request) => request,
                Err(response) => {
                    let _ = tx.send(*response).await;
                    continue;
                }
            };

            let method = request.method.clone();
            match method.as_str() {
                METHOD_EXIT => {
                    info!(target: "nakadachi::server", "Exit requested");
                    break Ok(());
                }
                METHOD_CANCEL => self.cancel(&in_flight, request.params),
                METHOD_PING => {
                    if let Some(id) = request.id {
                        let pending = self.bridge.table().pending_count();
                        let _ = tx.send(Response::result(id, json!({ "pending": pending }))).await;
                    }
                }
                METHOD_QUERY => {
                    if let Err(response) =
                        self.spawn_query(request, &tx, &in_flight, &shutdown, &mut tasks)
                    {
                        let _ = tx.send(*response).await;
                    }
                }
                other => match request.id {
                    Some(id) => {
                        let _ = tx
                            .send(Response::error(
                                id,
                                METHOD_NOT_FOUND,
                                format!("method not found: {}", other),
                            ))
                            .await;
                    }
                    None => {
                        debug!(target: "nakadachi::server", "Ignoring notification {}", other);
                    }
                },
            }
        };

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(target: "nakadachi::server", "Query task failed: {}", e);
            }
        }
        drop(tx);
        if let Err(e) = writer_handle.await {
            warn!(target: "nakadachi::server", "Response writer failed: {}", e);
        }
        read_result
    }

    fn spawn_query(
        &self,
        request: Request,
        tx: &mpsc::Sender<Response>,
        in_flight: &InFlight,
        shutdown: &CancellationToken,
        tasks: &mut JoinSet<()>,
    ) -> Result<(), Box<Response>> {
        let Some(id) = request.id else {
            debug!(target: "nakadachi::server", "Ignoring {} sent as notification", METHOD_QUERY);
            return Ok(());
        };
        let params: QueryParams = request
            .params
            .ok_or_else(|| "missing params".to_string())
            .and_then(|params| serde_json::from_value(params).map_err(|e| e.to_string()))
            .map_err(|e| Box::new(Response::error(id.clone(), INVALID_PARAMS, e)))?;

        let key = id.to_string();
        let token = shutdown.child_token();
        {
            let mut in_flight = in_flight.lock().recover_poison("QueryServer::spawn_query");
            if in_flight.contains_key(&key) {
                return Err(Box::new(Response::error(
                    id,
                    INVALID_REQUEST,
                    format!("request id {} is already in flight", key),
                )));
            }
            in_flight.insert(key.clone(), token.clone());
        }

        let bridge = Arc::clone(&self.bridge);
        let tx = tx.clone();
        let in_flight = Arc::clone(in_flight);
        tasks.spawn(async move {
            let timeout = params
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| bridge.default_timeout());
            let result = bridge
                .forward_with_cancel(
                    &params.target_agent,
                    &params.query,
                    &params.request_id,
                    timeout,
                    &token,
                )
                .await;
            in_flight
                .lock()
                .recover_poison("QueryServer::query_task")
                .remove(&key);
            let _ = tx.send(Response::result(id, result_value(&result))).await;
        });
        Ok(())
    }

    fn cancel(&self, in_flight: &InFlight, params: Option<Value>) {
        let parsed = params.and_then(|p| serde_json::from_value::<CancelParams>(p).ok());
        let Some(CancelParams { id }) = parsed else {
            warn!(target: "nakadachi::server", "Ignoring {} without an id", METHOD_CANCEL);
            return;
        };
        let key = id.to_string();
        let token = in_flight
            .lock()
            .recover_poison("QueryServer::cancel")
            .get(&key)
            .cloned();
        match token {
            Some(token) => {
                info!(target: "nakadachi::server", "Cancelling request {}", key);
                token.cancel();
            }
            None => debug!(target: "nakadachi::server", "No in-flight request {} to cancel", key),
        }
    }
}

fn parse_request(value: Value) -> Result<Request, Box<Response>> {
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: Request = serde_json::from_value(value)
        .map_err(|e| Box::new(Response::error(id.clone(), INVALID_REQUEST, e.to_string())))?;
    if request.jsonrpc != "2.0" {
        return Err(Box::new(Response::error(
            id,
            INVALID_REQUEST,
            format!("unsupported jsonrpc version {:?}", request.jsonrpc),
        )));
    }
    Ok(request)
}

fn result_value(result: &BridgeResult) -> Value {
    json!({
        "success": result.success,
        "response": result.response,
        "request_id": result.request_id,
        "error": result.error,
    })
}

async fn response_writer<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut rx: mpsc::Receiver<Response>,
) {
    while let Some(response) = rx.recv().await {
        if let Err(e) = writer.write_json(&response).await {
            warn!(target: "nakadachi::server", "Failed to write response: {}", e);
            return;
        }
    }
}
