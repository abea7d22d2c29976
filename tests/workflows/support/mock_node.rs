use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Scriptable Ethereum node state plus plain REST routes served on GET.
#[derive(Clone)]
pub struct MockNode {
    inner: Arc<Mutex<MockNodeInner>>,
    chain_id: u64,
    finalized: Arc<AtomicU64>,
    tx_counter: Arc<AtomicU64>,
    receipt_polls: Arc<AtomicUsize>,
}

#[derive(Default)]
struct MockNodeInner {
    /// `eth_call` answers keyed by lowercase `to` address.
    calls: HashMap<String, Result<String, String>>,
    send_error: Option<String>,
    receipt_status: Option<String>,
    /// Receipt polls answered with `null` before the receipt shows up.
    pending_polls: usize,
    logs: Vec<Value>,
    sent: Vec<Value>,
    methods: Vec<String>,
    authorization: Vec<Option<String>>,
    routes: HashMap<String, (u16, String)>,
}

impl MockNode {
    pub fn new(chain_id: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockNodeInner {
                receipt_status: Some("0x1".into()),
                ..MockNodeInner::default()
            })),
            chain_id,
            finalized: Arc::new(AtomicU64::new(0x20)),
            tx_counter: Arc::new(AtomicU64::new(0)),
            receipt_polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn answer_call(&self, to: &str, result_hex: impl Into<String>) {
        self.lock()
            .calls
            .insert(to.to_ascii_lowercase(), Ok(result_hex.into()));
    }

    pub fn revert_call(&self, to: &str, message: impl Into<String>) {
        self.lock()
            .calls
            .insert(to.to_ascii_lowercase(), Err(message.into()));
    }

    pub fn reject_sends(&self, message: impl Into<String>) {
        self.lock().send_error = Some(message.into());
    }

    pub fn set_receipt_status(&self, status: &str) {
        self.lock().receipt_status = Some(status.to_owned());
    }

    pub fn delay_receipts(&self, polls: usize) {
        self.lock().pending_polls = polls;
    }

    pub fn set_finalized(&self, block: u64) {
        self.finalized.store(block, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Value) {
        self.lock().logs.push(log);
    }

    pub fn route(&self, path: &str, status: u16, body: impl Into<String>) {
        self.lock()
            .routes
            .insert(path.to_owned(), (status, body.into()));
    }

    pub fn sent_transactions(&self) -> Vec<Value> {
        self.lock().sent.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.lock().methods.clone()
    }

    pub fn authorization_headers(&self) -> Vec<Option<String>> {
        self.lock().authorization.clone()
    }

    pub fn receipt_polls(&self) -> usize {
        self.receipt_polls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockNodeInner> {
        self.inner.lock().expect("mock node poisoned")
    }

    fn handle_call(&self, call: Value) -> Value {
        let id = call.get("id").cloned().unwrap_or(Value::Null);
        let method = call
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = call
            .get("params")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let first = params.get(0).cloned().unwrap_or(Value::Null);
        self.lock().methods.push(method.clone());

        match method.as_str() {
            "eth_chainId" => success(id, json!(format!("0x{:x}", self.chain_id))),
            "eth_getBlockByNumber" => success(
                id,
                json!({"number": format!("0x{:x}", self.finalized.load(Ordering::SeqCst))}),
            ),
            "eth_call" => {
                let to = first
                    .get("to")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                match self.lock().calls.get(&to).cloned() {
                    Some(Ok(result)) => success(id, Value::String(result)),
                    Some(Err(message)) => error(id, 3, message),
                    None => error(id, -32000, "execution reverted"),
                }
            }
            "eth_getLogs" => {
                let from = quantity_field(&first, "fromBlock");
                let to = quantity_field(&first, "toBlock");
                let logs: Vec<Value> = self
                    .lock()
                    .logs
                    .iter()
                    .filter(|log| {
                        let block = quantity_field(log, "blockNumber");
                        block >= from && block <= to
                    })
                    .cloned()
                    .collect();
                success(id, Value::Array(logs))
            }
            "eth_sendTransaction" => {
                let mut inner = self.lock();
                inner.sent.push(first);
                if let Some(message) = inner.send_error.clone() {
                    return error(id, -32000, message);
                }
                let nonce = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
                success(id, json!(format!("0x{nonce:064x}")))
            }
            "eth_getTransactionReceipt" => {
                self.receipt_polls.fetch_add(1, Ordering::SeqCst);
                let mut inner = self.lock();
                if inner.pending_polls > 0 {
                    inner.pending_polls -= 1;
                    return success(id, Value::Null);
                }
                success(
                    id,
                    json!({
                        "transactionHash": first,
                        "status": inner.receipt_status.clone(),
                        "blockNumber": format!("0x{:x}", self.finalized.load(Ordering::SeqCst) + 1),
                    }),
                )
            }
            _ => error(id, -32601, format!("unknown method {method}")),
        }
    }
}

fn quantity_field(value: &Value, field: &str) -> u64 {
    value
        .get(field)
        .and_then(Value::as_str)
        .and_then(|raw| u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok())
        .unwrap_or_default()
}

pub struct MockNodeServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockNodeServer {
    pub async fn start(node: MockNode) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock node listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let node = node.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(node.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock node stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(node: MockNode, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() == Method::GET {
        let path = req
            .uri()
            .path_and_query()
            .map(|path| path.as_str().to_owned())
            .unwrap_or_default();
        let route = node.lock().routes.get(&path).cloned();
        let (status, body) = route.unwrap_or((404, "not found".to_owned()));
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Ok(response);
    }
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let authorization = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    node.lock().authorization.push(authorization);

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = match payload {
        Value::Array(calls) => Value::Array(calls.into_iter().map(|call| node.handle_call(call)).collect()),
        call => node.handle_call(call),
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
