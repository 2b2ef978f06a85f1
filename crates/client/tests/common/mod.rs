//! In-process mock relay speaking enough of the relay protocol for the
//! integration tests: EVENT storage with replaceable-event semantics,
//! REQ filter matching on authors/kinds/#d/limit, OK and EOSE frames.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// A mock relay bound to a random local port.
pub struct MockRelay {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
    events: Arc<RwLock<Vec<Value>>>,
    req_count: Arc<AtomicUsize>,
    /// When set, REQ and EVENT frames are consumed without any response.
    silent: bool,
}

impl MockRelay {
    pub async fn start() -> Self {
        Self::start_inner(false).await
    }

    /// A relay that accepts connections but never answers; used to
    /// exercise deadlines.
    pub async fn start_silent() -> Self {
        Self::start_inner(true).await
    }

    async fn start_inner(silent: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();

        let events = Arc::new(RwLock::new(Vec::new()));
        let req_count = Arc::new(AtomicUsize::new(0));

        let events_task = Arc::clone(&events);
        let req_count_task = Arc::clone(&req_count);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        if let Ok((stream, _)) = result {
                            let events = Arc::clone(&events_task);
                            let req_count = Arc::clone(&req_count_task);
                            tokio::spawn(Self::handle_connection(
                                stream, events, req_count, silent,
                            ));
                        }
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            handle,
            events,
            req_count,
            silent,
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        events: Arc<RwLock<Vec<Value>>>,
        req_count: Arc<AtomicUsize>,
        silent: bool,
    ) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => return,
        };
        let (mut write, mut read) = ws_stream.split();

        while let Some(result) = read.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let responses =
                        Self::process_message(&text, &events, &req_count, silent).await;
                    for response in responses {
                        let _ = write.send(Message::Text(response.into())).await;
                    }
                }
                Ok(Message::Close(_)) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Ok(Message::Ping(data)) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                _ => {}
            }
        }
    }

    async fn process_message(
        message: &str,
        events: &Arc<RwLock<Vec<Value>>>,
        req_count: &Arc<AtomicUsize>,
        silent: bool,
    ) -> Vec<String> {
        let Ok(value) = serde_json::from_str::<Value>(message) else {
            return Vec::new();
        };
        let Some(frame) = value.as_array() else {
            return Vec::new();
        };
        let Some(kind) = frame.first().and_then(Value::as_str) else {
            return Vec::new();
        };

        let mut responses = Vec::new();
        match kind {
            "EVENT" => {
                if let Some(event) = frame.get(1) {
                    let id = event["id"].as_str().unwrap_or("").to_string();
                    Self::store(events, event.clone()).await;
                    if !silent {
                        responses.push(json!(["OK", id, true, ""]).to_string());
                    }
                }
            }
            "REQ" => {
                req_count.fetch_add(1, Ordering::SeqCst);
                if silent {
                    return Vec::new();
                }
                if let Some(sub_id) = frame.get(1).and_then(Value::as_str) {
                    let filters: Vec<Value> = frame[2..].to_vec();
                    for event in Self::matching(events, &filters).await {
                        responses.push(json!(["EVENT", sub_id, event]).to_string());
                    }
                    responses.push(json!(["EOSE", sub_id]).to_string());
                }
            }
            "CLOSE" => {
                if let Some(sub_id) = frame.get(1).and_then(Value::as_str) {
                    if !silent {
                        responses.push(json!(["CLOSED", sub_id, ""]).to_string());
                    }
                }
            }
            _ => {}
        }
        responses
    }

    /// Store an event, displacing the previous instance of a replaceable
    /// record with the same (pubkey, kind, d).
    async fn store(events: &Arc<RwLock<Vec<Value>>>, event: Value) {
        let kind = event["kind"].as_u64().unwrap_or(0);
        let replaceable = (30000..40000).contains(&kind) || kind == 10002;

        let mut stored = events.write().await;
        if replaceable {
            let pubkey = event["pubkey"].as_str().unwrap_or("").to_string();
            let d = d_tag(&event);
            stored.retain(|existing| {
                !(existing["pubkey"].as_str() == Some(pubkey.as_str())
                    && existing["kind"].as_u64() == Some(kind)
                    && d_tag(existing) == d)
            });
        }
        stored.push(event);
    }

    async fn matching(events: &Arc<RwLock<Vec<Value>>>, filters: &[Value]) -> Vec<Value> {
        let stored = events.read().await;
        let mut matched: Vec<Value> = stored
            .iter()
            .filter(|event| filters.iter().any(|filter| filter_matches(filter, event)))
            .cloned()
            .collect();

        // Newest first with the id tie-break, then the smallest limit of
        // any filter, the way real relays bound REQ responses.
        matched.sort_by(|a, b| {
            b["created_at"]
                .as_u64()
                .cmp(&a["created_at"].as_u64())
                .then_with(|| a["id"].as_str().cmp(&b["id"].as_str()))
        });
        if let Some(limit) = filters
            .iter()
            .filter_map(|f| f["limit"].as_u64())
            .min()
        {
            matched.truncate(limit as usize);
        }
        matched
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Everything currently stored, for relay-side assertions.
    pub async fn stored_events(&self) -> Vec<Value> {
        self.events.read().await.clone()
    }

    /// Push an event verbatim, bypassing replaceable-event displacement.
    pub async fn seed_event(&self, event: Value) {
        self.events.write().await.push(event);
    }

    /// Number of REQ frames received so far.
    pub fn req_count(&self) -> usize {
        self.req_count.load(Ordering::SeqCst)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

fn d_tag(event: &Value) -> Option<String> {
    event["tags"].as_array().and_then(|tags| {
        tags.iter().find_map(|tag| {
            let tag = tag.as_array()?;
            if tag.first()?.as_str()? == "d" {
                Some(tag.get(1)?.as_str()?.to_string())
            } else {
                None
            }
        })
    })
}

fn filter_matches(filter: &Value, event: &Value) -> bool {
    if let Some(authors) = filter["authors"].as_array() {
        let pubkey = event["pubkey"].as_str().unwrap_or("");
        if !authors.iter().any(|a| a.as_str() == Some(pubkey)) {
            return false;
        }
    }
    if let Some(kinds) = filter["kinds"].as_array() {
        let kind = event["kind"].as_u64().unwrap_or(0);
        if !kinds.iter().any(|k| k.as_u64() == Some(kind)) {
            return false;
        }
    }
    if let Some(identifiers) = filter["#d"].as_array() {
        let d = d_tag(event);
        if !identifiers
            .iter()
            .any(|i| i.as_str().map(str::to_string) == d)
        {
            return false;
        }
    }
    true
}
