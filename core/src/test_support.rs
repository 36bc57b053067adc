use crate::agent::ToolRegistry;
use crate::error::{GenerationError, TransportClosed};
use crate::schema::{ParamType, ParameterSchema};
use crate::stream::StreamEvent;
use crate::tools::LocationTool;
use crate::traits::{
    ConversationStore, ConversationTurn, EventSink, GenerationRequest, MessageRole, ModelEvent,
    ModelStream, Provider, StoredMessage, Tool, ToolArgs, ToolInvocationRequest,
};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, watch};

pub struct Pass {
    events: Vec<Result<ModelEvent, GenerationError>>,
    hang: bool,
}

impl Pass {
    pub fn new(events: Vec<Result<ModelEvent, GenerationError>>) -> Self {
        Self { events, hang: false }
    }

    pub fn text(fragments: &[&str]) -> Self {
        Self::new(
            fragments
                .iter()
                .map(|f| Ok(ModelEvent::TextDelta(f.to_string())))
                .collect(),
        )
    }

    pub fn tools(requests: Vec<ToolInvocationRequest>) -> Self {
        Self::new(
            requests
                .into_iter()
                .map(|r| Ok(ModelEvent::ToolCallRequested(r)))
                .collect(),
        )
    }

    /// Keep the stream open forever after the scripted events.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedProvider {
    passes: Mutex<VecDeque<Pass>>,
    requests: Mutex<Vec<Vec<ConversationTurn>>>,
    fail_start: Option<String>,
    pub stream_dropped: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(passes: Vec<Pass>) -> Self {
        Self {
            passes: Mutex::new(passes.into()),
            requests: Mutex::new(Vec::new()),
            fail_start: None,
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_start: Some(message.to_string()),
            ..Self::new(vec![])
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> Vec<ConversationTurn> {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<ModelStream, GenerationError> {
        self.requests.lock().unwrap().push(request.turns.to_vec());

        if let Some(message) = &self.fail_start {
            return Err(GenerationError::new(message.clone()));
        }

        let pass = self
            .passes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GenerationError::new("script exhausted"))?;

        let guard = DropFlag(self.stream_dropped.clone());
        let events = stream::iter(pass.events);
        let events = if pass.hang {
            events.chain(stream::pending()).boxed()
        } else {
            events.boxed()
        };

        Ok(events
            .map(move |event| {
                let _ = &guard;
                event
            })
            .boxed())
    }
}

pub struct RecordingSink {
    events: Mutex<Vec<StreamEvent>>,
    accept: Option<usize>,
    closed: watch::Sender<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            accept: None,
            closed: watch::Sender::new(false),
        }
    }

    /// Accepts `n` events; the next send fails and closes the sink.
    pub fn closing_after(n: usize) -> Self {
        Self {
            accept: Some(n),
            ..Self::new()
        }
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub async fn wait_for_events(&self, n: usize) {
        while self.events.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, event: StreamEvent) -> Result<(), TransportClosed> {
        if *self.closed.borrow() {
            return Err(TransportClosed);
        }
        let mut events = self.events.lock().unwrap();
        if self.accept.is_some_and(|n| events.len() >= n) {
            self.close();
            return Err(TransportClosed);
        }
        events.push(event);
        Ok(())
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

pub struct WeatherStub;

#[async_trait]
impl Tool for WeatherStub {
    fn name(&self) -> &str {
        "getCurrentWeather"
    }

    fn label(&self) -> &str {
        "Fetching weather"
    }

    fn description(&self) -> &str {
        "Gets the current temperature for a given location."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("latitude", ParamType::Number, "latitude of the location")
            .required("longitude", ParamType::Number, "longitude of the location")
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<Value> {
        Ok(json!({
            "latitude": args["latitude"],
            "longitude": args["longitude"],
            "temperature": 18,
        }))
    }
}

pub fn weather_registry() -> ToolRegistry {
    ToolRegistry::builder()
        .declare(Arc::new(LocationTool::default()))
        .and_then(|b| b.declare(Arc::new(WeatherStub)))
        .expect("distinct tool names")
        .build()
}

pub struct SlowTool {
    delay: Duration,
    pub started: Notify,
    pub finished: AtomicBool,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Notify::new(),
            finished: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn label(&self) -> &str {
        "Working slowly"
    }

    fn description(&self) -> &str {
        "Sleeps before answering"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: ToolArgs) -> anyhow::Result<Value> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(json!({"slept": true}))
    }
}

pub struct DelayEchoTool;

#[async_trait]
impl Tool for DelayEchoTool {
    fn name(&self) -> &str {
        "delay_echo"
    }

    fn label(&self) -> &str {
        "Waiting"
    }

    fn description(&self) -> &str {
        "Sleeps for the requested time"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().required("delay_ms", ParamType::Integer, "milliseconds")
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let ms = args["delay_ms"].as_u64().unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}

pub struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn label(&self) -> &str {
        "Exploding"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: ToolArgs) -> anyhow::Result<Value> {
        panic!("tool blew up");
    }
}

pub struct BrokenStore;

#[async_trait]
impl ConversationStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    async fn load_history(&self, _conversation_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        anyhow::bail!("database offline")
    }

    async fn append(
        &self,
        _conversation_id: &str,
        _role: MessageRole,
        _content: &str,
    ) -> anyhow::Result<()> {
        anyhow::bail!("database offline")
    }
}

/// Serves exactly one canned HTTP response on a local port. The handle
/// resolves to the raw request that was received.
pub async fn serve_once(
    status: &str,
    content_type: &str,
    body: &str,
) -> (String, tokio::task::JoinHandle<String>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request_complete(&request) {
                break;
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    });

    (format!("http://{addr}"), handle)
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    raw.len() >= header_end + 4 + content_length
}

/// The JSON body of a raw HTTP request captured by [`serve_once`].
pub fn request_json(raw: &str) -> Value {
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or_default();
    serde_json::from_str(body).unwrap()
}
