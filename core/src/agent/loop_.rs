use crate::agent::{ContextBuilder, ConversationContext, ToolRegistry};
use crate::error::LoopError;
use crate::stream::StreamEvent;
use crate::traits::{
    ConversationStore, ConversationTurn, EventSink, GenerationRequest, MessageRole, ModelEvent,
    Provider, ToolInvocationRequest, ToolInvocationResult,
};
use futures_util::{FutureExt, StreamExt, stream};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const DEFAULT_MAX_ROUND_TRIPS: usize = 10;
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub message: String,
}

impl TurnRequest {
    pub fn new(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    pub generation_passes: usize,
    pub tool_calls: usize,
    pub error: Option<LoopError>,
}

impl TurnOutcome {
    pub fn is_done(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
enum LoopState {
    Generating,
    DispatchingTools(Vec<ToolInvocationRequest>),
    Done,
    Failed(LoopError),
}

/// Everything one request owns while it runs. Nothing here is shared.
struct TurnRun<'a> {
    sink: &'a dyn EventSink,
    context: ConversationContext,
    answer: String,
    generation_passes: usize,
    dispatch_passes: usize,
    tool_calls: usize,
}

pub struct LoopController {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    context_builder: ContextBuilder,
    max_round_trips: usize,
    tool_timeout: Duration,
    tool_concurrency: usize,
}

impl LoopController {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            provider,
            tools,
            store,
            context_builder: ContextBuilder::default(),
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            tool_concurrency: 1,
        }
    }

    pub fn with_context_builder(mut self, context_builder: ContextBuilder) -> Self {
        self.context_builder = context_builder;
        self
    }

    pub fn with_max_round_trips(mut self, max: usize) -> Self {
        self.max_round_trips = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_tool_concurrency(mut self, concurrency: usize) -> Self {
        self.tool_concurrency = concurrency.max(1);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    #[tracing::instrument(skip_all, fields(conversation = %request.conversation_id))]
    pub async fn run(&self, request: &TurnRequest, sink: &dyn EventSink) -> TurnOutcome {
        let mut run = TurnRun {
            sink,
            context: ConversationContext::default(),
            answer: String::new(),
            generation_passes: 0,
            dispatch_passes: 0,
            tool_calls: 0,
        };

        let mut state = match self.start(request, sink).await {
            Ok(context) => {
                run.context = context;
                LoopState::Generating
            }
            Err(e) => LoopState::Failed(e),
        };

        loop {
            state = match state {
                LoopState::Generating => match self.generation_pass(&mut run).await {
                    Ok(requests) if requests.is_empty() => LoopState::Done,
                    Ok(requests) => LoopState::DispatchingTools(requests),
                    Err(e) => LoopState::Failed(e),
                },
                LoopState::DispatchingTools(requests) => {
                    match self.dispatch_pass(&mut run, requests).await {
                        Ok(()) => LoopState::Generating,
                        Err(e) => LoopState::Failed(e),
                    }
                }
                LoopState::Done => return self.finish(request, run, None).await,
                LoopState::Failed(e) => return self.finish(request, run, Some(e)).await,
            };
        }
    }

    async fn start(
        &self,
        request: &TurnRequest,
        sink: &dyn EventSink,
    ) -> Result<ConversationContext, LoopError> {
        sink.send(StreamEvent::Status("generating".to_string()))
            .await?;

        let history = self
            .store
            .load_history(&request.conversation_id)
            .await
            .map_err(|e| LoopError::HistoryUnavailable(e.to_string()))?;
        debug!(messages = history.len(), "loaded conversation history");

        Ok(self.context_builder.build(history, &request.message))
    }

    async fn generation_pass(
        &self,
        run: &mut TurnRun<'_>,
    ) -> Result<Vec<ToolInvocationRequest>, LoopError> {
        run.generation_passes += 1;
        let sink = run.sink;
        debug!(
            pass = run.generation_passes,
            turns = run.context.len(),
            "starting generation pass"
        );

        let request = GenerationRequest {
            system_instruction: run.context.system_instruction(),
            turns: run.context.snapshot(),
            tools: self.tools.describe(),
        };

        let mut events = tokio::select! {
            biased;
            _ = sink.closed() => return Err(LoopError::TransportClosed),
            started = self.provider.generate(request) => started?,
        };

        let mut text = String::new();
        let mut requests = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return Err(LoopError::TransportClosed),
                next = events.next() => next,
            };

            match next {
                None => break,
                Some(Ok(ModelEvent::TextDelta(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment);
                    run.answer.push_str(&fragment);
                    sink.send(StreamEvent::Token(fragment)).await?;
                }
                Some(Ok(ModelEvent::ToolCallRequested(request))) => {
                    debug!(tool = %request.name, id = %request.correlation_id, "model requested tool");
                    requests.push(request);
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }

        if !text.is_empty() {
            run.context.append(ConversationTurn::model(text));
        }

        Ok(requests)
    }

    async fn dispatch_pass(
        &self,
        run: &mut TurnRun<'_>,
        requests: Vec<ToolInvocationRequest>,
    ) -> Result<(), LoopError> {
        if run.dispatch_passes >= self.max_round_trips {
            warn!(
                max = self.max_round_trips,
                pending = requests.len(),
                "tool round-trip limit reached"
            );
            return Err(LoopError::ToolLoopExceeded(self.max_round_trips));
        }
        run.dispatch_passes += 1;
        let sink = run.sink;

        if self.tool_concurrency <= 1 {
            for request in requests {
                sink.send(self.tool_event(&request)).await?;

                let result = tokio::select! {
                    biased;
                    _ = sink.closed() => return Err(LoopError::TransportClosed),
                    result = self.invoke_guarded(&request) => result?,
                };

                run.tool_calls += 1;
                run.context.append_tool_exchange(request, result);
            }
            return Ok(());
        }

        for request in &requests {
            sink.send(self.tool_event(request)).await?;
        }

        // Collected before streaming so the turn future stays `Send` for `tokio::spawn`.
        let invocations: Vec<_> = requests.iter().map(|r| self.invoke_guarded(r)).collect();

        // `buffered` yields in input order, so the log order matches the request order.
        let results: Vec<Result<ToolInvocationResult, LoopError>> = tokio::select! {
            biased;
            _ = sink.closed() => return Err(LoopError::TransportClosed),
            results = stream::iter(invocations)
                .buffered(self.tool_concurrency)
                .collect::<Vec<_>>() => results,
        };

        for (request, result) in requests.into_iter().zip(results) {
            let result = result?;
            run.tool_calls += 1;
            run.context.append_tool_exchange(request, result);
        }

        Ok(())
    }

    fn tool_event(&self, request: &ToolInvocationRequest) -> StreamEvent {
        StreamEvent::ToolInvoked {
            label: self.tools.label(&request.name).to_string(),
        }
    }

    async fn invoke_guarded(
        &self,
        request: &ToolInvocationRequest,
    ) -> Result<ToolInvocationResult, LoopError> {
        let started = Instant::now();
        let invocation = tokio::time::timeout(self.tool_timeout, self.tools.invoke(request));

        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(result)) => {
                info!(
                    tool = %request.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    failed = result.is_failure(),
                    "tool finished"
                );
                Ok(result)
            }
            Ok(Err(_)) => {
                warn!(tool = %request.name, timeout = ?self.tool_timeout, "tool timed out");
                Ok(ToolInvocationResult::failure(
                    request,
                    format!("Tool timed out after {}ms", self.tool_timeout.as_millis()),
                ))
            }
            Err(_) => {
                error!(tool = %request.name, "tool panicked during dispatch");
                Err(LoopError::DispatchFault(request.name.clone()))
            }
        }
    }

    async fn finish(
        &self,
        request: &TurnRequest,
        run: TurnRun<'_>,
        error: Option<LoopError>,
    ) -> TurnOutcome {
        let error = match error {
            None => match run.sink.send(StreamEvent::Done).await {
                Ok(()) => None,
                Err(_) => Some(LoopError::TransportClosed),
            },
            Some(LoopError::TransportClosed) => Some(LoopError::TransportClosed),
            Some(e) => {
                let _ = run
                    .sink
                    .send(StreamEvent::Error(e.public_message().to_string()))
                    .await;
                Some(e)
            }
        };

        match &error {
            None => info!(
                passes = run.generation_passes,
                tool_calls = run.tool_calls,
                "turn completed"
            ),
            Some(e) => warn!(
                passes = run.generation_passes,
                tool_calls = run.tool_calls,
                error = %e,
                "turn failed"
            ),
        }

        self.persist(request, &run.answer, error.is_none()).await;

        TurnOutcome {
            answer: run.answer,
            generation_passes: run.generation_passes,
            tool_calls: run.tool_calls,
            error,
        }
    }

    async fn persist(&self, request: &TurnRequest, answer: &str, completed: bool) {
        if let Err(e) = self
            .store
            .append(&request.conversation_id, MessageRole::User, &request.message)
            .await
        {
            error!(store = self.store.name(), "Failed to store user message: {}", e);
        }

        if !completed && answer.trim().is_empty() {
            return;
        }

        if let Err(e) = self
            .store
            .append(&request.conversation_id, MessageRole::Assistant, answer)
            .await
        {
            error!(store = self.store.name(), "Failed to store assistant message: {}", e);
        }
    }
}
