pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use factory::create_provider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

use crate::error::GenerationError;
use crate::traits::{ModelEvent, ModelStream};
use futures_util::StreamExt;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

type DecodedEvents = Vec<Result<ModelEvent, GenerationError>>;

/// Turns one line of a provider's streaming body into model events.
pub(crate) trait LineDecoder: Send + 'static {
    fn decode_line(&mut self, line: &str) -> DecodedEvents;

    /// Called once the body ends cleanly, to flush anything still buffered.
    fn finish(&mut self) -> DecodedEvents {
        Vec::new()
    }
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

/// Maps a non-success HTTP status to a generation error carrying the body.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, GenerationError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(GenerationError(format!(
        "{} API error ({}): {}",
        provider, status, error_text
    )))
}

/// Reads a streaming response body line by line on a background task.
///
/// The task stops at the first error it forwards, and as soon as the
/// returned stream is dropped.
pub(crate) fn spawn_line_stream<D: LineDecoder>(
    response: reqwest::Response,
    mut decoder: D,
) -> ModelStream {
    let (tx, rx) = tokio::sync::mpsc::channel(256);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                _ = tx.closed() => return,
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw);
                        if !forward(&tx, decoder.decode_line(line.trim_end())).await {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    let error = GenerationError(format!("stream interrupted: {e}"));
                    let _ = tx.send(Err(error)).await;
                    return;
                }
                None => break,
            }
        }

        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).into_owned();
            if !forward(&tx, decoder.decode_line(line.trim_end())).await {
                return;
            }
        }
        forward(&tx, decoder.finish()).await;
    });

    ReceiverStream::new(rx).boxed()
}

/// Returns false once the consumer is gone or an error has been sent.
async fn forward(
    tx: &tokio::sync::mpsc::Sender<Result<ModelEvent, GenerationError>>,
    events: DecodedEvents,
) -> bool {
    for event in events {
        let failed = event.is_err();
        if tx.send(event).await.is_err() || failed {
            return false;
        }
    }
    true
}

/// Parses streamed tool arguments. Malformed text is passed through as a
/// string so argument validation can report it to the model.
pub(crate) fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
