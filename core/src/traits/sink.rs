use crate::error::TransportClosed;
use crate::stream::StreamEvent;
use async_trait::async_trait;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Serializes and flushes one event. Fails once the client is gone.
    async fn send(&self, event: StreamEvent) -> Result<(), TransportClosed>;

    /// Resolves when the client has gone away. Never resolves for a live sink.
    async fn closed(&self);
}
