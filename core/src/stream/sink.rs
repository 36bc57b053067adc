use crate::error::TransportClosed;
use crate::stream::StreamEvent;
use crate::traits::EventSink;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Sink backed by a bounded channel. A full channel makes the loop wait, and
/// dropping the receiver closes the sink.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: StreamEvent) -> Result<(), TransportClosed> {
        self.tx.send(event).await.map_err(|_| TransportClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
