pub mod event;
pub mod frame;
pub mod sink;

pub use event::StreamEvent;
pub use frame::{SseDecoder, encode};
pub use sink::ChannelSink;
