use crate::stream::StreamEvent;

/// Renders one event as a Server-Sent-Events frame.
pub fn encode(event: &StreamEvent) -> String {
    let mut frame = format!("event: {}\n", event.kind());
    for line in event.data().split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Incremental SSE decoder; feed it arbitrary chunks, get back whole events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    kind: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => self.kind = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        let kind = self.kind.take().unwrap_or_else(|| "message".to_string());
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        let event = StreamEvent::from_wire(&kind, &data);
        if event.is_none() {
            tracing::debug!(kind = %kind, "ignoring unrecognised stream event");
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_like_event_stream() {
        assert_eq!(
            encode(&StreamEvent::Status("generating".into())),
            "event: status\ndata: generating\n\n"
        );
        assert_eq!(encode(&StreamEvent::Done), "event: done\ndata: end\n\n");
    }

    #[test]
    fn multiline_error_uses_several_data_lines() {
        let frame = encode(&StreamEvent::Error("first\nsecond".into()));
        assert_eq!(frame, "event: error\ndata: first\ndata: second\n\n");

        let mut decoder = SseDecoder::new();
        assert_eq!(
            decoder.push(&frame),
            vec![StreamEvent::Error("first\nsecond".into())]
        );
    }

    #[test]
    fn decoder_handles_split_chunks() {
        let stream = [
            encode(&StreamEvent::Status("generating".into())),
            encode(&StreamEvent::ToolInvoked { label: "Getting location".into() }),
            encode(&StreamEvent::Token("Hi".into())),
            encode(&StreamEvent::Done),
        ]
        .concat();

        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in stream.as_bytes().chunks(7) {
            events.extend(decoder.push(std::str::from_utf8(chunk).unwrap()));
        }

        assert_eq!(
            events,
            vec![
                StreamEvent::Status("generating".into()),
                StreamEvent::ToolInvoked { label: "Getting location".into() },
                StreamEvent::Token("Hi".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn decoder_skips_comments_and_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(":keep-alive\r\n\r\nevent: token\r\ndata: \"a\"\r\n\r\n");
        assert_eq!(events, vec![StreamEvent::Token("a".into())]);
    }
}
