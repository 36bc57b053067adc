use crate::terminal::Renderer;
use anyhow::{Context, Result};
use cirrus_core::{SseDecoder, StreamEvent};
use futures_util::StreamExt;

pub struct AskRequest<'a> {
    pub server: &'a str,
    pub auth_header: &'a str,
    pub user: &'a str,
    pub chat_id: &'a str,
    pub message: &'a str,
}

/// Streams one turn from a running server and renders it. Returns the last
/// event received, which is terminal unless the stream was cut short.
pub async fn ask(request: AskRequest<'_>, renderer: &mut Renderer) -> Result<Option<StreamEvent>> {
    let url = format!(
        "{}/api/messages/stream",
        request.server.trim_end_matches('/')
    );

    let response = reqwest::Client::new()
        .post(&url)
        .header(request.auth_header, request.user)
        .json(&serde_json::json!({
            "chatId": request.chat_id,
            "message": request.message,
        }))
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Server rejected the request ({}): {}", status, body);
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut last = None;

    loop {
        let chunk = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, closing stream");
                break;
            }
            chunk = body.next() => chunk,
        };

        let Some(chunk) = chunk else { break };
        pending.extend_from_slice(&chunk.context("Stream interrupted")?);

        let text = drain_utf8(&mut pending);

        for event in decoder.push(&text) {
            renderer.render(&event);
            let terminal = event.is_terminal();
            last = Some(event);
            if terminal {
                return Ok(last);
            }
        }
    }

    Ok(last)
}

/// Takes the decodable prefix of `pending`. Invalid bytes become U+FFFD; an
/// incomplete trailing sequence stays buffered for the next chunk.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return text;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[..valid_up_to]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid_up_to + len);
                    }
                    None => {
                        pending.drain(..valid_up_to);
                        return text;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sequence_waits_for_the_next_chunk() {
        let mut pending = vec![b'a', 0xC3];
        assert_eq!(drain_utf8(&mut pending), "a");
        assert_eq!(pending, vec![0xC3]);

        pending.push(0xA9);
        assert_eq!(drain_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn invalid_byte_does_not_stall_the_stream() {
        let mut pending = b"event: done\ndata: \xFF\"end\"\n\n".to_vec();
        let text = drain_utf8(&mut pending);

        assert_eq!(text, "event: done\ndata: \u{FFFD}\"end\"\n\n");
        assert!(pending.is_empty());
    }
}
