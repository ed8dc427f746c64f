//! Incremental `text/event-stream` decoder for workflow runs.
//!
//! Network chunks may split a frame anywhere, including inside a UTF-8 sequence,
//! so bytes are buffered until a full line is available. Frames are `data:`
//! lines terminated by a blank line; the payload is the engine's JSON event.

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::generation::events::GenerationEvent;
use crate::workflow_client::WorkflowError;

#[derive(Debug, Deserialize)]
struct WireEvent {
    event: String,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    workflow_run_id: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn node_label(data: &Value) -> String {
    str_field(data, "title")
        .or_else(|| str_field(data, "node_type"))
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    data_lines: Vec<String>,
    seen_text_chunk: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<GenerationEvent>, WorkflowError> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            let line = std::str::from_utf8(&line)
                .map_err(|e| WorkflowError::MalformedFrame(format!("invalid UTF-8: {e}")))?;
            let line = line.strip_suffix('\r').unwrap_or(line);

            if let Some(event) = self.feed_line(line)? {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Flushes a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Result<Vec<GenerationEvent>, WorkflowError> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            let line = std::str::from_utf8(&rest)
                .map_err(|e| WorkflowError::MalformedFrame(format!("invalid UTF-8: {e}")))?
                .trim_end_matches('\r')
                .to_string();
            if let Some(event) = self.feed_line(&line)? {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch()? {
            events.push(event);
        }
        Ok(events)
    }

    fn feed_line(&mut self, line: &str) -> Result<Option<GenerationEvent>, WorkflowError> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return Ok(None);
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // `event:`, `id:` and `retry:` fields carry nothing the JSON payload lacks.
        Ok(None)
    }

    fn dispatch(&mut self) -> Result<Option<GenerationEvent>, WorkflowError> {
        if self.data_lines.is_empty() {
            return Ok(None);
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();

        let wire: WireEvent = serde_json::from_str(&payload).map_err(|e| {
            WorkflowError::MalformedFrame(format!(
                "{e}: {}",
                payload.chars().take(120).collect::<String>()
            ))
        })?;
        Ok(self.convert(wire))
    }

    fn convert(&mut self, wire: WireEvent) -> Option<GenerationEvent> {
        let data = &wire.data;
        match wire.event.as_str() {
            "workflow_started" => Some(GenerationEvent::WorkflowStarted {
                workflow_run_id: wire
                    .workflow_run_id
                    .or_else(|| str_field(data, "id").map(String::from))
                    .unwrap_or_default(),
                task_id: wire.task_id.unwrap_or_default(),
            }),
            "node_started" => Some(GenerationEvent::NodeStarted {
                label: node_label(data),
            }),
            "node_finished" => Some(GenerationEvent::NodeFinished {
                label: node_label(data),
            }),
            "text_chunk" => {
                let is_first = !self.seen_text_chunk;
                self.seen_text_chunk = true;
                Some(GenerationEvent::TextChunk {
                    text: str_field(data, "text").unwrap_or_default().to_string(),
                    is_first,
                })
            }
            "workflow_finished" => match str_field(data, "status") {
                Some(status @ ("failed" | "stopped")) => Some(GenerationEvent::Error {
                    message: str_field(data, "error")
                        .map(String::from)
                        .unwrap_or_else(|| format!("workflow {status}")),
                    code: Some(status.to_string()),
                }),
                _ => Some(GenerationEvent::WorkflowFinished {
                    outputs: data.get("outputs").cloned().unwrap_or(Value::Null),
                }),
            },
            "error" => Some(GenerationEvent::Error {
                message: wire
                    .message
                    .unwrap_or_else(|| "workflow engine error".to_string()),
                code: wire.code,
            }),
            other => {
                debug!("Ignoring workflow event '{other}'");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> String {
        format!("data: {value}\n\n")
    }

    #[test]
    fn test_decodes_full_sequence_and_marks_first_chunk() {
        let body = [
            frame(json!({"event": "workflow_started", "task_id": "t1", "workflow_run_id": "r1", "data": {"id": "r1"}})),
            frame(json!({"event": "node_started", "data": {"title": "Plan"}})),
            frame(json!({"event": "text_chunk", "data": {"text": "Hello "}})),
            frame(json!({"event": "text_chunk", "data": {"text": "world"}})),
            frame(json!({"event": "node_finished", "data": {"node_type": "llm"}})),
            frame(json!({"event": "workflow_finished", "data": {"status": "succeeded", "outputs": {"text": "Hello world"}}})),
        ]
        .concat();

        let mut decoder = SseDecoder::new();
        let events = decoder.push(body.as_bytes()).unwrap();

        assert_eq!(
            events,
            vec![
                GenerationEvent::WorkflowStarted {
                    workflow_run_id: "r1".to_string(),
                    task_id: "t1".to_string()
                },
                GenerationEvent::NodeStarted {
                    label: "Plan".to_string()
                },
                GenerationEvent::TextChunk {
                    text: "Hello ".to_string(),
                    is_first: true
                },
                GenerationEvent::TextChunk {
                    text: "world".to_string(),
                    is_first: false
                },
                GenerationEvent::NodeFinished {
                    label: "llm".to_string()
                },
                GenerationEvent::WorkflowFinished {
                    outputs: json!({"text": "Hello world"})
                },
            ]
        );
    }

    #[test]
    fn test_frames_split_across_network_chunks() {
        let body = frame(json!({"event": "text_chunk", "data": {"text": "你好"}}));
        let bytes = body.as_bytes();
        let mut decoder = SseDecoder::new();

        // Split inside the multi-byte sequence of the first CJK character.
        let split = body.find('你').unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        let events = decoder.push(&bytes[split..]).unwrap();
        assert_eq!(
            events,
            vec![GenerationEvent::TextChunk {
                text: "你好".to_string(),
                is_first: true
            }]
        );
    }

    #[test]
    fn test_crlf_comments_and_ping_are_ignored() {
        let body = ": keepalive\r\n\r\nevent: ping\r\n\r\ndata: {\"event\":\"ping\"}\r\n\r\n";
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(body.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_workflow_finished_becomes_error() {
        let body = frame(json!({"event": "workflow_finished", "data": {"status": "failed", "error": "quota exceeded"}}));
        let events = SseDecoder::new().push(body.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![GenerationEvent::Error {
                message: "quota exceeded".to_string(),
                code: Some("failed".to_string())
            }]
        );
    }

    #[test]
    fn test_error_event_carries_code() {
        let body = frame(json!({"event": "error", "status": 400, "code": "invalid_param", "message": "bad input"}));
        let events = SseDecoder::new().push(body.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![GenerationEvent::Error {
                message: "bad input".to_string(),
                code: Some("invalid_param".to_string())
            }]
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push(b"data: {\"event\":\"workflow_finished\",\"data\":{\"outputs\":{}}}")
            .unwrap();
        assert!(events.is_empty());
        let events = decoder.finish().unwrap();
        assert_eq!(
            events,
            vec![GenerationEvent::WorkflowFinished { outputs: json!({}) }]
        );
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let err = SseDecoder::new().push(b"data: {not json}\n\n").unwrap_err();
        assert!(matches!(err, WorkflowError::MalformedFrame(_)));
    }
}
