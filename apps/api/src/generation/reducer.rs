//! StreamEventReducer: pure, synchronous state machine over generation events.
//!
//! Idle → Requesting → StreamingPending → StreamingActive → Finalizing
//!      → { Committed | Failed | Stopped }
//!
//! No I/O happens here. The session reads the returned `Step` and performs the
//! single commit write when the reducer reaches `Finalizing`.
//!
//! Chunks are kept as an ordered list and only joined when the text is read,
//! so applying a chunk is O(chunk) regardless of how much has arrived.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generation::events::{output_text, GenerationEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Requesting,
    StreamingPending,
    StreamingActive,
    Finalizing,
    Committed,
    Failed,
    Stopped,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Committed | Phase::Failed | Phase::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The engine reported an error event or a failed run.
    Engine,
    /// The channel dropped, could not be opened, or closed early.
    Transport,
    /// The run finished without any usable text.
    EmptyResult,
    /// The free revision was already used.
    Permission,
    /// Storage rejected the write (lost a race, content frozen).
    Conflict,
    /// Generation succeeded but the commit write failed.
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub code: Option<String>,
}

/// Authoritative content once the run has finished.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalContent {
    Text(String),
    /// Explicit sentinel: nothing usable came back. Never committed.
    Empty,
}

/// What the caller has to do after applying an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    /// First chunk arrived; the blocking loading indicator is released.
    LoadingReleased,
    /// Run finished; the commit path must run now.
    Finalize(FinalContent),
    /// An error event ended the session.
    Terminated,
    /// Event arrived outside an accepting phase and was dropped.
    Ignored,
}

/// Render-ready view of the reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    pub phase: Phase,
    pub step_label: Option<String>,
    pub text: String,
    pub loading: bool,
    pub workflow_run_id: Option<String>,
    pub task_id: Option<String>,
    pub committed_document_uuid: Option<Uuid>,
    pub failure: Option<Failure>,
    /// Visible content that was not persisted.
    pub unsaved: bool,
}

#[derive(Debug)]
pub struct StreamEventReducer {
    phase: Phase,
    step_label: Option<String>,
    chunks: Vec<String>,
    loading: bool,
    workflow_run_id: Option<String>,
    task_id: Option<String>,
    final_content: Option<FinalContent>,
    committed_document_uuid: Option<Uuid>,
    failure: Option<Failure>,
}

impl Default for StreamEventReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEventReducer {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            step_label: None,
            chunks: Vec::new(),
            loading: false,
            workflow_run_id: None,
            task_id: None,
            final_content: None,
            committed_document_uuid: None,
            failure: None,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn workflow_run_id(&self) -> Option<&str> {
        self.workflow_run_id.as_deref()
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    #[cfg(test)]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Request sent: Idle → Requesting, loading indicator on.
    pub fn begin(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::Requesting;
        self.loading = true;
        true
    }

    pub fn apply(&mut self, event: GenerationEvent) -> Step {
        if matches!(self.phase, Phase::Idle | Phase::Finalizing) || self.is_terminal() {
            return Step::Ignored;
        }

        match event {
            GenerationEvent::WorkflowStarted {
                workflow_run_id,
                task_id,
            } => {
                self.workflow_run_id = Some(workflow_run_id).filter(|s| !s.is_empty());
                self.task_id = Some(task_id).filter(|s| !s.is_empty());
                if self.phase == Phase::Requesting {
                    self.phase = Phase::StreamingPending;
                }
                Step::Continue
            }
            GenerationEvent::NodeStarted { label } => {
                if !label.is_empty() {
                    self.step_label = Some(label);
                }
                Step::Continue
            }
            GenerationEvent::NodeFinished { .. } => Step::Continue,
            GenerationEvent::TextChunk { text, is_first } => {
                self.chunks.push(text);
                // A missing workflow_started or is_first flag must not keep the spinner up.
                let awaiting_first =
                    matches!(self.phase, Phase::Requesting | Phase::StreamingPending);
                if awaiting_first || (is_first && self.loading) {
                    self.phase = Phase::StreamingActive;
                    self.loading = false;
                    Step::LoadingReleased
                } else {
                    Step::Continue
                }
            }
            GenerationEvent::WorkflowFinished { outputs } => {
                let content = match output_text(&outputs) {
                    Some(text) => FinalContent::Text(text.to_string()),
                    None => {
                        let joined = self.chunks.concat();
                        if joined.trim().is_empty() {
                            FinalContent::Empty
                        } else {
                            FinalContent::Text(joined)
                        }
                    }
                };
                self.phase = Phase::Finalizing;
                self.loading = false;
                self.final_content = Some(content.clone());
                Step::Finalize(content)
            }
            GenerationEvent::Error { message, code } => {
                self.fail(FailureKind::Engine, message, code);
                Step::Terminated
            }
        }
    }

    /// Supplies recovered text for an `Empty` result while still `Finalizing`.
    pub fn recover_empty(&mut self, text: String) -> FinalContent {
        if self.phase == Phase::Finalizing
            && self.final_content == Some(FinalContent::Empty)
            && !text.trim().is_empty()
        {
            self.final_content = Some(FinalContent::Text(text));
        }
        self.final_content.clone().unwrap_or(FinalContent::Empty)
    }

    pub fn mark_committed(&mut self, document_uuid: Uuid) -> bool {
        if self.phase != Phase::Finalizing {
            return false;
        }
        self.phase = Phase::Committed;
        self.committed_document_uuid = Some(document_uuid);
        true
    }

    /// → Failed from any non-terminal phase. Buffered text stays visible.
    pub fn fail(&mut self, kind: FailureKind, message: String, code: Option<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.phase = Phase::Failed;
        self.loading = false;
        self.failure = Some(Failure {
            kind,
            message,
            code,
        });
        true
    }

    /// → Stopped from any non-terminal phase.
    pub fn stop(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.phase = Phase::Stopped;
        self.loading = false;
        true
    }

    /// Current text: the authoritative final content once known, else the joined chunks.
    pub fn text(&self) -> String {
        match &self.final_content {
            Some(FinalContent::Text(text)) => text.clone(),
            _ => self.chunks.concat(),
        }
    }

    pub fn view(&self) -> DisplayState {
        let text = self.text();
        let unsaved = matches!(self.phase, Phase::Failed | Phase::Stopped) && !text.is_empty();
        DisplayState {
            phase: self.phase,
            step_label: self.step_label.clone(),
            text,
            loading: self.loading,
            workflow_run_id: self.workflow_run_id.clone(),
            task_id: self.task_id.clone(),
            committed_document_uuid: self.committed_document_uuid,
            failure: self.failure.clone(),
            unsaved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started() -> GenerationEvent {
        GenerationEvent::WorkflowStarted {
            workflow_run_id: "run-1".to_string(),
            task_id: "task-1".to_string(),
        }
    }

    fn chunk(text: &str, is_first: bool) -> GenerationEvent {
        GenerationEvent::TextChunk {
            text: text.to_string(),
            is_first,
        }
    }

    fn begun() -> StreamEventReducer {
        let mut reducer = StreamEventReducer::new();
        assert!(reducer.begin());
        reducer
    }

    #[test]
    fn test_hello_world_sequence_releases_loading_on_first_chunk() {
        let mut reducer = begun();
        assert!(reducer.view().loading);

        assert_eq!(reducer.apply(started()), Step::Continue);
        assert_eq!(reducer.phase(), Phase::StreamingPending);
        assert!(reducer.view().loading);

        reducer.apply(GenerationEvent::NodeStarted {
            label: "Plan".to_string(),
        });
        assert_eq!(reducer.view().step_label.as_deref(), Some("Plan"));
        assert_eq!(reducer.phase(), Phase::StreamingPending);

        assert_eq!(reducer.apply(chunk("Hello ", true)), Step::LoadingReleased);
        assert_eq!(reducer.phase(), Phase::StreamingActive);
        assert!(!reducer.view().loading, "loading must drop on the first chunk");

        assert_eq!(reducer.apply(chunk("world", false)), Step::Continue);
        assert_eq!(reducer.view().text, "Hello world");

        let step = reducer.apply(GenerationEvent::WorkflowFinished {
            outputs: json!({ "text": "Hello world" }),
        });
        assert_eq!(
            step,
            Step::Finalize(FinalContent::Text("Hello world".to_string()))
        );
        assert_eq!(reducer.phase(), Phase::Finalizing);

        let uuid = Uuid::new_v4();
        assert!(reducer.mark_committed(uuid));
        let view = reducer.view();
        assert_eq!(view.phase, Phase::Committed);
        assert_eq!(view.committed_document_uuid, Some(uuid));
        assert!(!view.unsaved);
    }

    #[test]
    fn test_outputs_text_is_authoritative_over_chunks() {
        let mut reducer = begun();
        reducer.apply(started());
        reducer.apply(chunk("draft", true));
        let step = reducer.apply(GenerationEvent::WorkflowFinished {
            outputs: json!({ "text": "polished" }),
        });
        assert_eq!(step, Step::Finalize(FinalContent::Text("polished".to_string())));
        assert_eq!(reducer.text(), "polished");
    }

    #[test]
    fn test_empty_outputs_fall_back_to_chunks() {
        let mut reducer = begun();
        reducer.apply(started());
        reducer.apply(chunk("from ", true));
        reducer.apply(chunk("chunks", false));
        let step = reducer.apply(GenerationEvent::WorkflowFinished { outputs: json!({}) });
        assert_eq!(step, Step::Finalize(FinalContent::Text("from chunks".to_string())));
    }

    #[test]
    fn test_no_text_anywhere_yields_empty_sentinel() {
        let mut reducer = begun();
        reducer.apply(started());
        reducer.apply(GenerationEvent::NodeStarted {
            label: "Plan".to_string(),
        });
        let step = reducer.apply(GenerationEvent::WorkflowFinished { outputs: json!({}) });
        assert_eq!(step, Step::Finalize(FinalContent::Empty));

        // Recovery only accepts real text.
        assert_eq!(reducer.recover_empty("   ".to_string()), FinalContent::Empty);
        assert_eq!(
            reducer.recover_empty("late text".to_string()),
            FinalContent::Text("late text".to_string())
        );
    }

    #[test]
    fn test_error_after_partial_chunks_keeps_unsaved_draft() {
        let mut reducer = begun();
        reducer.apply(started());
        reducer.apply(chunk("Hel", true));
        let step = reducer.apply(GenerationEvent::Error {
            message: "upstream timeout".to_string(),
            code: Some("timeout".to_string()),
        });
        assert_eq!(step, Step::Terminated);

        let view = reducer.view();
        assert_eq!(view.phase, Phase::Failed);
        assert_eq!(view.text, "Hel");
        assert!(view.unsaved);
        let failure = view.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Engine);
        assert_eq!(failure.code.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_events_after_terminal_are_ignored() {
        let mut reducer = begun();
        reducer.apply(started());
        assert!(reducer.stop());
        assert_eq!(reducer.apply(chunk("late", true)), Step::Ignored);
        assert_eq!(reducer.chunk_count(), 0);
        assert!(!reducer.stop());
        assert!(!reducer.fail(FailureKind::Transport, "x".to_string(), None));
        assert_eq!(reducer.phase(), Phase::Stopped);
    }

    #[test]
    fn test_events_before_begin_are_ignored() {
        let mut reducer = StreamEventReducer::new();
        assert_eq!(reducer.apply(started()), Step::Ignored);
        assert_eq!(reducer.phase(), Phase::Idle);
    }

    #[test]
    fn test_events_while_finalizing_are_ignored() {
        let mut reducer = begun();
        reducer.apply(started());
        reducer.apply(GenerationEvent::WorkflowFinished {
            outputs: json!({ "text": "done" }),
        });
        assert_eq!(reducer.apply(chunk("extra", false)), Step::Ignored);
        assert_eq!(reducer.text(), "done");
    }

    #[test]
    fn test_chunk_without_workflow_started_still_releases_loading() {
        let mut reducer = begun();
        assert_eq!(reducer.apply(chunk("Hi", false)), Step::LoadingReleased);
        assert_eq!(reducer.phase(), Phase::StreamingActive);
    }

    #[test]
    fn test_persistence_failure_from_finalizing() {
        let mut reducer = begun();
        reducer.apply(started());
        reducer.apply(chunk("Body", true));
        reducer.apply(GenerationEvent::WorkflowFinished { outputs: json!({}) });
        assert!(reducer.fail(
            FailureKind::Persistence,
            "write failed".to_string(),
            None
        ));
        let view = reducer.view();
        assert_eq!(view.phase, Phase::Failed);
        assert_eq!(view.text, "Body");
        assert!(view.unsaved);
        assert!(!reducer.mark_committed(Uuid::new_v4()));
    }

    #[test]
    fn test_stop_from_every_non_terminal_phase() {
        for events in [
            vec![],
            vec![started()],
            vec![started(), chunk("a", true)],
        ] {
            let mut reducer = begun();
            for e in events {
                reducer.apply(e);
            }
            assert!(reducer.stop());
            assert_eq!(reducer.phase(), Phase::Stopped);
            assert!(!reducer.view().loading);
        }
    }

    #[test]
    fn test_begin_only_from_idle() {
        let mut reducer = begun();
        assert!(!reducer.begin());
    }
}
