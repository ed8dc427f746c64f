// Generation sessions: drive a workflow run, reduce its events to display state,
// commit the result into the document lineage.
// Engine access goes through the `WorkflowEngine` seam; HTTP lives in workflow_client.

pub mod engine;
pub mod events;
pub mod handlers;
pub mod inputs;
pub mod paragraphs;
pub mod reducer;
pub mod registry;
pub mod session;
pub mod snapshot;

#[cfg(test)]
pub mod testing;
