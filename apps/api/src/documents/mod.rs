// Document persistence and version lineage.
// Storage goes through the `DocumentStore` seam (Postgres or in-memory).
// Revisions are append-only; only the lineage root's content is ever rewritten, and only before its revision exists.

pub mod handlers;
pub mod lineage;
pub mod memory_store;
pub mod pg_store;
pub mod policy;
pub mod store;
pub mod word_count;
