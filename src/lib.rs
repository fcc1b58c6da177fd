//! Namespaced, content-addressed persistent memory engine with vector
//! retrieval, forgetting-curve consolidation, and namespace fork/merge.
//!
//! A [`crate::engine::MemoryEngine`] stores free-text fragments tagged with
//! provenance and an embedding, retrieves them by a token-budgeted blend of
//! semantic similarity, recency, and access frequency, and runs periodic
//! consolidation (dedup, decay, archival, hard delete) either on demand or on
//! a background schedule. Namespaces (`{project}:{agent}`) isolate agents
//! from each other while supporting explicit fork, merge, and cross-agent
//! retrieval.
//!
//! Every collaborator is behind a trait: [`storage::StorageBackend`] for
//! persistence and [`embeddings::Embedder`] for vectorization, each with an
//! in-process reference implementation so the engine runs with zero external
//! dependencies out of the box.

pub mod clock;
pub mod config;
pub mod consolidation;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod health;
pub mod index;
pub mod ingest;
pub mod namespace;
pub mod prelude;
pub mod retrieval;
pub mod storage;
pub mod types;
pub mod universe;

pub use engine::MemoryEngine;
pub use error::{MemoryError, Result};
