//! # iplchat-db
//!
//! The persistence engine (C5/C6): an embedded single-file SQLite database,
//! a relevance-weighted channel cache, a batched message write queue, and
//! a snapshot ring. Everything the broker needs durable state for goes
//! through [`engine::Engine`].

pub mod cache;
pub mod engine;
pub mod queue;
pub mod repository;
pub mod snapshot;

pub use engine::{Engine, EngineError, EngineResult};
