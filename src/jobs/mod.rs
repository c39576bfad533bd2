//! Embedding job queue: which content units need (re)embedding and how their
//! last attempt went.

pub mod queue;
pub mod types;
