//! A small worker pool tailored to phase-structured batch processing.
//!
//! The read pipeline runs in strict phases: a batch of tasks is posted, all
//! of them run to completion on a fixed set of worker threads, and only then
//! does the next phase begin. [`PhasePool::run_phase`] is that barrier: it
//! blocks until every task of the batch has finished (or been skipped after
//! a failure) and returns the first error any task produced.

pub mod phase_pool;
pub mod task_queue;

pub use phase_pool::PhasePool;
