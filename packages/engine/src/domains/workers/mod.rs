//! Worker domain: the runtime that claims and executes jobs.

pub mod runtime;

pub use runtime::{WorkerRuntime, WorkerRuntimeConfig};
