//! Agent job engine: durable queue, worker runtime, and a tool-using,
//! sandboxed, human-in-the-loop-aware language-model agent loop.

pub mod config;
pub mod domains;
pub mod error;
pub mod kernel;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use kernel::EngineKernel;
