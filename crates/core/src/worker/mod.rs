//! Worker pool: consumes execution messages and runs the executor.

mod config;
mod pool;

pub use config::WorkerConfig;
pub use pool::WorkerPool;
