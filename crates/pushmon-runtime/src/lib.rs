//! Execution primitives shared by the agent: an interruptible
//! retry-with-backoff runner and a bounded worker pool.

pub mod pool;
pub mod retry;

pub use pool::{PoolError, PoolState, PoolStats, WorkerPool};
pub use retry::{RetryError, RetryExecutor};
