//! taskweave: in-process task execution
//!
//! Two cooperating execution models:
//!
//! - [`ThreadPoolExecutor`] runs independently submitted callables on a
//!   managed set of threads, and [`ScheduledExecutor`] adds delayed and
//!   periodic execution on top of it.
//! - [`ForkJoinPool`] is a work-stealing scheduler for recursive
//!   divide-and-conquer computations written as [`RecursiveTask`]s.
//!
//! # Example
//!
//! ```no_run
//! use taskweave::{ExecutorService, ThreadPoolExecutor};
//!
//! fn main() -> taskweave::Result<()> {
//!     let pool = ThreadPoolExecutor::fixed(4)?;
//!     let answer = pool.submit(|| 6 * 7)?;
//!     assert_eq!(answer.get()?, 42);
//!     pool.shutdown();
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/taskweave")]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod runtime;
pub mod tasks;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

pub use error::{RejectReason, TaskError, TaskFailure, TaskResult};
pub use runtime::context::{current_task_id, interrupted};
pub use runtime::executor::{ExecutorConfig, ExecutorService, RejectionPolicy, ThreadPoolExecutor};
pub use runtime::future::{FailureHook, ResultHandle};
pub use runtime::lifecycle::PoolState;
pub use runtime::scheduled::{ScheduleMode, ScheduledConfig, ScheduledExecutor, ScheduledHandle};
pub use runtime::scheduler::{
    invoke_all, invoke_both, ForkJoinPool, ForkJoinPoolBuilder, ForkJoinTask, PoolStatsSnapshot,
    RecursiveTask, SchedulerConfig, StealStrategy, TaskId, TaskState,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "taskweave";
