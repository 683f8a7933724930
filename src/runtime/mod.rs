//! Runtime system
//!
//! Pools, their lifecycle, and the completion cells that connect submitted
//! work with the code waiting for it.

pub mod context;
pub mod executor;
pub mod future;
pub mod lifecycle;
pub mod scheduled;
pub mod scheduler;
