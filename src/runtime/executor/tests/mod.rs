//! Executor unit tests

mod thread_pool;
