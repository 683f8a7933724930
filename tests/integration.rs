#[path = "integration/executors.rs"]
mod executors;
#[path = "integration/fork_join.rs"]
mod fork_join;
#[path = "integration/properties.rs"]
mod properties;
