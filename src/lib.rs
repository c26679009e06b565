//! lxc-isolation: executor isolation for cluster workers
//! Launches executors inside LXC containers, keeps their cgroup limits in step
//! with resource assignments, and reports containers that die on their own.

pub mod cli;
pub mod config;
pub mod driver;
pub mod isolation;
pub mod launcher;
pub mod reaper;
pub mod resource_limits;
pub mod tracking;
pub mod types;
pub mod worker;

pub use crate::isolation::{IsolationModule, LxcIsolationModule};
pub use crate::types::{IsolationError, Result};
