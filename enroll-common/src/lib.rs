//! Common components and defaults for the node enrollment agent.

pub mod config;
#[cfg(feature = "logging")]
pub mod logging;
pub mod ssh;
