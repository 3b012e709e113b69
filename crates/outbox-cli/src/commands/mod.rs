pub mod cache;
pub mod common;
pub mod completions;
pub mod config;
pub mod demo;
pub mod enqueue;
pub mod queue;
pub mod reset;
pub mod resolve;
pub mod status;
pub mod sync;
pub mod watch;
