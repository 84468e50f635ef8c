pub mod cache;
pub mod config;
pub mod delta;
pub mod fetch;
pub mod watch;
