pub mod config;
pub mod coordinator;
pub mod runtime;
