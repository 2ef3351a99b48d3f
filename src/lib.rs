//! Record-and-replay HTTP response cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
