//! `tourbuild-worker` library crate.
//!
//! Orchestrates one reconcile-and-dispatch invocation: trigger parsing,
//! catalog/storage reconciliation, the concurrency guard, and dispatch
//! to the configured backend. The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod dispatch;
pub mod invocation;
pub mod trigger;
