//! Core domain types and the reconciliation engine for the tour asset
//! build pipeline.
//!
//! Everything in this crate is pure: no I/O, no clients, no clocks.
//! The adapters in `tourbuild-catalog` and `tourbuild-cloud` produce the
//! inputs ([`types::AssetReference`] lists and storage key sets) and
//! consume the outputs ([`report::DispatchReport`]).

pub mod keys;
pub mod reconcile;
pub mod report;
pub mod types;
