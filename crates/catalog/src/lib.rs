//! Catalog access for the tour asset build pipeline.
//!
//! Covers the read side of the document catalog: connection-string
//! retrieval from Secrets Manager, a cached MongoDB client that is
//! liveness-checked before every reuse, the tour/scene document models
//! (including the legacy/current storage-key field unification), and
//! the projection of catalog scenes into
//! [`tourbuild_core::types::AssetReference`] values.

pub mod connection;
pub mod models;
pub mod repo;
pub mod secrets;
