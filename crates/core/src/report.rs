//! Dispatch result reporting.
//!
//! A [`DispatchReport`] is the invocation's only output: the boundary
//! has no caller to receive an error, so every outcome -- launch, skip,
//! or failure -- is expressed as a report and logged verbatim.

use serde::{Deserialize, Serialize};

/// The backend a dispatch attempt targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    PersistentInstance,
    EphemeralTask,
}

/// Result of one reconcile-and-dispatch invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// Number of catalog assets confirmed present in storage.
    pub matching_asset_count: usize,
    /// Whether a build job was actually started.
    pub dispatched: bool,
    /// Backend the attempt targeted.
    pub backend_kind: BackendKind,
    /// Identifier of the launched job (task ARN or command id).
    pub backend_job_id: Option<String>,
    /// Human-readable detail: skip reason, failure diagnostics, or
    /// completion note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DispatchReport {
    /// A job was started on the backend.
    pub fn launched(
        backend_kind: BackendKind,
        matching_asset_count: usize,
        backend_job_id: impl Into<String>,
    ) -> Self {
        Self {
            matching_asset_count,
            dispatched: true,
            backend_kind,
            backend_job_id: Some(backend_job_id.into()),
            message: None,
        }
    }

    /// No job was started: empty match set, guard refusal, or a failure
    /// before submission.
    pub fn skipped(
        backend_kind: BackendKind,
        matching_asset_count: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            matching_asset_count,
            dispatched: false,
            backend_kind,
            backend_job_id: None,
            message: Some(message.into()),
        }
    }

    /// Attach or replace the report message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
