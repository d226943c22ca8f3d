//! Duplicate-run prevention for the ephemeral task backend.
//!
//! Advisory read-then-act check: list the cluster's pending tasks,
//! resolve each to its task-definition family, and refuse dispatch when
//! the requesting family already has a run in flight. A race between
//! two near-simultaneous invocations is accepted; the guard is about
//! the common case, not mutual exclusion.

use async_trait::async_trait;
use aws_sdk_ecs::types::DesiredStatus;

/// A task the backend reports as pending, resolved to its family.
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub arn: String,
    pub family: String,
}

/// Guard verdict plus the conflicting run ids for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardDecision {
    pub busy: bool,
    pub conflicting: Vec<String>,
}

impl GuardDecision {
    fn idle() -> Self {
        Self {
            busy: false,
            conflicting: Vec::new(),
        }
    }
}

/// Errors from pending-task listings.
#[derive(Debug, thiserror::Error)]
#[error("Pending-task listing failed: {0}")]
pub struct GuardError(pub String);

/// Source of pending-task listings for a cluster.
#[async_trait]
pub trait PendingTaskSource: Send + Sync {
    async fn pending_tasks(&self, cluster: &str) -> Result<Vec<PendingTask>, GuardError>;
}

/// Report whether a run from `family` is already pending in `cluster`.
///
/// A listing failure fails open: availability of dispatch is preferred
/// over duplicate protection, and the failure is logged at warn.
pub async fn check_family_busy(
    source: &dyn PendingTaskSource,
    cluster: &str,
    family: &str,
) -> GuardDecision {
    match source.pending_tasks(cluster).await {
        Ok(tasks) => {
            let conflicting: Vec<String> = tasks
                .into_iter()
                .filter(|task| task.family == family)
                .map(|task| task.arn)
                .collect();
            if !conflicting.is_empty() {
                tracing::info!(cluster, family, ?conflicting, "Build already pending");
            }
            GuardDecision {
                busy: !conflicting.is_empty(),
                conflicting,
            }
        }
        Err(e) => {
            tracing::warn!(
                cluster,
                family,
                error = %e,
                "Pending-task listing failed; failing open",
            );
            GuardDecision::idle()
        }
    }
}

/// Extract the family name from a task-definition reference
/// (`arn:aws:ecs:…:task-definition/family:revision`, `family:revision`,
/// or a bare family name).
pub fn family_from_task_definition(reference: &str) -> &str {
    let tail = reference.rsplit('/').next().unwrap_or(reference);
    tail.split(':').next().unwrap_or(tail)
}

// ---------------------------------------------------------------------------
// ECS implementation
// ---------------------------------------------------------------------------

/// ECS-backed [`PendingTaskSource`].
pub struct EcsPendingTaskSource {
    client: aws_sdk_ecs::Client,
}

impl EcsPendingTaskSource {
    pub fn new(client: aws_sdk_ecs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PendingTaskSource for EcsPendingTaskSource {
    async fn pending_tasks(&self, cluster: &str) -> Result<Vec<PendingTask>, GuardError> {
        let listed = self
            .client
            .list_tasks()
            .cluster(cluster)
            .desired_status(DesiredStatus::Pending)
            .send()
            .await
            .map_err(|e| GuardError(e.to_string()))?;

        let arns = listed.task_arns();
        if arns.is_empty() {
            return Ok(Vec::new());
        }

        let described = self
            .client
            .describe_tasks()
            .cluster(cluster)
            .set_tasks(Some(arns.to_vec()))
            .send()
            .await
            .map_err(|e| GuardError(e.to_string()))?;

        let tasks = described
            .tasks()
            .iter()
            .filter_map(|task| {
                let arn = task.task_arn()?.to_string();
                let family =
                    family_from_task_definition(task.task_definition_arn()?).to_string();
                Some(PendingTask { arn, family })
            })
            .collect();

        Ok(tasks)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
