//! Persistent build instance lifecycle control.
//!
//! Drives one long-lived build VM through start transitions, waiting on
//! the backend-reported state. The backend is the only source of truth;
//! this module reads states and waits, it never caches them across
//! dispatch attempts.

use std::time::Duration;

use async_trait::async_trait;
use tourbuild_core::types::InstanceState;

use crate::poll::{poll_until, PollConfig, PollDecision, PollError, Sleeper};

/// Interval between instance state probes.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Attempt ceiling for one state wait (a 5-minute window at 10 s).
pub const STATE_POLL_ATTEMPTS: u32 = 30;

/// Errors from the instance lifecycle layer.
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    /// The backend does not know the configured instance.
    #[error("Instance {instance_id} not found")]
    NotFound { instance_id: String },

    /// A state read or start request failed.
    #[error("Instance request failed: {0}")]
    Request(String),

    /// The instance never reached the target state within the ceiling.
    /// Reported as a value, not retried here; retry policy belongs to
    /// the invoking schedule.
    #[error("Instance still not {target:?} after {attempts} state checks")]
    StateDeadline {
        target: InstanceState,
        attempts: u32,
    },
}

/// Read/start access to one remote instance.
#[async_trait]
pub trait InstanceControl: Send + Sync {
    /// Current backend-reported state.
    async fn current_state(&self) -> Result<InstanceState, InstanceError>;

    /// Issue a start request. Returns once the request is accepted, not
    /// once the instance is running.
    async fn start(&self) -> Result<(), InstanceError>;
}

/// Outcome of [`InstanceLifecycle::ensure_running`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The instance was already running when observed. This doubles as
    /// the concurrency signal for the persistent backend: a build is
    /// presumed already in progress.
    AlreadyRunning,
    /// The instance was started (stopping instances are first waited to
    /// a full stop) and has reached Running.
    Started,
}

/// State machine over one instance's lifecycle.
pub struct InstanceLifecycle<'a> {
    control: &'a dyn InstanceControl,
    sleeper: &'a dyn Sleeper,
    poll: PollConfig,
}

impl<'a> InstanceLifecycle<'a> {
    pub fn new(control: &'a dyn InstanceControl, sleeper: &'a dyn Sleeper) -> Self {
        Self::with_poll_config(
            control,
            sleeper,
            PollConfig::new(STATE_POLL_INTERVAL, STATE_POLL_ATTEMPTS),
        )
    }

    pub fn with_poll_config(
        control: &'a dyn InstanceControl,
        sleeper: &'a dyn Sleeper,
        poll: PollConfig,
    ) -> Self {
        Self {
            control,
            sleeper,
            poll,
        }
    }

    /// Poll until the instance reports Running.
    pub async fn wait_until_running(&self) -> Result<(), InstanceError> {
        self.wait_for(&InstanceState::Running).await
    }

    /// Poll until the instance reports Stopped.
    pub async fn wait_until_stopped(&self) -> Result<(), InstanceError> {
        self.wait_for(&InstanceState::Stopped).await
    }

    /// Drive the instance to Running, reporting whether it was already
    /// there.
    ///
    /// A Stopping instance is waited to a full stop before the start
    /// request, because starting mid-stop is rejected by the backend.
    /// After a cold start callers still owe the boot grace delay
    /// ([`boot_grace`](Self::boot_grace)) before submitting commands.
    pub async fn ensure_running(&self) -> Result<EnsureOutcome, InstanceError> {
        match self.control.current_state().await? {
            InstanceState::Running => {
                tracing::info!("Instance already running");
                Ok(EnsureOutcome::AlreadyRunning)
            }
            InstanceState::Stopping => {
                tracing::info!("Instance is stopping; waiting for full stop before restart");
                self.wait_until_stopped().await?;
                self.control.start().await?;
                self.wait_until_running().await?;
                Ok(EnsureOutcome::Started)
            }
            state => {
                tracing::info!(?state, "Starting instance");
                self.control.start().await?;
                self.wait_until_running().await?;
                Ok(EnsureOutcome::Started)
            }
        }
    }

    /// Wait out the post-boot grace period.
    ///
    /// Instance-boot readiness and command-channel readiness are
    /// different signals, and the backend emits no event for the
    /// latter.
    pub async fn boot_grace(&self, grace: Duration) {
        tracing::info!(
            grace_secs = grace.as_secs(),
            "Waiting boot grace before remote commands",
        );
        self.sleeper.sleep(grace).await;
    }

    async fn wait_for(&self, target: &InstanceState) -> Result<(), InstanceError> {
        let result = poll_until(self.poll, self.sleeper, |attempt| async move {
            match self.control.current_state().await {
                Ok(state) if state == *target => PollDecision::Ready(()),
                Ok(state) => {
                    tracing::debug!(?state, ?target, attempt, "Instance not yet in target state");
                    PollDecision::NotYet
                }
                Err(e) => PollDecision::Fatal(e),
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Fatal(e)) => Err(e),
            Err(PollError::DeadlineExceeded { attempts, .. }) => Err(InstanceError::StateDeadline {
                target: target.clone(),
                attempts,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// EC2 implementation
// ---------------------------------------------------------------------------

/// EC2-backed [`InstanceControl`].
pub struct Ec2InstanceControl {
    client: aws_sdk_ec2::Client,
    instance_id: String,
}

impl Ec2InstanceControl {
    pub fn new(sdk_config: &aws_config::SdkConfig, instance_id: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_ec2::Client::new(sdk_config),
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[async_trait]
impl InstanceControl for Ec2InstanceControl {
    async fn current_state(&self) -> Result<InstanceState, InstanceError> {
        let output = self
            .client
            .describe_instances()
            .instance_ids(&self.instance_id)
            .send()
            .await
            .map_err(|e| InstanceError::Request(e.to_string()))?;

        let state_name = output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .find(|instance| instance.instance_id() == Some(self.instance_id.as_str()))
            .and_then(|instance| instance.state())
            .and_then(|state| state.name())
            .ok_or_else(|| InstanceError::NotFound {
                instance_id: self.instance_id.clone(),
            })?;

        Ok(InstanceState::from_name(state_name.as_str()))
    }

    async fn start(&self) -> Result<(), InstanceError> {
        self.client
            .start_instances()
            .instance_ids(&self.instance_id)
            .send()
            .await
            .map_err(|e| InstanceError::Request(e.to_string()))?;

        tracing::info!(instance_id = %self.instance_id, "Start requested");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
