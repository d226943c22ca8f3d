//! Reconcile-and-dispatch flow.
//!
//! One invocation runs a single sequential pass: reconcile the catalog
//! against the storage listing, gate on the concurrency guard, then
//! hand the match set to exactly one backend. Every outcome -- launch,
//! guard refusal, backend failure, empty match set -- is expressed as a
//! [`DispatchReport`]; nothing here panics or escapes as an error.

use std::time::Duration;

use tourbuild_cloud::command::{
    build_command_lines, CommandChannel, CommandError, CommandExecutor, CommandOutcome, SubmitMode,
};
use tourbuild_cloud::guard::{self, PendingTaskSource};
use tourbuild_cloud::instance::{EnsureOutcome, InstanceControl, InstanceLifecycle};
use tourbuild_cloud::poll::Sleeper;
use tourbuild_cloud::task::TaskLauncher;
use tourbuild_core::reconcile::{match_assets, StorageKeySet};
use tourbuild_core::report::{BackendKind, DispatchReport};
use tourbuild_core::types::AssetReference;

/// Diagnostics text is capped before it lands in a report message.
const MESSAGE_DIAGNOSTIC_LIMIT: usize = 512;

/// Dependencies for a persistent-instance dispatch.
pub struct InstanceDispatch<'a> {
    pub control: &'a dyn InstanceControl,
    pub channel: &'a dyn CommandChannel,
    pub sleeper: &'a dyn Sleeper,
    /// Post-boot grace before the first remote command.
    pub boot_grace: Duration,
    /// Build script path on the instance.
    pub build_script: String,
    pub mode: SubmitMode,
}

/// The backend one invocation dispatches to.
pub enum Backend<'a> {
    Ephemeral {
        source: &'a dyn PendingTaskSource,
        launcher: &'a dyn TaskLauncher,
        cluster: &'a str,
        family: &'a str,
    },
    Instance(InstanceDispatch<'a>),
}

impl Backend<'_> {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Ephemeral { .. } => BackendKind::EphemeralTask,
            Self::Instance(_) => BackendKind::PersistentInstance,
        }
    }
}

/// Reconcile `assets` against `storage_keys` and dispatch the matches.
pub async fn reconcile_and_dispatch(
    assets: &[AssetReference],
    storage_keys: &StorageKeySet,
    backend: Backend<'_>,
) -> DispatchReport {
    let matches = match_assets(assets, storage_keys);
    tracing::info!(
        matching = matches.len(),
        catalog_assets = assets.len(),
        storage_keys = storage_keys.len(),
        "Reconciled catalog against storage",
    );

    if matches.is_empty() {
        return DispatchReport::skipped(
            backend.kind(),
            0,
            "no catalog assets matched the storage listing",
        );
    }

    match backend {
        Backend::Ephemeral {
            source,
            launcher,
            cluster,
            family,
        } => dispatch_ephemeral(&matches, source, launcher, cluster, family).await,
        Backend::Instance(deps) => dispatch_instance(&matches, &deps).await,
    }
}

/// Dispatch the match set as one ephemeral task, guard first.
async fn dispatch_ephemeral(
    matches: &[AssetReference],
    source: &dyn PendingTaskSource,
    launcher: &dyn TaskLauncher,
    cluster: &str,
    family: &str,
) -> DispatchReport {
    let decision = guard::check_family_busy(source, cluster, family).await;
    if decision.busy {
        return DispatchReport::skipped(
            BackendKind::EphemeralTask,
            matches.len(),
            format!("build already pending: {}", decision.conflicting.join(", ")),
        );
    }

    let payload = match serde_json::to_string(matches) {
        Ok(payload) => payload,
        Err(e) => {
            return DispatchReport::skipped(
                BackendKind::EphemeralTask,
                matches.len(),
                format!("failed to serialize match payload: {e}"),
            )
        }
    };

    match launcher.launch(&payload, matches.len()).await {
        Ok(task_id) => DispatchReport::launched(BackendKind::EphemeralTask, matches.len(), task_id),
        Err(e) => DispatchReport::skipped(
            BackendKind::EphemeralTask,
            matches.len(),
            format!("task launch failed: {e}"),
        ),
    }
}

/// Dispatch the match set to the persistent instance.
///
/// The instance's own state doubles as the guard: an already-running
/// instance means a build is presumed in progress and nothing is
/// submitted.
async fn dispatch_instance(
    matches: &[AssetReference],
    deps: &InstanceDispatch<'_>,
) -> DispatchReport {
    let kind = BackendKind::PersistentInstance;
    let lifecycle = InstanceLifecycle::new(deps.control, deps.sleeper);

    match lifecycle.ensure_running().await {
        Ok(EnsureOutcome::AlreadyRunning) => {
            return DispatchReport::skipped(
                kind,
                matches.len(),
                "instance already running; a build is presumed already in progress",
            );
        }
        Ok(EnsureOutcome::Started) => {
            lifecycle.boot_grace(deps.boot_grace).await;
        }
        Err(e) => {
            return DispatchReport::skipped(
                kind,
                matches.len(),
                format!("instance did not become ready: {e}"),
            );
        }
    }

    let payload = match serde_json::to_string(matches) {
        Ok(payload) => payload,
        Err(e) => {
            return DispatchReport::skipped(
                kind,
                matches.len(),
                format!("failed to serialize match payload: {e}"),
            )
        }
    };

    let detach = deps.mode == SubmitMode::FireAndForget;
    let lines = build_command_lines(&payload, &deps.build_script, detach);
    let executor = CommandExecutor::new(deps.channel, deps.sleeper);

    match executor.run(&lines, deps.mode).await {
        Ok(CommandOutcome::Detached { command_id }) => {
            DispatchReport::launched(kind, matches.len(), command_id)
                .with_message("build launched detached; outcome lands in on-instance logs")
        }
        Ok(CommandOutcome::Succeeded(invocation)) => {
            tracing::info!(
                command_id = %invocation.command_id,
                stdout = %invocation.stdout,
                "Build command succeeded",
            );
            DispatchReport::launched(kind, matches.len(), invocation.command_id)
                .with_message("build command succeeded")
        }
        Ok(CommandOutcome::Failed(invocation)) => {
            tracing::error!(
                command_id = %invocation.command_id,
                status = ?invocation.status,
                stderr = %invocation.stderr,
                "Build command failed",
            );
            let diagnostics = clip(&invocation.stderr);
            DispatchReport::launched(kind, matches.len(), invocation.command_id).with_message(
                format!("build command ended {:?}: {diagnostics}", invocation.status),
            )
        }
        // The command was submitted; we stopped waiting on it. Distinct
        // from a backend-reported failure.
        Err(CommandError::PollDeadline {
            command_id,
            attempts,
        }) => DispatchReport::launched(kind, matches.len(), command_id)
            .with_message(format!("stopped waiting after {attempts} status checks")),
        Err(e) => DispatchReport::skipped(kind, matches.len(), format!("remote command failed: {e}")),
    }
}

fn clip(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MESSAGE_DIAGNOSTIC_LIMIT) {
        Some((index, _)) => &trimmed[..index],
        None => trimmed,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tourbuild_cloud::command::{CommandInvocation, CommandProbe, CommandStatus};
    use tourbuild_cloud::guard::{GuardError, PendingTask};
    use tourbuild_cloud::instance::InstanceError;
    use tourbuild_cloud::task::LaunchError;
    use tourbuild_core::types::InstanceState;

    struct InstantSleeper;

    #[async_trait]
    impl Sleeper for InstantSleeper {
        async fn sleep(&self, _duration: Duration) {}
    }

    struct StubPending {
        tasks: Result<Vec<PendingTask>, String>,
    }

    #[async_trait]
    impl PendingTaskSource for StubPending {
        async fn pending_tasks(&self, _cluster: &str) -> Result<Vec<PendingTask>, GuardError> {
            match &self.tasks {
                Ok(tasks) => Ok(tasks.clone()),
                Err(message) => Err(GuardError(message.clone())),
            }
        }
    }

    struct StubLauncher {
        launches: Mutex<Vec<(String, usize)>>,
    }

    impl StubLauncher {
        fn new() -> Self {
            Self {
                launches: Mutex::new(Vec::new()),
            }
        }

        fn launch_count(&self) -> usize {
            self.launches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TaskLauncher for StubLauncher {
        async fn launch(
            &self,
            matches_json: &str,
            match_count: usize,
        ) -> Result<String, LaunchError> {
            self.launches
                .lock()
                .unwrap()
                .push((matches_json.to_string(), match_count));
            Ok("arn:task/launched".to_string())
        }
    }

    struct StubControl {
        states: Mutex<Vec<InstanceState>>,
        cursor: AtomicU32,
        starts: AtomicU32,
    }

    impl StubControl {
        fn new(states: Vec<InstanceState>) -> Self {
            Self {
                states: Mutex::new(states),
                cursor: AtomicU32::new(0),
                starts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl InstanceControl for StubControl {
        async fn current_state(&self) -> Result<InstanceState, InstanceError> {
            let states = self.states.lock().unwrap();
            let index = self.cursor.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(states[index.min(states.len() - 1)].clone())
        }

        async fn start(&self) -> Result<(), InstanceError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubChannel {
        terminal: CommandStatus,
        submissions: Mutex<Vec<Vec<String>>>,
    }

    impl StubChannel {
        fn new(terminal: CommandStatus) -> Self {
            Self {
                terminal,
                submissions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandChannel for StubChannel {
        async fn submit(&self, lines: &[String]) -> Result<String, CommandError> {
            self.submissions.lock().unwrap().push(lines.to_vec());
            Ok("cmd-9".to_string())
        }

        async fn status(&self, command_id: &str) -> Result<CommandProbe, CommandError> {
            Ok(CommandProbe::Observed(CommandInvocation {
                command_id: command_id.to_string(),
                instance_id: "i-1".to_string(),
                status: self.terminal,
                stdout: "done".to_string(),
                stderr: "broken".to_string(),
            }))
        }
    }

    fn catalog_asset() -> AssetReference {
        AssetReference {
            tour_id: "tour-1".into(),
            scene_id: "scene-1".into(),
            name: "Lobby".into(),
            storage_key: "image/foo.jpg".into(),
            audio_key: None,
            thumbnail_key: None,
        }
    }

    fn listing(keys: &[&str]) -> StorageKeySet {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn matched_asset_launches_one_task() {
        let source = StubPending { tasks: Ok(vec![]) };
        let launcher = StubLauncher::new();

        let report = reconcile_and_dispatch(
            &[catalog_asset()],
            &listing(&["foo.jpg"]),
            Backend::Ephemeral {
                source: &source,
                launcher: &launcher,
                cluster: "builds",
                family: "tour-builder",
            },
        )
        .await;

        assert!(report.dispatched);
        assert_eq!(report.matching_asset_count, 1);
        assert_eq!(report.backend_job_id.as_deref(), Some("arn:task/launched"));
        assert_eq!(launcher.launch_count(), 1);

        let launches = launcher.launches.lock().unwrap();
        assert_eq!(launches[0].1, 1);
        assert!(launches[0].0.contains("image/foo.jpg"));
    }

    #[tokio::test]
    async fn pending_same_family_skips_and_names_conflict() {
        let source = StubPending {
            tasks: Ok(vec![PendingTask {
                arn: "arn:task/already".to_string(),
                family: "tour-builder".to_string(),
            }]),
        };
        let launcher = StubLauncher::new();

        let report = reconcile_and_dispatch(
            &[catalog_asset()],
            &listing(&["foo.jpg"]),
            Backend::Ephemeral {
                source: &source,
                launcher: &launcher,
                cluster: "builds",
                family: "tour-builder",
            },
        )
        .await;

        assert!(!report.dispatched);
        assert_eq!(report.matching_asset_count, 1);
        assert!(report.message.as_deref().unwrap().contains("arn:task/already"));
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn guard_failure_fails_open_and_dispatches() {
        let source = StubPending {
            tasks: Err("throttled".to_string()),
        };
        let launcher = StubLauncher::new();

        let report = reconcile_and_dispatch(
            &[catalog_asset()],
            &listing(&["foo.jpg"]),
            Backend::Ephemeral {
                source: &source,
                launcher: &launcher,
                cluster: "builds",
                family: "tour-builder",
            },
        )
        .await;

        assert!(report.dispatched);
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn no_matches_short_circuits_before_the_guard() {
        let source = StubPending {
            tasks: Err("must not be consulted".to_string()),
        };
        let launcher = StubLauncher::new();

        let report = reconcile_and_dispatch(
            &[catalog_asset()],
            &listing(&["unrelated.jpg"]),
            Backend::Ephemeral {
                source: &source,
                launcher: &launcher,
                cluster: "builds",
                family: "tour-builder",
            },
        )
        .await;

        assert!(!report.dispatched);
        assert_eq!(report.matching_asset_count, 0);
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn running_instance_is_presumed_busy() {
        let control = StubControl::new(vec![InstanceState::Running]);
        let channel = StubChannel::new(CommandStatus::Success);

        let report = reconcile_and_dispatch(
            &[catalog_asset()],
            &listing(&["foo.jpg"]),
            Backend::Instance(InstanceDispatch {
                control: &control,
                channel: &channel,
                sleeper: &InstantSleeper,
                boot_grace: Duration::from_secs(60),
                build_script: "/opt/tourbuild/build.sh".to_string(),
                mode: SubmitMode::WaitForCompletion,
            }),
        )
        .await;

        assert!(!report.dispatched);
        assert!(report
            .message
            .as_deref()
            .unwrap()
            .contains("presumed already in progress"));
        assert_eq!(control.starts.load(Ordering::SeqCst), 0);
        assert!(channel.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stopped_instance_is_started_and_build_submitted() {
        let control = StubControl::new(vec![
            InstanceState::Stopped,
            InstanceState::Pending,
            InstanceState::Running,
        ]);
        let channel = StubChannel::new(CommandStatus::Success);

        let report = reconcile_and_dispatch(
            &[catalog_asset()],
            &listing(&["foo.jpg"]),
            Backend::Instance(InstanceDispatch {
                control: &control,
                channel: &channel,
                sleeper: &InstantSleeper,
                boot_grace: Duration::from_secs(60),
                build_script: "/opt/tourbuild/build.sh".to_string(),
                mode: SubmitMode::WaitForCompletion,
            }),
        )
        .await;

        assert!(report.dispatched);
        assert_eq!(report.backend_job_id.as_deref(), Some("cmd-9"));
        assert_eq!(control.starts.load(Ordering::SeqCst), 1);

        let submissions = channel.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0][0].contains("--matches"));
    }

    #[tokio::test]
    async fn failed_build_command_carries_diagnostics() {
        let control = StubControl::new(vec![
            InstanceState::Stopped,
            InstanceState::Running,
        ]);
        let channel = StubChannel::new(CommandStatus::Failed);

        let report = reconcile_and_dispatch(
            &[catalog_asset()],
            &listing(&["foo.jpg"]),
            Backend::Instance(InstanceDispatch {
                control: &control,
                channel: &channel,
                sleeper: &InstantSleeper,
                boot_grace: Duration::from_secs(60),
                build_script: "/opt/tourbuild/build.sh".to_string(),
                mode: SubmitMode::WaitForCompletion,
            }),
        )
        .await;

        assert!(report.dispatched);
        assert_matches!(report.message, Some(message) if message.contains("broken"));
    }

    #[tokio::test]
    async fn fire_and_forget_reports_detached_launch() {
        let control = StubControl::new(vec![
            InstanceState::Stopped,
            InstanceState::Running,
        ]);
        let channel = StubChannel::new(CommandStatus::Success);

        let report = reconcile_and_dispatch(
            &[catalog_asset()],
            &listing(&["foo.jpg"]),
            Backend::Instance(InstanceDispatch {
                control: &control,
                channel: &channel,
                sleeper: &InstantSleeper,
                boot_grace: Duration::from_secs(60),
                build_script: "/opt/tourbuild/build.sh".to_string(),
                mode: SubmitMode::FireAndForget,
            }),
        )
        .await;

        assert!(report.dispatched);
        assert_eq!(report.backend_job_id.as_deref(), Some("cmd-9"));
        let submissions = channel.submissions.lock().unwrap();
        assert!(submissions[0].last().unwrap().starts_with("nohup"));
    }
}
