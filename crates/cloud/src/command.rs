//! Remote command submission and completion polling.
//!
//! Commands run on the persistent build instance through the managed
//! command channel (SSM `AWS-RunShellScript`). Submission always wraps
//! the given lines as one shell-script invocation with an overall
//! execution ceiling; completion is either polled to a terminal state
//! or deliberately not observed (fire-and-forget), in which case the
//! detached build writes its own logs on the instance.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ssm::error::SdkError;
use aws_sdk_ssm::operation::get_command_invocation::GetCommandInvocationError;

use crate::poll::{poll_until, PollConfig, PollDecision, PollError, Sleeper};

/// Interval between command status probes.
pub const COMMAND_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Attempt ceiling for a synchronous wait (a 30-minute window at 5 s).
pub const COMMAND_POLL_ATTEMPTS: u32 = 360;

/// Overall remote execution ceiling handed to the command channel.
pub const EXECUTION_TIMEOUT_SECS: u32 = 3600;

/// MatchSet payloads larger than this are staged to a file on the
/// instance instead of riding inline, staying clear of shell argument
/// limits.
pub const INLINE_PAYLOAD_LIMIT: usize = 64 * 1024;

/// Fixed path the staged payload is written to on the instance.
pub const PAYLOAD_PATH: &str = "/opt/tourbuild/matches.json";

/// Owner applied to the staged payload file.
const PAYLOAD_OWNER: &str = "ubuntu:ubuntu";

/// Log file the detached build writes to in fire-and-forget mode.
const DETACHED_LOG_PATH: &str = "/var/log/tourbuild-build.log";

/// Classification of a command's channel-reported status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Queued, delayed, running, or cancelling -- anything non-terminal.
    InProgress,
    Success,
    Failed,
    Cancelled,
    /// The channel's own execution ceiling fired. Distinct from this
    /// system giving up on polling.
    TimedOut,
}

impl CommandStatus {
    /// Map a channel status name. Unknown names are treated as still in
    /// progress so the poll keeps watching until its own ceiling.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Success" => Self::Success,
            "Failed" => Self::Failed,
            "Cancelled" => Self::Cancelled,
            "TimedOut" => Self::TimedOut,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// One remote command submission and its last observed status.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub command_id: String,
    pub instance_id: String,
    pub status: CommandStatus,
    /// Captured standard output (terminal states only).
    pub stdout: String,
    /// Captured standard error (terminal states only).
    pub stderr: String,
}

/// Lookup outcome while polling a submitted command.
#[derive(Debug)]
pub enum CommandProbe {
    /// The channel does not know the invocation yet. Expected for a
    /// short window right after submission, so treated as transient.
    NotYetVisible,
    Observed(CommandInvocation),
}

/// Errors from the command channel layer.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command submission failed: {0}")]
    Submit(String),

    /// A status lookup failed for a reason other than the invocation
    /// not being visible yet. Fatal immediately.
    #[error("Command lookup failed: {0}")]
    Lookup(String),

    /// The command never reached a terminal state within the polling
    /// ceiling. Distinct from a channel-reported timeout.
    #[error("Command {command_id} still running after {attempts} status checks")]
    PollDeadline { command_id: String, attempts: u32 },
}

/// Submission and status access to the remote command channel.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Submit shell lines as one script invocation; returns the command
    /// id handle used for status lookups.
    async fn submit(&self, lines: &[String]) -> Result<String, CommandError>;

    /// Look up the current status of a submitted command.
    async fn status(&self, command_id: &str) -> Result<CommandProbe, CommandError>;
}

/// How a submitted command's completion is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Poll the channel until the command reaches a terminal state.
    WaitForCompletion,
    /// Submission success completes the dispatch attempt; the command
    /// launches the real work detached and its outcome lands in
    /// on-instance logs.
    FireAndForget,
}

/// Result of a completed (or deliberately abandoned) command run.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Terminal Success, with captured streams.
    Succeeded(CommandInvocation),
    /// Terminal Failed/Cancelled/TimedOut, with captured streams for
    /// diagnostics. Surfaced, not retried.
    Failed(CommandInvocation),
    /// Fire-and-forget submission accepted; completion not observed.
    Detached { command_id: String },
}

/// Submits commands and drives their completion polling.
pub struct CommandExecutor<'a> {
    channel: &'a dyn CommandChannel,
    sleeper: &'a dyn Sleeper,
    poll: PollConfig,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(channel: &'a dyn CommandChannel, sleeper: &'a dyn Sleeper) -> Self {
        Self::with_poll_config(
            channel,
            sleeper,
            PollConfig::new(COMMAND_POLL_INTERVAL, COMMAND_POLL_ATTEMPTS),
        )
    }

    pub fn with_poll_config(
        channel: &'a dyn CommandChannel,
        sleeper: &'a dyn Sleeper,
        poll: PollConfig,
    ) -> Self {
        Self {
            channel,
            sleeper,
            poll,
        }
    }

    /// Submit `lines` and, in [`SubmitMode::WaitForCompletion`], poll
    /// to a terminal state.
    pub async fn run(
        &self,
        lines: &[String],
        mode: SubmitMode,
    ) -> Result<CommandOutcome, CommandError> {
        let command_id = self.channel.submit(lines).await?;
        tracing::info!(command_id = %command_id, ?mode, "Remote command submitted");

        match mode {
            SubmitMode::FireAndForget => Ok(CommandOutcome::Detached { command_id }),
            SubmitMode::WaitForCompletion => self.wait(&command_id).await,
        }
    }

    /// Poll a submitted command to a terminal state.
    ///
    /// Not-yet-visible lookups are transient for the full ceiling; any
    /// other lookup error is fatal immediately.
    pub async fn wait(&self, command_id: &str) -> Result<CommandOutcome, CommandError> {
        let result = poll_until(self.poll, self.sleeper, |attempt| async move {
            match self.channel.status(command_id).await {
                Ok(CommandProbe::NotYetVisible) => {
                    tracing::debug!(command_id, attempt, "Invocation not yet visible");
                    PollDecision::NotYet
                }
                Ok(CommandProbe::Observed(invocation)) => match invocation.status {
                    CommandStatus::InProgress => PollDecision::NotYet,
                    CommandStatus::Success => {
                        PollDecision::Ready(CommandOutcome::Succeeded(invocation))
                    }
                    CommandStatus::Failed | CommandStatus::Cancelled | CommandStatus::TimedOut => {
                        PollDecision::Ready(CommandOutcome::Failed(invocation))
                    }
                },
                Err(e) => PollDecision::Fatal(e),
            }
        })
        .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(PollError::Fatal(e)) => Err(e),
            Err(PollError::DeadlineExceeded { attempts, .. }) => Err(CommandError::PollDeadline {
                command_id: command_id.to_string(),
                attempts,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Command construction
// ---------------------------------------------------------------------------

/// Build the shell lines that deliver the matched-asset payload and
/// invoke the build script.
///
/// Small payloads ride inline as one quoted argument. Larger ones are
/// staged to [`PAYLOAD_PATH`] first (write, chown, chmod), and the
/// script is pointed at the file instead. With `detach`, the invocation
/// is wrapped in `nohup … &` so the remote shell returns immediately.
pub fn build_command_lines(payload_json: &str, script: &str, detach: bool) -> Vec<String> {
    let mut lines = Vec::new();

    let invocation = if payload_json.len() > INLINE_PAYLOAD_LIMIT {
        lines.push(format!("mkdir -p {}", parent_dir(PAYLOAD_PATH)));
        lines.push(format!(
            "cat > {PAYLOAD_PATH} <<'TOURBUILD_PAYLOAD'\n{payload_json}\nTOURBUILD_PAYLOAD"
        ));
        lines.push(format!("chown {PAYLOAD_OWNER} {PAYLOAD_PATH}"));
        lines.push(format!("chmod 0644 {PAYLOAD_PATH}"));
        format!("{script} --matches-file {PAYLOAD_PATH}")
    } else {
        format!("{script} --matches '{}'", escape_single_quoted(payload_json))
    };

    if detach {
        lines.push(format!(
            "nohup {invocation} > {DETACHED_LOG_PATH} 2>&1 &"
        ));
    } else {
        lines.push(invocation);
    }

    lines
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("/")
}

/// Escape a string for inclusion inside a single-quoted `sh` argument.
fn escape_single_quoted(s: &str) -> String {
    s.replace('\'', r"'\''")
}

// ---------------------------------------------------------------------------
// SSM implementation
// ---------------------------------------------------------------------------

/// SSM-backed [`CommandChannel`] targeting one instance.
pub struct SsmCommandChannel {
    client: aws_sdk_ssm::Client,
    instance_id: String,
}

impl SsmCommandChannel {
    pub fn new(sdk_config: &aws_config::SdkConfig, instance_id: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_ssm::Client::new(sdk_config),
            instance_id: instance_id.into(),
        }
    }
}

#[async_trait]
impl CommandChannel for SsmCommandChannel {
    async fn submit(&self, lines: &[String]) -> Result<String, CommandError> {
        let output = self
            .client
            .send_command()
            .instance_ids(&self.instance_id)
            .document_name("AWS-RunShellScript")
            .parameters("commands", lines.to_vec())
            .parameters(
                "executionTimeout",
                vec![EXECUTION_TIMEOUT_SECS.to_string()],
            )
            .comment("tourbuild asset build")
            .send()
            .await
            .map_err(|e| CommandError::Submit(e.to_string()))?;

        let command_id = output
            .command()
            .and_then(|command| command.command_id())
            .ok_or_else(|| CommandError::Submit("channel returned no command id".to_string()))?;

        Ok(command_id.to_string())
    }

    async fn status(&self, command_id: &str) -> Result<CommandProbe, CommandError> {
        match self
            .client
            .get_command_invocation()
            .command_id(command_id)
            .instance_id(&self.instance_id)
            .send()
            .await
        {
            Ok(output) => {
                let status = CommandStatus::from_name(
                    output.status().map(|s| s.as_str()).unwrap_or_default(),
                );
                Ok(CommandProbe::Observed(CommandInvocation {
                    command_id: command_id.to_string(),
                    instance_id: self.instance_id.clone(),
                    status,
                    stdout: output.standard_output_content().unwrap_or_default().to_string(),
                    stderr: output.standard_error_content().unwrap_or_default().to_string(),
                }))
            }
            Err(err) if is_invocation_not_visible(&err) => Ok(CommandProbe::NotYetVisible),
            Err(err) => Err(CommandError::Lookup(err.to_string())),
        }
    }
}

/// Whether a lookup error is the expected just-after-submission window
/// where the invocation is not queryable yet.
fn is_invocation_not_visible(err: &SdkError<GetCommandInvocationError>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => matches!(
            service_err.err(),
            GetCommandInvocationError::InvocationDoesNotExist(_)
        ),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
