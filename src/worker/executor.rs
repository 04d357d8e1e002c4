use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::scheduler::Job;

/// Result of one unit of work: the produced payload, or the failure detail.
pub type Outcome = std::result::Result<Option<String>, String>;

/// The engine that actually performs a job (encoder, inspector, analyzer).
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Work description submitted by the coordinator.
    type Payload: DeserializeOwned + Send + 'static;

    async fn execute(&self, job: &Job, payload: Self::Payload) -> Outcome;
}

/// Payload for [`CommandExecutor`]: arguments appended to the configured program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub args: Vec<String>,
}

impl CommandPayload {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Runs an external program (e.g. `ffmpeg`) per job.
///
/// Standard output becomes the job result. A non-zero exit fails the job with
/// standard error, or the exit code when standard error is empty.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the configured program with `args` appended.
    pub async fn run(&self, job_id: Uuid, args: &[String]) -> Outcome {
        tracing::info!(
            job_id = %job_id,
            program = %self.config.program,
            args = ?args,
            "Executing job"
        );

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.config.working_dir {
            command.current_dir(dir);
        }

        Self::process_output(job_id, command.output().await)
    }

    fn process_output(
        job_id: Uuid,
        result: std::result::Result<std::process::Output, std::io::Error>,
    ) -> Outcome {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                tracing::info!(
                    job_id = %job_id,
                    success = output.status.success(),
                    exit_code = ?exit_code,
                    "Program exited"
                );

                if output.status.success() {
                    Ok(if stdout.is_empty() { None } else { Some(stdout) })
                } else if stderr.is_empty() {
                    Err(format!("Exit code: {:?}", exit_code))
                } else {
                    Err(stderr)
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to launch program");
                Err(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    type Payload = CommandPayload;

    async fn execute(&self, job: &Job, payload: CommandPayload) -> Outcome {
        self.run(job.id, &payload.args).await
    }
}
