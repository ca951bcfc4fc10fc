use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Runs the two PBS inspection commands and hands back their raw report
/// text. Every failure mode maps to a `FetchError`; the caller treats any
/// of them as "no data this cycle".
#[derive(Debug, Clone)]
pub struct PbsClient {
    qstat_command: Vec<String>,
    pbsnodes_command: Vec<String>,
    timeout: Duration,
}

impl PbsClient {
    pub fn new(
        qstat_command: Vec<String>,
        pbsnodes_command: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            qstat_command,
            pbsnodes_command,
            timeout,
        }
    }

    /// Fetches the job-listing report (`qstat -t` by default).
    pub async fn fetch_job_report(&self) -> Result<String, FetchError> {
        self.run(&self.qstat_command).await
    }

    /// Fetches the node-listing report (`pbsnodes -aSj` by default).
    pub async fn fetch_node_report(&self) -> Result<String, FetchError> {
        self.run(&self.pbsnodes_command).await
    }

    async fn run(&self, argv: &[String]) -> Result<String, FetchError> {
        let command = argv.join(" ");
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).kill_on_drop(true);

        let output = match time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                warn!(command = %command, error = %source, "report command failed to spawn");
                return Err(FetchError::Spawn { command, source });
            }
            Err(_elapsed) => {
                warn!(command = %command, timeout = ?self.timeout, "report command timed out");
                return Err(FetchError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            let stderr = stderr_excerpt(&output);
            warn!(command = %command, status = %output.status, stderr = %stderr, "report command exited non-zero");
            return Err(FetchError::NonZeroExit {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn stderr_excerpt(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    text.trim().chars().take(200).collect()
}
