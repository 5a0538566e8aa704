use std::future::Future;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(10);

/// Keeps a child process running, restarting it whenever it exits.
#[derive(Debug, Clone)]
pub struct Supervisor {
    command: String,
    args: Vec<String>,
    restart_delay: Duration,
    max_restarts: Option<u32>,
}

impl Supervisor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            restart_delay: DEFAULT_RESTART_DELAY,
            max_restarts: None,
        }
    }

    /// Wait applied after a failed exit or a failed spawn.
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn max_restarts(mut self, max: Option<u32>) -> Self {
        self.max_restarts = max;
        self
    }

    fn describe(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run until `shutdown` resolves or the restart budget is spent.
    /// Returns how many times the child was started.
    pub async fn run<F>(&self, shutdown: F) -> u32
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let name = self.describe();
        let mut runs: u32 = 0;

        loop {
            runs += 1;
            info!("Starting `{name}` (run {runs})");

            let outcome: std::io::Result<ExitStatus> = match Command::new(&self.command)
                .args(&self.args)
                .kill_on_drop(true)
                .spawn()
            {
                Ok(mut child) => tokio::select! {
                    _ = &mut shutdown => {
                        info!("Shutdown requested, stopping `{name}`");
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill child: {e}");
                        }
                        return runs;
                    }
                    status = child.wait() => status,
                },
                Err(e) => Err(e),
            };

            let delay = match outcome {
                Ok(status) if status.success() => {
                    info!("`{name}` exited cleanly");
                    Duration::ZERO
                }
                Ok(status) => {
                    warn!("`{name}` exited with {status}");
                    self.restart_delay
                }
                Err(e) => {
                    error!("Failed to run `{name}`: {e}");
                    self.restart_delay
                }
            };

            if let Some(max) = self.max_restarts {
                if runs > max {
                    info!("Restart limit of {max} reached");
                    return runs;
                }
            }

            if !delay.is_zero() {
                info!("Restarting in {delay:?}");
            }
            tokio::select! {
                _ = &mut shutdown => return runs,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
