use std::path::Path;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::{AuditError, Result};
use crate::report::CheckOutcome;

#[derive(Debug)]
pub struct RunOutcome {
    pub status: ExitStatus,
    pub elapsed: Duration,
}

/// Runs `program` with no arguments, killing it if it outlives `timeout`.
pub async fn run_fixture(program: &Path, timeout: Duration) -> Result<RunOutcome> {
    let name = program.display().to_string();
    let mut child = Command::new(program)
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AuditError::Spawn {
            program: name.clone(),
            err,
        })?;

    let started = Instant::now();
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(|err| AuditError::Spawn {
                program: name.clone(),
                err,
            })?;
            let elapsed = started.elapsed();
            tracing::debug!("{} exited with {} after {:?}", name, status, elapsed);
            Ok(RunOutcome { status, elapsed })
        }
        Err(_) => {
            tracing::warn!("{} still running after {:?}, killing", name, timeout);
            if let Err(err) = child.kill().await {
                tracing::warn!("Failed to kill {}: {}", name, err);
            }
            Err(AuditError::Timeout {
                program: name,
                timeout,
            })
        }
    }
}

/// The fixture must run to completion with status 0 inside the timeout.
pub async fn check_run(program: &Path, timeout: Duration) -> Result<CheckOutcome> {
    let mut outcome = CheckOutcome::new("exit status");
    match run_fixture(program, timeout).await {
        Ok(run) if run.status.success() => {
            outcome.note(format!("exit status 0 after {:?}", run.elapsed))
        }
        Ok(run) => outcome.fail(format!("{} after {:?}", run.status, run.elapsed)),
        Err(e @ AuditError::Timeout { .. }) => outcome.fail(e.to_string()),
        Err(e) => return Err(e),
    }
    Ok(outcome)
}
