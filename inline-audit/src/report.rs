use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Result of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Pass,
    Fail,
    /// The binary was built in a way that makes the check meaningless,
    /// e.g. without debug info.
    ConfigError,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::ConfigError => "CONFIG",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    /// What was checked, e.g. "symbol table"
    pub name: &'static str,
    pub status: Status,
    pub details: Vec<String>,
}

impl CheckOutcome {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            status: Status::Pass,
            details: Vec::new(),
        }
    }

    pub fn note(&mut self, detail: impl Into<String>) {
        self.details.push(detail.into());
    }

    pub fn fail(&mut self, detail: impl Into<String>) {
        if self.status == Status::Pass {
            self.status = Status::Fail;
        }
        self.details.push(detail.into());
    }

    pub fn config_error(name: &'static str, detail: String) -> Self {
        Self {
            name,
            status: Status::ConfigError,
            details: vec![detail],
        }
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Pass
    }
}

#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub binary: PathBuf,
    pub checks: Vec<CheckOutcome>,
}

impl AuditReport {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            checks: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: CheckOutcome) {
        tracing::info!("{} {}", outcome.status, outcome.name);
        self.checks.push(outcome);
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }

    pub fn has_config_error(&self) -> bool {
        self.checks.iter().any(|c| c.status == Status::ConfigError)
    }

    /// Process exit code: 0 all passed, 2 build-configuration error, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else if self.has_config_error() {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.binary.display())?;
        for check in &self.checks {
            writeln!(f, "  [{}] {}", check.status, check.name)?;
            for detail in &check.details {
                writeln!(f, "         {}", detail)?;
            }
        }
        Ok(())
    }
}
