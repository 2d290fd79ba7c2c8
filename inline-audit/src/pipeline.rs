//! Audit pipeline coordination.
//!
//! Static checks need only the binary on disk; the run and profile checks
//! execute it. Each stage appends its [`CheckOutcome`] to the report so a
//! single invocation can cover any subset of the properties.

use std::path::{Path, PathBuf};

use crate::attribution::{check_attribution, Attribution};
use crate::binary::FixtureBinary;
use crate::config::AuditConfig;
use crate::disasm::check_loops;
use crate::error::Result;
use crate::inline_chain::{check_inline_chains, require_debug_info, InlineResolver};
use crate::perf_script;
use crate::report::{AuditReport, CheckOutcome};
use crate::spawn::check_run;
use crate::symbols::check_symbols;

/// Which checks to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Symbols,
    Loops,
    Chains,
    Run,
    Profile,
}

impl Stage {
    pub const STATIC: [Stage; 3] = [Stage::Symbols, Stage::Loops, Stage::Chains];
    /// What `cargo xtask fixture` requires of a fresh build.
    pub const GATE: [Stage; 4] = [Stage::Symbols, Stage::Loops, Stage::Chains, Stage::Run];
}

pub struct Audit {
    config: AuditConfig,
    binary: FixtureBinary,
    resolver: Option<InlineResolver>,
    report: AuditReport,
    stacks: Vec<String>,
}

impl Audit {
    pub fn open(path: &Path, config: AuditConfig) -> Result<Self> {
        let binary = FixtureBinary::open(path)?;
        Ok(Self {
            config,
            binary,
            resolver: None,
            report: AuditReport::new(PathBuf::from(path)),
            stacks: Vec::new(),
        })
    }

    pub fn binary(&self) -> &FixtureBinary {
        &self.binary
    }

    pub async fn run_stage(&mut self, stage: Stage) -> Result<()> {
        let outcome = match stage {
            Stage::Symbols => check_symbols(&self.binary, &self.config.layout),
            Stage::Loops => check_loops(&self.binary, &self.config.layout)?,
            Stage::Chains => self.chains()?,
            Stage::Run => check_run(self.binary.path(), self.config.timeout).await?,
            Stage::Profile => self.profile().await?,
        };
        self.report.push(outcome);
        Ok(())
    }

    pub async fn run_stages(&mut self, stages: &[Stage]) -> Result<()> {
        for &stage in stages {
            self.run_stage(stage).await?;
        }
        Ok(())
    }

    fn chains(&mut self) -> Result<CheckOutcome> {
        if let Some(outcome) = require_debug_info(&self.binary, "inline chains") {
            return Ok(outcome);
        }
        let resolver = resolver(&mut self.resolver, &self.binary)?;
        check_inline_chains(&self.binary, resolver, &self.config.layout)
    }

    async fn profile(&mut self) -> Result<CheckOutcome> {
        if let Some(outcome) = require_debug_info(&self.binary, "sample attribution") {
            return Ok(outcome);
        }

        let parsed = perf_script::record(
            self.binary.path(),
            self.config.frequency,
            self.config.runs,
        )
        .await?;

        let resolver = resolver(&mut self.resolver, &self.binary)?;
        let attribution =
            Attribution::from_samples(&parsed.samples, &self.binary, resolver, &self.config.layout)?;
        self.stacks = attribution.folded_lines();

        Ok(check_attribution(
            &attribution,
            self.config.tolerance,
            self.config.min_samples,
        ))
    }

    pub fn report(&self) -> &AuditReport {
        &self.report
    }

    /// Collapse-format stacks from the last profile stage.
    pub fn stacks(&self) -> &[String] {
        &self.stacks
    }

    pub fn into_report(self) -> AuditReport {
        self.report
    }
}

/// The DWARF resolver is built once, on the first stage that needs it.
fn resolver<'a>(
    slot: &'a mut Option<InlineResolver>,
    binary: &FixtureBinary,
) -> Result<&'a mut InlineResolver> {
    let resolver = match slot.take() {
        Some(resolver) => resolver,
        None => InlineResolver::new(binary.path())?,
    };
    Ok(slot.insert(resolver))
}
