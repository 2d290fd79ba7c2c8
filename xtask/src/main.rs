//! `cargo xtask fixture`: builds inline-fixture and fails unless the
//! compiler honoured its inlining directives.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};
use clap::{Args, Parser};
use tracing_subscriber::EnvFilter;

use inline_audit::{Audit, AuditConfig, Stage};

#[derive(Debug, Parser)]
enum Opt {
    /// Build the fixture and audit the result
    Fixture(FixtureOptions),
}

#[derive(Debug, Args)]
struct FixtureOptions {
    /// Cargo profile to build with
    #[arg(long, default_value = "release")]
    profile: String,

    /// Skip running the built fixture
    #[arg(long)]
    no_run: bool,
}

fn workspace_root() -> PathBuf {
    // xtask lives one level below the workspace root.
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or(manifest_dir)
}

/// Directory cargo writes a profile's artifacts to.
fn profile_dir(profile: &str) -> &str {
    match profile {
        "dev" | "test" => "debug",
        "bench" => "release",
        other => other,
    }
}

fn build_fixture(root: &Path, profile: &str) -> anyhow::Result<PathBuf> {
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let status = Command::new(cargo)
        .current_dir(root)
        .args(["build", "-p", "inline-fixture", "--profile", profile])
        .status()
        .context("Failed to run cargo build")?;
    if !status.success() {
        bail!("cargo build failed: {}", status);
    }

    let target_dir = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| root.join("target"));
    Ok(target_dir.join(profile_dir(profile)).join("inline-fixture"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Opt::Fixture(opts) = Opt::parse();

    let binary = build_fixture(&workspace_root(), &opts.profile)?;
    tracing::info!("Auditing {}", binary.display());

    let stages: Vec<Stage> = Stage::GATE
        .into_iter()
        .filter(|&stage| !(opts.no_run && stage == Stage::Run))
        .collect();

    let mut audit = Audit::open(&binary, AuditConfig::default())?;
    audit.run_stages(&stages).await?;
    let report = audit.into_report();
    print!("{}", report);

    if !report.passed() {
        bail!(
            "{} does not honour the fixture's inlining directives",
            binary.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_dir() {
        assert_eq!(profile_dir("dev"), "debug");
        assert_eq!(profile_dir("release"), "release");
        assert_eq!(profile_dir("release-with-debug"), "release-with-debug");
    }
}
