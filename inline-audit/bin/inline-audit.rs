use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use inline_audit::output::{CollapseSink, JsonFileSink, MultiplexSink, OutputSink, SvgSink};
use inline_audit::{Audit, AuditConfig, FixtureLayout, Stage};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Opt {
    /// Fixture binary to audit
    binary: PathBuf,

    #[command(subcommand)]
    command: Cmd,

    /// Crate name the fixture symbols live under
    #[arg(long, default_value = "inline_fixture")]
    crate_name: String,

    #[arg(long, default_value = "main")]
    entry: String,

    #[arg(long, default_value = "spin")]
    leaf: String,

    #[arg(long, default_value = "inlined_spin")]
    inline_wrapper: String,

    #[arg(long, default_value = "outlined_spin")]
    outlined_wrapper: String,

    /// Time limit for one fixture run, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// perf sampling frequency
    #[arg(short, long, default_value_t = 4999)]
    frequency: u64,

    /// Number of profiled runs to aggregate
    #[arg(long, default_value_t = 5)]
    runs: usize,

    /// Allowed deviation from an even split (0.10 = 10 percentage points)
    #[arg(long, default_value_t = 0.10)]
    tolerance: f64,

    /// Minimum number of attributed samples
    #[arg(long, default_value_t = 60)]
    min_samples: u64,

    /// Also profile under perf when running `all`
    #[arg(long)]
    with_profile: bool,

    /// Filename to write attributed samples in stackcollapse format
    #[arg(short, long)]
    collapse: Option<PathBuf>,

    /// Filename to generate flamegraph svg
    #[arg(short, long)]
    svg: Option<PathBuf>,

    /// Filename to write the report as json
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Entry and outlined wrapper present, leaf and inline wrapper absent
    Symbols,
    /// Three loops in the entry, one in the outlined wrapper
    Loops,
    /// DWARF inline chains for each loop
    Chains,
    /// Run the fixture and check its exit status
    Run,
    /// Sample the fixture with perf and check attribution
    Profile,
    /// Static checks and run (and profile with --with-profile)
    All,
}

impl Opt {
    fn config(&self) -> AuditConfig {
        AuditConfig {
            layout: FixtureLayout {
                crate_name: self.crate_name.clone(),
                entry: self.entry.clone(),
                leaf: self.leaf.clone(),
                inline_wrapper: self.inline_wrapper.clone(),
                outlined_wrapper: self.outlined_wrapper.clone(),
            },
            timeout: Duration::from_secs(self.timeout_secs),
            frequency: self.frequency,
            runs: self.runs,
            tolerance: self.tolerance,
            min_samples: self.min_samples,
            collapse: self.collapse.clone(),
            svg: self.svg.clone(),
            json: self.json.clone(),
        }
    }

    fn stages(&self) -> Vec<Stage> {
        match self.command {
            Cmd::Symbols => vec![Stage::Symbols],
            Cmd::Loops => vec![Stage::Loops],
            Cmd::Chains => vec![Stage::Chains],
            Cmd::Run => vec![Stage::Run],
            Cmd::Profile => vec![Stage::Profile],
            Cmd::All => {
                let mut stages = Stage::GATE.to_vec();
                if self.with_profile {
                    stages.push(Stage::Profile);
                }
                stages
            }
        }
    }
}

fn sinks(config: &AuditConfig) -> MultiplexSink {
    let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();
    if let Some(path) = &config.collapse {
        sinks.push(Box::new(CollapseSink::new(path.clone())));
    }
    if let Some(path) = &config.svg {
        sinks.push(Box::new(SvgSink::new(
            path.clone(),
            "inline-fixture attribution".to_string(),
        )));
    }
    if let Some(path) = &config.json {
        sinks.push(Box::new(JsonFileSink::new(path.clone())));
    }
    MultiplexSink::new(sinks)
}

#[tokio::main]
async fn main() -> std::result::Result<(), anyhow::Error> {
    let opt = Opt::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting {:?}", opt);

    let config = opt.config();
    let mut sink = sinks(&config);

    let mut audit = Audit::open(&opt.binary, config)
        .with_context(|| format!("Unable to open {}", opt.binary.display()))?;
    audit
        .run_stages(&opt.stages())
        .await
        .context("Audit aborted")?;

    sink.finish(audit.report(), audit.stacks())?;

    let report = audit.into_report();
    print!("{}", report);

    std::process::exit(report.exit_code());
}
