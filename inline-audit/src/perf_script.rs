//! Driving Linux `perf` against the fixture and parsing its samples.
//!
//! Samples are read from `perf script -F ip,sym,symoff,dso --no-demangle`,
//! one line per sample:
//!
//! ```text
//!     55d5a4e0f1b4 _ZN14inline_fixture4main17h5c7e3f0c7a8b2d1eE+0x34 (/tmp/inline-fixture)
//!     ffffffff81e0 [unknown] ([kernel.kallsyms])
//! ```

use std::path::Path;

use tokio::process::Command;

use crate::error::{AuditError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub ip: u64,
    /// Raw symbol name, `None` for `[unknown]`
    pub symbol: Option<String>,
    pub offset: u64,
    pub dso: String,
}

impl Sample {
    /// Whether the sample was taken inside `program`.
    pub fn in_object(&self, program: &Path) -> bool {
        Path::new(&self.dso).file_name() == program.file_name() && program.file_name().is_some()
    }
}

#[derive(Debug, Default)]
pub struct ParsedScript {
    pub samples: Vec<Sample>,
    /// Lines that were not samples
    pub skipped: usize,
}

pub fn parse(text: &str) -> ParsedScript {
    let mut parsed = ParsedScript::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(sample) => parsed.samples.push(sample),
            None => {
                tracing::debug!("Skipping perf script line: {}", line);
                parsed.skipped += 1;
            }
        }
    }
    parsed
}

fn parse_line(line: &str) -> Option<Sample> {
    let (ip, rest) = line.split_once(char::is_whitespace)?;
    let ip = u64::from_str_radix(ip, 16).ok()?;

    let (sym, dso) = rest.trim().rsplit_once(" (")?;
    let dso = dso.strip_suffix(')')?.to_string();

    let (symbol, offset) = match sym.rsplit_once("+0x") {
        Some((name, off)) => (name, u64::from_str_radix(off, 16).ok()?),
        None => (sym, 0),
    };
    let symbol = match symbol.trim() {
        "[unknown]" | "" => None,
        s => Some(s.to_string()),
    };

    Some(Sample {
        ip,
        symbol,
        offset,
        dso,
    })
}

/// Runs `program` under `perf record` `runs` times and returns all samples.
pub async fn record(program: &Path, frequency: u64, runs: usize) -> Result<ParsedScript> {
    let dir = tempfile::tempdir().map_err(|e| AuditError::Perf(e.to_string()))?;
    let mut all = ParsedScript::default();

    for run in 0..runs {
        let data = dir.path().join(format!("perf-{}.data", run));

        let output = Command::new("perf")
            .arg("record")
            .arg("-F")
            .arg(frequency.to_string())
            .arg("-o")
            .arg(&data)
            .arg("--")
            .arg(program)
            .output()
            .await
            .map_err(|err| AuditError::Spawn {
                program: "perf record".to_string(),
                err,
            })?;
        if !output.status.success() {
            return Err(AuditError::Perf(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let output = Command::new("perf")
            .arg("script")
            .arg("-i")
            .arg(&data)
            .args(["-F", "ip,sym,symoff,dso", "--no-demangle"])
            .output()
            .await
            .map_err(|err| AuditError::Spawn {
                program: "perf script".to_string(),
                err,
            })?;
        if !output.status.success() {
            return Err(AuditError::Perf(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let parsed = parse(&String::from_utf8_lossy(&output.stdout));
        tracing::info!(
            "perf run {}/{}: {} samples ({} lines skipped)",
            run + 1,
            runs,
            parsed.samples.len(),
            parsed.skipped
        );
        all.samples.extend(parsed.samples);
        all.skipped += parsed.skipped;
    }

    Ok(all)
}
