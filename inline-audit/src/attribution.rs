//! Attributing sampled instruction pointers to the fixture's call sites.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::binary::FixtureBinary;
use crate::config::FixtureLayout;
use crate::error::Result;
use crate::inline_chain::{CallSite, InlineResolver};
use crate::perf_script::Sample;
use crate::report::CheckOutcome;

#[derive(Debug, Default, Serialize)]
pub struct Attribution {
    pub counts: BTreeMap<CallSite, u64>,
    /// Samples in the fixture that did not resolve to a call site
    pub unclassified: u64,
    /// Samples outside the fixture (kernel, libc, loader)
    pub other: u64,
    /// Folded stack -> count
    #[serde(skip)]
    pub folded: HashMap<String, u64>,
}

impl Attribution {
    /// Resolves every sample's inline chain through the fixture's DWARF.
    pub fn from_samples(
        samples: &[Sample],
        binary: &FixtureBinary,
        resolver: &mut InlineResolver,
        layout: &FixtureLayout,
    ) -> Result<Self> {
        let comm = binary
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("[unknown]")
            .to_string();
        let mut attribution = Attribution::default();

        for sample in samples {
            let address = match file_address(sample, binary) {
                Some(address) => address,
                None => {
                    attribution.other += 1;
                    continue;
                }
            };

            let chain = resolver.chain_at(address)?;
            match chain.classify(layout) {
                Some(site) => *attribution.counts.entry(site).or_default() += 1,
                None => attribution.unclassified += 1,
            }
            let folded = format!("{};{}", comm, chain.folded(layout));
            *attribution.folded.entry(folded).or_default() += 1;
        }

        if attribution.other > 0 {
            tracing::warn!(
                "{} sample(s) outside {} were not attributed",
                attribution.other,
                binary.path().display()
            );
        }

        Ok(attribution)
    }

    /// Builds an attribution from already classified counts.
    pub fn from_counts(counts: impl IntoIterator<Item = (CallSite, u64)>) -> Self {
        Self {
            counts: counts.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn classified(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Share of classified samples per call site, from 0.0 to 1.0.
    pub fn shares(&self) -> BTreeMap<CallSite, f64> {
        let total = self.classified();
        CallSite::ALL
            .into_iter()
            .map(|site| {
                let count = self.counts.get(&site).copied().unwrap_or(0);
                let share = if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64
                };
                (site, share)
            })
            .collect()
    }

    /// Folded stacks in collapsed format, sorted.
    pub fn folded_lines(&self) -> Vec<String> {
        let mut lines = self
            .folded
            .iter()
            .map(|(stack, count)| format!("{} {}", stack, count))
            .collect::<Vec<_>>();
        lines.sort();
        lines
    }
}

/// Link-time address of a sample inside the fixture, via its symbol offset.
fn file_address(sample: &Sample, binary: &FixtureBinary) -> Option<u64> {
    if !sample.in_object(binary.path()) {
        return None;
    }
    let symbol = sample.symbol.as_deref()?;
    let function = binary.function_by_any_name(symbol)?;
    Some(function.address + sample.offset)
}

/// Each call site must get a third of the samples, within `tolerance`.
pub fn check_attribution(
    attribution: &Attribution,
    tolerance: f64,
    min_samples: u64,
) -> CheckOutcome {
    let mut outcome = CheckOutcome::new("sample attribution");
    let total = attribution.classified();

    if total < min_samples {
        outcome.fail(format!(
            "Only {} classified sample(s), need at least {}; raise --frequency or --runs",
            total, min_samples
        ));
        return outcome;
    }

    let expected = 1.0 / CallSite::ALL.len() as f64;
    for (site, share) in attribution.shares() {
        let line = format!(
            "{}: {:.1}% ({} samples)",
            site,
            share * 100.0,
            attribution.counts.get(&site).copied().unwrap_or(0)
        );
        if (share - expected).abs() > tolerance {
            outcome.fail(format!(
                "{}, outside {:.1}% +/- {:.1} points",
                line,
                expected * 100.0,
                tolerance * 100.0
            ));
        } else {
            outcome.note(line);
        }
    }
    outcome.note(format!(
        "{} unclassified in fixture, {} outside fixture",
        attribution.unclassified, attribution.other
    ));

    outcome
}
