//! Integration tests: audit freshly compiled fixture binaries.
//!
//! The release build must pass every static check; variants compiled as if
//! the toolchain ignored one of the inlining directives must be caught.

mod common;

use std::time::Duration;

use common::{fixture, Variant};
use inline_audit::attribution::Attribution;
use inline_audit::binary::FixtureBinary;
use inline_audit::disasm::{check_loops, function_loops};
use inline_audit::inline_chain::{check_inline_chains, CallSite, InlineResolver};
use inline_audit::perf_script::Sample;
use inline_audit::spawn::check_run;
use inline_audit::symbols::check_symbols;
use inline_audit::{Audit, AuditConfig, FixtureLayout, Role, Stage, Status};

#[test]
fn test_release_symbol_table() {
    let Some(path) = fixture(Variant::Release) else { return };
    let binary = FixtureBinary::open(&path).unwrap();
    let outcome = check_symbols(&binary, &FixtureLayout::default());
    assert!(outcome.passed(), "{:#?}", outcome);
}

#[test]
fn test_release_loops() {
    let Some(path) = fixture(Variant::Release) else { return };
    let binary = FixtureBinary::open(&path).unwrap();
    let outcome = check_loops(&binary, &FixtureLayout::default()).unwrap();
    assert!(outcome.passed(), "{:#?}", outcome);
}

#[test]
fn test_release_inline_chains() {
    let Some(path) = fixture(Variant::Release) else { return };
    let binary = FixtureBinary::open(&path).unwrap();
    assert!(binary.has_debug_info());
    let mut resolver = InlineResolver::new(&path).unwrap();
    let outcome = check_inline_chains(&binary, &mut resolver, &FixtureLayout::default()).unwrap();
    assert!(outcome.passed(), "{:#?}", outcome);
}

#[tokio::test]
async fn test_release_runs_to_completion() {
    let Some(path) = fixture(Variant::Release) else { return };
    let outcome = check_run(&path, Duration::from_secs(60)).await.unwrap();
    assert!(outcome.passed(), "{:#?}", outcome);
}

#[tokio::test]
async fn test_pipeline_static_stages() {
    let Some(path) = fixture(Variant::Release) else { return };
    let mut audit = Audit::open(&path, AuditConfig::default()).unwrap();
    audit.run_stages(&Stage::STATIC).await.unwrap();
    let report = audit.into_report();
    assert_eq!(report.checks.len(), 3);
    assert!(report.passed(), "{}", report);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_release_passes_build_gate() {
    let Some(path) = fixture(Variant::Release) else { return };
    let mut audit = Audit::open(&path, AuditConfig::default()).unwrap();
    audit.run_stages(&Stage::GATE).await.unwrap();
    let report = audit.into_report();
    assert_eq!(report.checks.len(), Stage::GATE.len());
    assert!(report.passed(), "{}", report);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_mutated_builds_fail_build_gate() {
    for variant in [Variant::LeafNotInlined, Variant::WrapperInlined] {
        let Some(path) = fixture(variant) else { return };
        let mut audit = Audit::open(&path, AuditConfig::default()).unwrap();
        audit.run_stages(&Stage::GATE).await.unwrap();
        let report = audit.into_report();
        assert!(!report.passed(), "{:?} passed:\n{}", variant, report);
        assert_eq!(report.exit_code(), 1, "{}", report);
    }
}

#[test]
fn test_leaf_not_inlined_is_detected() {
    let Some(path) = fixture(Variant::LeafNotInlined) else { return };
    let binary = FixtureBinary::open(&path).unwrap();
    let layout = FixtureLayout::default();

    let outcome = check_symbols(&binary, &layout);
    assert_eq!(outcome.status, Status::Fail);
    assert!(
        outcome
            .details
            .iter()
            .any(|d| d.starts_with("inline_fixture::spin survives")),
        "{:#?}",
        outcome
    );

    // the leaf's loop now lives in the leaf, not in the entry
    assert!(!check_loops(&binary, &layout).unwrap().passed());
}

#[test]
fn test_wrapper_inlined_is_detected() {
    let Some(path) = fixture(Variant::WrapperInlined) else { return };
    let binary = FixtureBinary::open(&path).unwrap();
    let layout = FixtureLayout::default();

    let outcome = check_symbols(&binary, &layout);
    assert_eq!(outcome.status, Status::Fail);
    assert!(
        outcome
            .details
            .iter()
            .any(|d| d.starts_with("inline_fixture::outlined_spin is missing")),
        "{:#?}",
        outcome
    );
    assert!(binary
        .functions_named(&layout.qualified(Role::OutlinedWrapper))
        .is_empty());

    // the wrapper's loop has moved into the entry
    let loops = check_loops(&binary, &layout).unwrap();
    assert_eq!(loops.status, Status::Fail);
    assert!(
        loops
            .details
            .iter()
            .any(|d| d.starts_with("inline_fixture::main: expected 2 loop(s), found 3")),
        "{:#?}",
        loops
    );
}

#[tokio::test]
async fn test_stripped_debug_info_is_a_config_error() {
    let Some(path) = fixture(Variant::NoDebugInfo) else { return };
    let mut audit = Audit::open(&path, AuditConfig::default()).unwrap();
    assert!(!audit.binary().has_debug_info());

    audit.run_stages(&Stage::STATIC).await.unwrap();
    let report = audit.into_report();

    // the fixture itself is still correct
    assert!(report.checks[0].passed(), "{}", report);
    assert!(report.checks[1].passed(), "{}", report);
    assert_eq!(report.checks[2].status, Status::ConfigError);
    assert_eq!(report.exit_code(), 2);
}

#[test]
fn test_attribution_of_loop_headers() {
    let Some(path) = fixture(Variant::Release) else { return };
    let binary = FixtureBinary::open(&path).unwrap();
    let mut resolver = InlineResolver::new(&path).unwrap();
    let layout = FixtureLayout::default();

    // One synthetic sample per byte of every loop, as perf would
    // report them: symbol plus offset inside the fixture's DSO.
    let mut samples = Vec::new();
    for role in [Role::Entry, Role::OutlinedWrapper] {
        let function = binary.functions_named(&layout.qualified(role))[0].clone();
        for span in function_loops(&binary, &layout, role).unwrap().unwrap() {
            for address in span.header..span.end {
                samples.push(Sample {
                    ip: 0x5555_5555_0000 + address,
                    symbol: Some(function.raw_name.clone()),
                    offset: address - function.address,
                    dso: path.display().to_string(),
                });
            }
        }
    }
    samples.push(Sample {
        ip: 0xffff_ffff_8100_0000,
        symbol: None,
        offset: 0,
        dso: "[kernel.kallsyms]".to_string(),
    });

    let attribution = Attribution::from_samples(&samples, &binary, &mut resolver, &layout).unwrap();
    assert_eq!(attribution.other, 1);
    for site in CallSite::ALL {
        assert!(
            attribution.counts.get(&site).copied().unwrap_or(0) > 0,
            "no samples for {}: {:?}",
            site,
            attribution
        );
    }
    let via_wrapper = "inline_fixture::main;inline_fixture::inlined_spin;inline_fixture::spin ";
    assert!(attribution
        .folded_lines()
        .iter()
        .any(|l| l.contains(via_wrapper)));
}

#[tokio::test]
#[ignore = "needs perf and perf_event_paranoid <= 1"]
async fn test_perf_attribution() {
    let Some(path) = fixture(Variant::Release) else { return };
    let config = AuditConfig {
        runs: 10,
        ..AuditConfig::default()
    };
    let mut audit = Audit::open(&path, config).unwrap();
    audit.run_stage(Stage::Profile).await.unwrap();
    assert!(!audit.stacks().is_empty());
    let report = audit.into_report();
    assert!(report.passed(), "{}", report);
}
