//! Builds the fixture source with `rustc` for the integration tests.
//!
//! Each variant is compiled once per test binary into cargo's integration
//! test scratch directory. Tests skip when `rustc` cannot be run or the host
//! is not x86-64 Linux.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, OnceLock};

pub const FIXTURE_SOURCE: &str = include_str!("../../../inline-fixture/src/main.rs");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// The fixture as shipped
    Release,
    /// Leaf forced out of line, as if always-inline were ignored
    LeafNotInlined,
    /// Non-inlined wrapper forced inline, as if no-inline were ignored
    WrapperInlined,
    /// Optimised, but DWARF stripped
    NoDebugInfo,
}

impl Variant {
    fn name(self) -> &'static str {
        match self {
            Variant::Release => "inline-fixture",
            Variant::LeafNotInlined => "inline-fixture-leaf-not-inlined",
            Variant::WrapperInlined => "inline-fixture-wrapper-inlined",
            Variant::NoDebugInfo => "inline-fixture-no-debuginfo",
        }
    }

    fn source(self) -> String {
        match self {
            Variant::LeafNotInlined => swap(
                "#[inline(always)]\nfn spin(",
                "#[inline(never)]\nfn spin(",
            ),
            Variant::WrapperInlined => swap(
                "#[inline(never)]\nfn outlined_spin(",
                "#[inline(always)]\nfn outlined_spin(",
            ),
            Variant::Release | Variant::NoDebugInfo => FIXTURE_SOURCE.to_string(),
        }
    }

    fn debug_flags(self) -> &'static [&'static str] {
        match self {
            Variant::NoDebugInfo => &["-C", "debuginfo=0", "-C", "strip=debuginfo"],
            _ => &["-C", "debuginfo=2"],
        }
    }
}

fn swap(from: &str, to: &str) -> String {
    assert!(
        FIXTURE_SOURCE.contains(from),
        "fixture source no longer contains {:?}",
        from
    );
    FIXTURE_SOURCE.replace(from, to)
}

pub fn host_supported() -> bool {
    cfg!(all(target_os = "linux", target_arch = "x86_64"))
}

fn build(variant: Variant) -> Option<PathBuf> {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR"));
    let src = dir.join(format!("{}.rs", variant.name()));
    let out = dir.join(variant.name());
    std::fs::write(&src, variant.source()).unwrap();

    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let status = Command::new(rustc)
        .args(["--edition", "2021", "--crate-name", "inline_fixture"])
        .args(["-C", "opt-level=3"])
        .args(variant.debug_flags())
        .arg("-o")
        .arg(&out)
        .arg(&src)
        .status();

    match status {
        Ok(status) => {
            assert!(status.success(), "rustc failed for {:?}: {}", variant, status);
            Some(out)
        }
        Err(e) => {
            eprintln!("Skipping: unable to run rustc: {}", e);
            None
        }
    }
}

/// Path of the compiled variant, or `None` when the tests should skip.
pub fn fixture(variant: Variant) -> Option<PathBuf> {
    if !host_supported() {
        eprintln!("Skipping: fixture checks need x86-64 Linux");
        return None;
    }

    static BUILT: OnceLock<Mutex<HashMap<Variant, Option<PathBuf>>>> = OnceLock::new();
    let built = BUILT.get_or_init(|| Mutex::new(HashMap::new()));
    let mut built = built.lock().unwrap_or_else(|e| e.into_inner());
    built.entry(variant).or_insert_with(|| build(variant)).clone()
}
