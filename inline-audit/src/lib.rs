//! Post-build audit for the inline-fixture binary.
//!
//! Verifies that the compiler honoured the fixture's inlining directives
//! (symbol table, loop layout, DWARF inline chains), that the fixture runs
//! to completion, and that a sampling profiler attributes its time evenly
//! across the three call sites.

pub mod attribution;
pub mod binary;
pub mod config;
pub mod disasm;
pub mod error;
pub mod inline_chain;
pub mod output;
pub mod perf_script;
pub mod pipeline;
pub mod report;
pub mod spawn;
pub mod symbols;

pub use config::{AuditConfig, FixtureLayout, Role};
pub use error::AuditError;
pub use pipeline::{Audit, Stage};
pub use report::{AuditReport, CheckOutcome, Status};
