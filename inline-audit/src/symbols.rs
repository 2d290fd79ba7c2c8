//! Symbol table check.
//!
//! The entry and the non-inlined wrapper must each appear exactly once as a
//! function symbol; the leaf and the forced-inline wrapper must not appear at
//! all. A surviving leaf or forced-inline wrapper means an always-inline
//! directive was ignored, a missing non-inlined wrapper means it was folded
//! into its caller.

use crate::binary::FixtureBinary;
use crate::config::{FixtureLayout, Role};
use crate::report::CheckOutcome;

pub fn check_symbols(binary: &FixtureBinary, layout: &FixtureLayout) -> CheckOutcome {
    let mut outcome = CheckOutcome::new("symbol table");

    for role in [Role::Entry, Role::OutlinedWrapper] {
        let name = layout.qualified(role);
        let found = binary.functions_named(&name);
        match found.as_slice() {
            [f] => outcome.note(format!(
                "{:?}: {} @ {:#x} ({} bytes, {})",
                role,
                name,
                f.address,
                f.size,
                if f.global { "global" } else { "local" }
            )),
            [] => outcome.fail(match role {
                Role::OutlinedWrapper => {
                    format!("{} is missing: the no-inline directive was not honoured", name)
                }
                _ => format!("{} is missing", name),
            }),
            many => outcome.fail(format!(
                "{} has {} symbols: {}",
                name,
                many.len(),
                addresses(many.iter().map(|f| f.address))
            )),
        }
    }

    for role in [Role::Leaf, Role::InlineWrapper] {
        let name = layout.qualified(role);
        let found = binary.functions_named(&name);
        if found.is_empty() {
            outcome.note(format!("{:?}: {} fully inlined", role, name));
        } else {
            outcome.fail(format!(
                "{} survives as a function at {}: the always-inline directive was not honoured",
                name,
                addresses(found.iter().map(|f| f.address))
            ));
        }
    }

    outcome
}

fn addresses(addrs: impl Iterator<Item = u64>) -> String {
    addrs
        .map(|a| format!("{:#x}", a))
        .collect::<Vec<_>>()
        .join(", ")
}
