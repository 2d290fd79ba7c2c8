//! Loop detection in machine code.
//!
//! A loop is recognised by its back edge: a near branch whose target lies
//! inside the same function at or before the branch itself. Back edges that
//! share a header count as one loop.

use std::collections::BTreeMap;

use iced_x86::{Decoder, DecoderOptions, FlowControl, OpKind};
use object::Architecture;
use serde::Serialize;

use crate::binary::FixtureBinary;
use crate::config::{FixtureLayout, Role};
use crate::error::{AuditError, Result};
use crate::report::CheckOutcome;

/// Address range of a loop: from the header up to the end of its last back edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopSpan {
    pub header: u64,
    pub end: u64,
}

impl LoopSpan {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.header && address < self.end
    }
}

/// Finds the loops in x86-64 code starting at `base`.
pub fn find_loops(bytes: &[u8], base: u64) -> Vec<LoopSpan> {
    let mut decoder = Decoder::with_ip(64, bytes, base, DecoderOptions::NONE);
    // header -> end of furthest back edge
    let mut loops = BTreeMap::<u64, u64>::new();

    while decoder.can_decode() {
        let inst = decoder.decode();
        if inst.is_invalid() {
            tracing::debug!("Invalid instruction at {:#x}", inst.ip());
            continue;
        }

        if !matches!(
            inst.flow_control(),
            FlowControl::ConditionalBranch | FlowControl::UnconditionalBranch
        ) {
            continue;
        }
        if !matches!(
            inst.op0_kind(),
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
        ) {
            continue;
        }

        let target = inst.near_branch_target();
        if target >= base && target <= inst.ip() {
            let end = loops.entry(target).or_insert(0);
            *end = (*end).max(inst.next_ip());
        }
    }

    loops
        .into_iter()
        .map(|(header, end)| LoopSpan { header, end })
        .collect()
}

/// A control transfer leaving the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transfer {
    Call(u64),
    /// Jump to another function, e.g. a sibling call
    TailJump(u64),
}

/// Direct calls and jumps out of x86-64 code of `bytes.len()` bytes at `base`.
pub fn outgoing_transfers(bytes: &[u8], base: u64) -> Vec<Transfer> {
    let end = base + bytes.len() as u64;
    let mut decoder = Decoder::with_ip(64, bytes, base, DecoderOptions::NONE);
    let mut transfers = Vec::new();

    while decoder.can_decode() {
        let inst = decoder.decode();
        if inst.is_invalid()
            || !matches!(
                inst.op0_kind(),
                OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
            )
        {
            continue;
        }
        let target = inst.near_branch_target();
        match inst.flow_control() {
            FlowControl::Call => transfers.push(Transfer::Call(target)),
            FlowControl::ConditionalBranch | FlowControl::UnconditionalBranch
                if target < base || target >= end =>
            {
                transfers.push(Transfer::TailJump(target))
            }
            _ => {}
        }
    }
    transfers
}

/// Loops of the named fixture function, or `None` when it has no symbol.
pub fn function_loops(
    binary: &FixtureBinary,
    layout: &FixtureLayout,
    role: Role,
) -> Result<Option<Vec<LoopSpan>>> {
    if binary.architecture() != Architecture::X86_64 {
        return Err(AuditError::UnsupportedArchitecture(binary.architecture()));
    }

    let name = layout.qualified(role);
    let Some(function) = binary.functions_named(&name).into_iter().next() else {
        return Ok(None);
    };
    let bytes = binary.function_bytes(function)?;
    let loops = find_loops(bytes, function.address);
    tracing::debug!("{}: {} loops {:x?}", name, loops.len(), loops);
    Ok(Some(loops))
}

/// The entry must hold two loops (the direct and the forced-inline call
/// sites) and the non-inlined wrapper one. The entry must reach the wrapper
/// through a real call, so the third loop runs under both physical frames.
/// An entry with three loops has absorbed the non-inlined wrapper.
pub fn check_loops(binary: &FixtureBinary, layout: &FixtureLayout) -> Result<CheckOutcome> {
    let mut outcome = CheckOutcome::new("loop layout");

    for (role, expected) in [(Role::Entry, 2), (Role::OutlinedWrapper, 1)] {
        let name = layout.qualified(role);
        match function_loops(binary, layout, role)? {
            None => outcome.fail(format!("{} not found, cannot disassemble", name)),
            Some(loops) if loops.len() == expected => outcome.note(format!(
                "{}: {} loop(s) at {}",
                name,
                loops.len(),
                headers(&loops)
            )),
            Some(loops) => outcome.fail(format!(
                "{}: expected {} loop(s), found {} at [{}]",
                name,
                expected,
                loops.len(),
                headers(&loops)
            )),
        }
    }

    let entry = binary.functions_named(&layout.qualified(Role::Entry));
    let wrapper = binary.functions_named(&layout.qualified(Role::OutlinedWrapper));
    if let ([entry], [wrapper]) = (entry.as_slice(), wrapper.as_slice()) {
        let transfers = outgoing_transfers(binary.function_bytes(entry)?, entry.address);
        if transfers.contains(&Transfer::TailJump(wrapper.address)) {
            outcome.fail(format!(
                "{} tail-jumps to {}: the entry frame is gone while it runs",
                entry.name, wrapper.name
            ));
        } else if !transfers.contains(&Transfer::Call(wrapper.address)) {
            outcome.fail(format!("{} never calls {}", entry.name, wrapper.name));
        } else {
            outcome.note(format!("{} calls {}", entry.name, wrapper.name));
        }
    }

    Ok(outcome)
}

fn headers(loops: &[LoopSpan]) -> String {
    loops
        .iter()
        .map(|l| format!("{:#x}", l.header))
        .collect::<Vec<_>>()
        .join(", ")
}
