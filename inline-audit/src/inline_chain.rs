//! Inline chain reconstruction from DWARF.
//!
//! Every address inside the fixture's loops maps to a logical call chain
//! such as `main → inlined_spin → spin`, even though only `main` exists as a
//! physical frame. The chain tells which of the three call sites a loop (or a
//! sample) belongs to.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use addr2line::Loader;
use serde::Serialize;

use crate::binary::{normalize_name, FixtureBinary};
use crate::config::{FixtureLayout, Role};
use crate::disasm::{function_loops, LoopSpan};
use crate::error::{AuditError, Result};
use crate::report::CheckOutcome;

/// One of the three ways the entry reaches the leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CallSite {
    /// entry → leaf
    Direct,
    /// entry → forced-inline wrapper → leaf
    ViaInlineWrapper,
    /// non-inlined wrapper → leaf, in its own physical frame
    ViaOutlinedWrapper,
}

impl CallSite {
    pub const ALL: [CallSite; 3] = [
        CallSite::Direct,
        CallSite::ViaInlineWrapper,
        CallSite::ViaOutlinedWrapper,
    ];

    /// Physical function the loop for this call site must live in.
    pub fn physical_role(self) -> Role {
        match self {
            CallSite::Direct | CallSite::ViaInlineWrapper => Role::Entry,
            CallSite::ViaOutlinedWrapper => Role::OutlinedWrapper,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallSite::Direct => "entry -> leaf",
            CallSite::ViaInlineWrapper => "entry -> inline wrapper -> leaf",
            CallSite::ViaOutlinedWrapper => "outlined wrapper -> leaf",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChainFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl ChainFrame {
    pub fn location(&self) -> String {
        let file = self
            .file
            .as_deref()
            .and_then(|f| f.rsplit('/').next())
            .unwrap_or("-");
        format!("{}:{}", file, self.line.unwrap_or(0))
    }
}

/// Logical frames at one address, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct InlineChain {
    pub frames: Vec<ChainFrame>,
}

impl InlineChain {
    pub fn function_names(&self) -> Vec<&str> {
        self.frames.iter().map(|f| f.function.as_str()).collect()
    }

    fn leaf_index(&self, layout: &FixtureLayout) -> Option<usize> {
        self.frames
            .iter()
            .position(|f| layout.role_of(&f.function) == Some(Role::Leaf))
    }

    pub fn classify(&self, layout: &FixtureLayout) -> Option<CallSite> {
        classify(layout, &self.function_names())
    }

    /// Where the leaf was called from: the frame just outside it.
    pub fn call_site_frame(&self, layout: &FixtureLayout) -> Option<&ChainFrame> {
        let idx = self.leaf_index(layout)?;
        idx.checked_sub(1).map(|outer| &self.frames[outer])
    }

    /// Frames from the outermost down to the leaf, as a folded stack.
    pub fn folded(&self, layout: &FixtureLayout) -> String {
        let end = self
            .leaf_index(layout)
            .map(|i| i + 1)
            .unwrap_or(self.frames.len());
        self.frames[..end]
            .iter()
            .map(|f| f.function.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Classifies a chain of normalised function names, outermost first.
///
/// Frames inside the leaf (inlined std code such as the range iterator)
/// are ignored.
pub fn classify(layout: &FixtureLayout, names: &[&str]) -> Option<CallSite> {
    let leaf = names
        .iter()
        .position(|n| layout.role_of(n) == Some(Role::Leaf))?;
    let outer = names[..leaf]
        .iter()
        .map(|n| layout.role_of(n))
        .collect::<Option<Vec<_>>>()?;

    match outer.as_slice() {
        [Role::Entry] => Some(CallSite::Direct),
        [Role::Entry, Role::InlineWrapper] => Some(CallSite::ViaInlineWrapper),
        [Role::OutlinedWrapper] => Some(CallSite::ViaOutlinedWrapper),
        _ => None,
    }
}

pub struct InlineResolver {
    loader: Loader,
    cache: HashMap<u64, InlineChain>,
}

impl InlineResolver {
    pub fn new(path: &Path) -> Result<Self> {
        let loader = Loader::new(path).map_err(|e| AuditError::Dwarf(e.to_string()))?;
        Ok(Self {
            loader,
            cache: HashMap::new(),
        })
    }

    /// Inline chain at a file (link-time) address.
    pub fn chain_at(&mut self, address: u64) -> Result<InlineChain> {
        if let Some(chain) = self.cache.get(&address) {
            return Ok(chain.clone());
        }

        let mut frames = self
            .loader
            .find_frames(address)
            .map_err(|e| AuditError::Dwarf(e.to_string()))?;

        let mut chain = Vec::new();
        while let Some(frame) = frames
            .next()
            .map_err(|e| AuditError::Dwarf(e.to_string()))?
        {
            let function = frame
                .function
                .as_ref()
                .and_then(|f| f.demangle().ok())
                .map(|name| normalize_name(&name))
                .unwrap_or_else(|| "[unknown]".to_string());
            let (file, line) = frame
                .location
                .map(|loc| (loc.file.map(str::to_owned), loc.line))
                .unwrap_or((None, None));
            chain.push(ChainFrame {
                function,
                file,
                line,
            });
        }
        // addr2line yields innermost first
        chain.reverse();

        let chain = InlineChain { frames: chain };
        self.cache.insert(address, chain.clone());
        Ok(chain)
    }

    /// The call site most addresses of a loop resolve to, with that chain.
    pub fn classify_loop(
        &mut self,
        span: &LoopSpan,
        layout: &FixtureLayout,
    ) -> Result<Option<(CallSite, InlineChain)>> {
        let mut votes: HashMap<CallSite, (usize, InlineChain)> = HashMap::new();
        for address in span.header..span.end {
            let chain = self.chain_at(address)?;
            if let Some(site) = chain.classify(layout) {
                votes.entry(site).or_insert_with(|| (0, chain)).0 += 1;
            }
        }

        Ok(votes
            .into_iter()
            .max_by_key(|(site, (count, _))| (*count, *site))
            .map(|(site, (_, chain))| (site, chain)))
    }
}

/// A configuration error outcome named `name` when `binary` carries no DWARF.
pub fn require_debug_info(binary: &FixtureBinary, name: &'static str) -> Option<CheckOutcome> {
    if binary.has_debug_info() {
        return None;
    }
    let err = AuditError::MissingDebugInfo {
        path: binary.path().to_owned(),
    };
    Some(CheckOutcome::config_error(name, err.to_string()))
}

/// Each call site must be claimed by exactly one loop in the expected
/// physical function, at three distinct source locations.
pub fn check_inline_chains(
    binary: &FixtureBinary,
    resolver: &mut InlineResolver,
    layout: &FixtureLayout,
) -> Result<CheckOutcome> {
    if let Some(outcome) = require_debug_info(binary, "inline chains") {
        return Ok(outcome);
    }

    let mut outcome = CheckOutcome::new("inline chains");
    let mut claimed: HashMap<CallSite, Vec<(u64, Role, String)>> = HashMap::new();

    for role in [Role::Entry, Role::OutlinedWrapper] {
        let Some(loops) = function_loops(binary, layout, role)? else {
            outcome.fail(format!("{} not found", layout.qualified(role)));
            continue;
        };
        for span in &loops {
            match resolver.classify_loop(span, layout)? {
                Some((site, chain)) => {
                    let location = chain
                        .call_site_frame(layout)
                        .map(ChainFrame::location)
                        .unwrap_or_else(|| "-".to_string());
                    tracing::debug!(
                        "Loop {:#x} in {}: {} [{}] at {}",
                        span.header,
                        layout.qualified(role),
                        site,
                        chain.folded(layout),
                        location
                    );
                    claimed
                        .entry(site)
                        .or_default()
                        .push((span.header, role, location));
                }
                None => outcome.fail(format!(
                    "Loop {:#x} in {} has no inline chain through {}",
                    span.header,
                    layout.qualified(role),
                    layout.qualified(Role::Leaf)
                )),
            }
        }
    }

    let mut locations = Vec::new();
    for site in CallSite::ALL {
        match claimed.get(&site).map(Vec::as_slice) {
            Some([(header, role, location)]) => {
                if *role != site.physical_role() {
                    outcome.fail(format!(
                        "{} resolved in {} at {:#x}, expected {}",
                        site,
                        layout.qualified(*role),
                        header,
                        layout.qualified(site.physical_role())
                    ));
                } else {
                    outcome.note(format!("{}: loop {:#x} called at {}", site, header, location));
                }
                locations.push(location.clone());
            }
            Some(many) => outcome.fail(format!("{} claimed by {} loops", site, many.len())),
            None => outcome.fail(format!("No loop resolves to {}", site)),
        }
    }

    let mut distinct = locations.clone();
    distinct.sort();
    distinct.dedup();
    if distinct.len() != locations.len() {
        outcome.fail(format!(
            "Call sites share source locations: {}",
            locations.join(", ")
        ));
    }

    Ok(outcome)
}
