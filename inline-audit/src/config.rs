//! Audit configuration.
//!
//! [`FixtureLayout`] names the four procedures of the fixture; [`AuditConfig`]
//! carries the run and sampling knobs. Both are filled in from command line
//! options by the binaries and default to the shipped `inline-fixture`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// The role a procedure plays in the fixture's call structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Entry,
    Leaf,
    InlineWrapper,
    OutlinedWrapper,
}

/// Names of the fixture procedures, without crate prefix or hash.
#[derive(Debug, Clone, Serialize)]
pub struct FixtureLayout {
    pub crate_name: String,
    pub entry: String,
    pub leaf: String,
    pub inline_wrapper: String,
    pub outlined_wrapper: String,
}

impl Default for FixtureLayout {
    fn default() -> Self {
        Self {
            crate_name: "inline_fixture".to_string(),
            entry: "main".to_string(),
            leaf: "spin".to_string(),
            inline_wrapper: "inlined_spin".to_string(),
            outlined_wrapper: "outlined_spin".to_string(),
        }
    }
}

impl FixtureLayout {
    pub fn short_name(&self, role: Role) -> &str {
        match role {
            Role::Entry => &self.entry,
            Role::Leaf => &self.leaf,
            Role::InlineWrapper => &self.inline_wrapper,
            Role::OutlinedWrapper => &self.outlined_wrapper,
        }
    }

    /// Fully qualified path, e.g. `inline_fixture::spin`.
    pub fn qualified(&self, role: Role) -> String {
        format!("{}::{}", self.crate_name, self.short_name(role))
    }

    /// Which fixture procedure a (normalised) function name refers to.
    ///
    /// Accepts the qualified path as well as the bare name, since DWARF
    /// without linkage names only carries the latter.
    pub fn role_of(&self, name: &str) -> Option<Role> {
        [
            Role::Entry,
            Role::Leaf,
            Role::InlineWrapper,
            Role::OutlinedWrapper,
        ]
        .into_iter()
        .find(|&role| name == self.qualified(role) || name == self.short_name(role))
    }
}

/// Knobs for the dynamic checks and their outputs.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub layout: FixtureLayout,
    /// Upper bound on a single fixture run
    pub timeout: Duration,
    /// perf sampling frequency in Hz
    pub frequency: u64,
    /// Number of fixture runs aggregated into one attribution
    pub runs: usize,
    /// Allowed deviation from an even split, as a fraction (0.10 = 10 points)
    pub tolerance: f64,
    /// Fewer classified samples than this fails the attribution check
    pub min_samples: u64,
    pub collapse: Option<PathBuf>,
    pub svg: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            layout: FixtureLayout::default(),
            timeout: Duration::from_secs(30),
            frequency: 4999,
            runs: 5,
            tolerance: 0.10,
            min_samples: 60,
            collapse: None,
            svg: None,
            json: None,
        }
    }
}
