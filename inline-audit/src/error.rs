use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("Failed to parse object file {path}: {err}")]
    Parse { path: PathBuf, err: object::Error },

    #[error("{path} has no symbol table (stripped binary?)")]
    MissingSymbolTable { path: PathBuf },

    #[error("{path} has no DWARF debug info; build with `debug = true` or `-C debuginfo=2`")]
    MissingDebugInfo { path: PathBuf },

    #[error("Code for {symbol} at {address:#x} is outside any section")]
    SymbolBytes { symbol: String, address: u64 },

    #[error("DWARF lookup failed: {0}")]
    Dwarf(String),

    #[error("Disassembly is only supported for x86-64, found {0:?}")]
    UnsupportedArchitecture(object::Architecture),

    #[error("Failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        err: std::io::Error,
    },

    #[error("{program} did not exit within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("perf failed: {0}")]
    Perf(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;
