//! ELF loading and the function symbol table.

use std::borrow::Cow;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use object::{Architecture, Object, ObjectSection, ObjectSymbol, SymbolKind};
use serde::Serialize;

use crate::error::{AuditError, Result};

/// A function symbol from `.symtab`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSymbol {
    pub raw_name: String,
    /// Demangled, without the trailing `::h<hash>`
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub global: bool,
}

impl FunctionSymbol {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.address + self.size
    }
}

/// A fixture executable opened for inspection.
pub struct FixtureBinary {
    path: PathBuf,
    data: Mmap,
    architecture: Architecture,
    has_debug_info: bool,
    functions: Vec<FunctionSymbol>,
}

impl FixtureBinary {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| AuditError::Read {
            path: path.to_owned(),
            err,
        })?;
        // SAFETY: the binary is not expected to change while it is audited.
        let data = unsafe { Mmap::map(&file) }.map_err(|err| AuditError::Read {
            path: path.to_owned(),
            err,
        })?;

        let obj = object::File::parse(&*data).map_err(|err| AuditError::Parse {
            path: path.to_owned(),
            err,
        })?;

        if obj.symbol_table().is_none() {
            return Err(AuditError::MissingSymbolTable {
                path: path.to_owned(),
            });
        }

        let mut functions = obj
            .symbols()
            .filter(|s| s.kind() == SymbolKind::Text && s.is_definition() && s.size() > 0)
            .filter_map(|s| {
                let raw_name = s.name().ok()?.to_owned();
                Some(FunctionSymbol {
                    name: normalize_name(&raw_name),
                    raw_name,
                    address: s.address(),
                    size: s.size(),
                    global: s.is_global(),
                })
            })
            .collect::<Vec<_>>();
        functions.sort_by_key(|f| f.address);

        let has_debug_info = obj
            .section_by_name(".debug_info")
            .map(|s| s.size() > 0)
            .unwrap_or(false);
        let architecture = obj.architecture();

        tracing::debug!(
            "Loaded {}: {:?}, {} function symbols, debug info: {}",
            path.display(),
            architecture,
            functions.len(),
            has_debug_info
        );

        Ok(Self {
            path: path.to_owned(),
            data,
            architecture,
            has_debug_info,
            functions,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn has_debug_info(&self) -> bool {
        self.has_debug_info
    }

    pub fn functions(&self) -> &[FunctionSymbol] {
        &self.functions
    }

    /// All function symbols whose normalised name is `qualified`.
    pub fn functions_named(&self, qualified: &str) -> Vec<&FunctionSymbol> {
        self.functions
            .iter()
            .filter(|f| f.name == qualified)
            .collect()
    }

    /// Looks a symbol up by raw or normalised name; perf may report either.
    pub fn function_by_any_name(&self, name: &str) -> Option<&FunctionSymbol> {
        let normalized = normalize_name(name);
        self.functions
            .iter()
            .find(|f| f.raw_name == name || f.name == normalized)
    }

    pub fn function_containing(&self, address: u64) -> Option<&FunctionSymbol> {
        let idx = self.functions.partition_point(|f| f.address <= address);
        self.functions[..idx]
            .iter()
            .rev()
            .find(|f| f.contains(address))
    }

    /// Machine code of a function symbol.
    pub fn function_bytes(&self, function: &FunctionSymbol) -> Result<&[u8]> {
        let obj = object::File::parse(&*self.data).map_err(|err| AuditError::Parse {
            path: self.path.clone(),
            err,
        })?;

        for section in obj.sections() {
            if let Ok(Some(bytes)) = section.data_range(function.address, function.size) {
                return Ok(bytes);
            }
        }

        Err(AuditError::SymbolBytes {
            symbol: function.name.clone(),
            address: function.address,
        })
    }
}

/// Demangles a symbol name and drops the legacy `::h<16 hex>` hash suffix.
pub fn normalize_name(raw: &str) -> String {
    let demangled = addr2line::demangle_auto(Cow::from(raw), None);
    strip_hash(&demangled).to_string()
}

fn strip_hash(name: &str) -> &str {
    if let Some((head, tail)) = name.rsplit_once("::h") {
        if tail.len() == 16 && tail.chars().all(|c| c.is_ascii_hexdigit()) {
            return head;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_legacy_rust_name() {
        assert_eq!(
            normalize_name("_ZN14inline_fixture13outlined_spin17h0123456789abcdefE"),
            "inline_fixture::outlined_spin"
        );
    }

    #[test]
    fn test_normalize_plain_names() {
        assert_eq!(normalize_name("main"), "main");
        assert_eq!(normalize_name("inline_fixture::spin"), "inline_fixture::spin");
        assert_eq!(
            normalize_name("inline_fixture::spin::h0123456789abcdef"),
            "inline_fixture::spin"
        );
    }

    #[test]
    fn test_strip_hash_keeps_short_suffix() {
        assert_eq!(strip_hash("foo::hello"), "foo::hello");
        assert_eq!(strip_hash("foo::h0123"), "foo::h0123");
    }

    #[test]
    fn test_open_self() {
        let exe = std::env::current_exe().unwrap();
        let binary = FixtureBinary::open(&exe).unwrap();
        assert!(!binary.functions().is_empty());
        for w in binary.functions().windows(2) {
            assert!(w[0].address <= w[1].address, "functions not sorted");
        }
        let f = &binary.functions()[0];
        assert_eq!(binary.function_bytes(f).unwrap().len() as u64, f.size);
        assert_eq!(
            binary.function_containing(f.address).map(|s| s.address),
            Some(f.address)
        );
    }

    #[test]
    fn test_open_missing_file() {
        let result = FixtureBinary::open(Path::new("/nonexistent/binary"));
        assert!(matches!(result, Err(AuditError::Read { .. })));
    }

    #[test]
    fn test_open_invalid_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-elf");
        std::fs::write(&path, b"not an elf file").unwrap();
        let result = FixtureBinary::open(&path);
        assert!(matches!(result, Err(AuditError::Parse { .. })));
    }
}
