//! The dependency-registration entry points consumed by source-lowered
//! user code.
//!
//! The function names are contractual. Each entry point resolves its
//! implementation once, lazily, against the symbol table installed at
//! runtime start; variants the installed table does not provide fall
//! back to a weaker symbol (commutative and concurrent degrade to
//! readwrite, weak variants to their strong counterparts).

use crate::dependencies::region::Region;
use crate::dependencies::{registry, AccessType};
use crate::task::TaskHandle;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Signature of a resolved registration entry point.
pub type DepinfoFn = fn(&TaskHandle, usize, usize);

/// Symbol-name to implementation mapping, installed once per process.
#[derive(Default)]
pub(crate) struct SymbolTable {
    symbols: HashMap<&'static str, DepinfoFn>,
}

impl SymbolTable {
    pub(crate) fn with_symbols(symbols: &[(&'static str, DepinfoFn)]) -> Self {
        Self {
            symbols: symbols.iter().copied().collect(),
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<DepinfoFn> {
        self.symbols.get(name).copied()
    }
}

static SYMBOLS: OnceLock<SymbolTable> = OnceLock::new();

/// Install the full linear-regions implementation. First installation
/// wins; later runtimes share it.
pub(crate) fn install_default_symbols() {
    SYMBOLS.get_or_init(|| {
        SymbolTable::with_symbols(&[
            ("register_read_depinfo", impl_read as DepinfoFn),
            ("register_write_depinfo", impl_write),
            ("register_readwrite_depinfo", impl_readwrite),
            ("register_commutative_depinfo", impl_commutative),
            ("register_concurrent_depinfo", impl_concurrent),
            ("register_weak_read_depinfo", impl_weak_read),
            ("register_weak_write_depinfo", impl_weak_write),
            ("register_weak_readwrite_depinfo", impl_weak_readwrite),
        ])
    });
}

/// Resolve `primary` in `table`, falling back to `fallback` when absent.
/// Panics when neither is provided; an area with no implementation is a
/// deployment error, not a runtime condition.
pub(crate) fn resolve_symbol(
    table: &SymbolTable,
    primary: &str,
    area: &str,
    fallback: Option<&str>,
) -> DepinfoFn {
    table
        .lookup(primary)
        .or_else(|| fallback.and_then(|name| table.lookup(name)))
        .unwrap_or_else(|| panic!("no implementation available for {area} ({primary})"))
}

fn installed() -> &'static SymbolTable {
    SYMBOLS
        .get()
        .expect("dependency symbols not installed; build a Runtime first")
}

macro_rules! depinfo_entry_point {
    ($(#[$doc:meta])* $name:ident, $area:expr, $fallback:expr) => {
        $(#[$doc])*
        pub fn $name(handler: &TaskHandle, start: usize, length: usize) {
            static RESOLVED: OnceLock<DepinfoFn> = OnceLock::new();
            let implementation = RESOLVED.get_or_init(|| {
                resolve_symbol(installed(), stringify!($name), $area, $fallback)
            });
            implementation(handler, start, length)
        }
    };
}

depinfo_entry_point!(
    /// Declare a read over `[start, start + length)`.
    register_read_depinfo,
    "dependency",
    None
);
depinfo_entry_point!(
    /// Declare a write over `[start, start + length)`.
    register_write_depinfo,
    "dependency",
    None
);
depinfo_entry_point!(
    /// Declare a read-write over `[start, start + length)`.
    register_readwrite_depinfo,
    "dependency",
    None
);
depinfo_entry_point!(
    /// Declare a commutative access; serialized against its peers but in
    /// no particular order.
    register_commutative_depinfo,
    "commutative dependency",
    Some("register_readwrite_depinfo")
);
depinfo_entry_point!(
    /// Declare a concurrent access; unordered against its peers.
    register_concurrent_depinfo,
    "concurrent dependency",
    Some("register_readwrite_depinfo")
);
depinfo_entry_point!(
    /// Declare the region for subtasks without reading it.
    register_weak_read_depinfo,
    "weak dependency",
    Some("register_read_depinfo")
);
depinfo_entry_point!(
    /// Declare the region for subtasks without writing it.
    register_weak_write_depinfo,
    "weak dependency",
    Some("register_write_depinfo")
);
depinfo_entry_point!(
    /// Declare the region for subtasks without accessing it.
    register_weak_readwrite_depinfo,
    "weak dependency",
    Some("register_readwrite_depinfo")
);

fn register(handler: &TaskHandle, access_type: AccessType, weak: bool, start: usize, length: usize) {
    registry::register_access(
        &handler.rt,
        &handler.task,
        access_type,
        weak,
        Region::new(start, length),
    );
}

fn impl_read(handler: &TaskHandle, start: usize, length: usize) {
    register(handler, AccessType::Read, false, start, length);
}

fn impl_write(handler: &TaskHandle, start: usize, length: usize) {
    register(handler, AccessType::Write, false, start, length);
}

fn impl_readwrite(handler: &TaskHandle, start: usize, length: usize) {
    register(handler, AccessType::ReadWrite, false, start, length);
}

fn impl_commutative(handler: &TaskHandle, start: usize, length: usize) {
    register(handler, AccessType::Commutative, false, start, length);
}

fn impl_concurrent(handler: &TaskHandle, start: usize, length: usize) {
    register(handler, AccessType::Concurrent, false, start, length);
}

fn impl_weak_read(handler: &TaskHandle, start: usize, length: usize) {
    register(handler, AccessType::Read, true, start, length);
}

fn impl_weak_write(handler: &TaskHandle, start: usize, length: usize) {
    register(handler, AccessType::Write, true, start, length);
}

fn impl_weak_readwrite(handler: &TaskHandle, start: usize, length: usize) {
    register(handler, AccessType::ReadWrite, true, start, length);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_resolves_when_primary_is_absent() {
        let table = SymbolTable::with_symbols(&[
            ("register_readwrite_depinfo", impl_readwrite as DepinfoFn),
        ]);
        let resolved = resolve_symbol(
            &table,
            "register_commutative_depinfo",
            "commutative dependency",
            Some("register_readwrite_depinfo"),
        );
        assert_eq!(resolved as usize, impl_readwrite as usize);
    }

    #[test]
    #[should_panic(expected = "no implementation available")]
    fn missing_symbol_without_fallback_panics() {
        let table = SymbolTable::default();
        resolve_symbol(&table, "register_read_depinfo", "dependency", None);
    }
}
