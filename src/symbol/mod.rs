use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use crate::expr::Expr;

pub use factory::{ScopeGuard, SymbolFactory};
pub use rename::{rename_apart, rename_symbols, translate};

mod factory;
mod rename;
pub mod table;

/// Symbols that exist before the first call of any path.
pub const AMBIENT_SYMBOLS: &[&str] = &[
    "VIGOR_DEVICE",
    "pkt_len",
    "data_len",
    "received_a_packet",
    "loop_termination",
    "lcore_id",
];

/// Never considered when computing dependencies.
pub const IGNORED_SYMBOLS: &[&str] = &["VIGOR_DEVICE"];

/// Labels that are shared across every producer and never renamed.
pub const DO_NOT_TRANSLATE: &[&str] = &["packet_chunks", "checksum"];

pub const PACKET_CHUNKS: &str = "packet_chunks";

/// A named value produced by a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub label_base: String,
    pub label: String,
    pub expr: Expr,
    pub addr: Option<Expr>,
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) = {}", self.label, self.label_base, self.expr)?;
        if let Some(a) = &self.addr {
            write!(f, " @ {a}")?;
        }
        Ok(())
    }
}

/// Strips a `__N` or `@N` disambiguation suffix.
pub fn label_base(label: &str) -> &str {
    fn numeric_suffix(s: &str, sep: &str) -> Option<usize> {
        let (head, tail) = s.rsplit_once(sep)?;
        (!tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit())).then_some(head.len())
    }
    if let Some(n) = numeric_suffix(label, "@") {
        return &label[..n];
    }
    if let Some(n) = numeric_suffix(label, "__") {
        return &label[..n];
    }
    label
}

/// The `n`-th label of a base: `base`, `base__1`, `base__2`, ...
pub fn nth_label(base: &str, n: usize) -> String {
    if n == 0 {
        base.to_string()
    } else {
        format!("{base}__{n}")
    }
}

pub fn is_ambient(label: &str) -> bool {
    AMBIENT_SYMBOLS.contains(&label)
}

pub fn is_translatable(base: &str) -> bool {
    !DO_NOT_TRANSLATE.contains(&base)
}

/// Symbols a set of labels depends on, minus the ignored ones.
pub fn dependencies<'a, T: IntoIterator<Item = &'a Expr>>(exprs: T) -> BTreeSet<String> {
    exprs
        .into_iter()
        .flat_map(|e| e.arrays())
        .filter(|a| !IGNORED_SYMBOLS.contains(&a.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::symbol::{label_base, nth_label};

    #[test]
    fn test_label_base() {
        assert_eq!(label_base("map_has_this_key"), "map_has_this_key");
        assert_eq!(label_base("map_has_this_key__3"), "map_has_this_key");
        assert_eq!(label_base("new_index@17"), "new_index");
        assert_eq!(label_base("a__b"), "a__b");
        assert_eq!(nth_label("x", 0), "x");
        assert_eq!(nth_label("x", 2), "x__2");
    }
}
