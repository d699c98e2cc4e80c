//! Combination of two network functions' diagrams into one that runs both
//! on every packet.

use std::collections::BTreeMap;

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{Level, event, instrument};

use crate::bdd::{Bdd, NodeId, NodeKind, ReturnInitValue, ReturnOp};
use crate::error::SynapseError;
use crate::expr::SolverToolbox;
use crate::merge::path::{compatible, paths};
use crate::merge::trie::Trie;
use crate::merge::weave::weave;
use crate::symbol::rename_apart;

pub use chunks::{ChunkLayout, Piece, align_chunks};
pub use path::{Path, Step};

pub mod chunks;
pub mod path;
mod trie;
mod weave;

/// Temporary labels of the second diagram start here, clear of any id the
/// merged diagram will hand out.
const SECOND_TAG: NodeId = 1 << 32;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[default]
    First,
    Second,
}

/// Which input diagram a merged node stands for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    First,
    Second,
    Both,
}

impl From<Side> for Origin {
    fn from(value: Side) -> Self {
        match value {
            Side::First => Origin::First,
            Side::Second => Origin::Second,
        }
    }
}

/// How terminal and packet-write conflicts between the two functions are
/// settled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergePolicy {
    /// Indexed by the two terminals' operations (`FWD`, `DROP`, `BCAST`);
    /// `0` keeps the first diagram's terminal, `1` the second's.
    pub conflict_matrix: [[u8; 3]; 3],
    /// Whose returned chunk bytes win when both functions rewrite them.
    pub prior_changes: Side,
}

impl MergePolicy {
    /// The surviving operation never depends on which input carries it, so
    /// swapping the inputs keeps every terminal. Operations equal on both
    /// sides are left out.
    pub fn is_symmetric(&self) -> bool {
        (0..3).all(|a| (0..3).all(|b| a == b || self.conflict_matrix[a][b] != self.conflict_matrix[b][a]))
    }

    pub fn resolve(&self, first: ReturnOp, second: ReturnOp) -> Side {
        match (first.matrix_index(), second.matrix_index()) {
            (None, Some(_)) => Side::Second,
            (_, None) => Side::First,
            (Some(a), Some(b)) => {
                if self.conflict_matrix[a][b] == 0 {
                    Side::First
                } else {
                    Side::Second
                }
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Origin of every node of the merged diagram, by final id.
    pub origins: BTreeMap<NodeId, Origin>,
    pub compatible_pairs: usize,
    pub incompatible_pairs: usize,
    /// Borrows added to each side to line up chunk boundaries.
    pub extra_borrows: [usize; 2],
    /// Pairs whose valid terminals disagreed and were settled by the matrix.
    pub overridden_terminals: usize,
}

impl std::fmt::Display for MergeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = |o: Origin| self.origins.values().filter(|v| **v == o).count();
        writeln!(f, "{}", "Merge report".bold())?;
        writeln!(
            f,
            "  path pairs: {} compatible, {} incompatible",
            self.compatible_pairs.to_string().green(),
            self.incompatible_pairs
        )?;
        writeln!(
            f,
            "  nodes: {} first, {} second, {} shared",
            count(Origin::First),
            count(Origin::Second),
            count(Origin::Both)
        )?;
        writeln!(
            f,
            "  extra borrows: {} first, {} second",
            self.extra_borrows[0], self.extra_borrows[1]
        )?;
        if self.overridden_terminals > 0 {
            write!(
                f,
                "  {} terminals settled by the conflict matrix",
                self.overridden_terminals.to_string().yellow()
            )?;
        }
        Ok(())
    }
}

/// A merged diagram and how it was put together.
#[derive(Clone, Debug)]
pub struct MergedBdd {
    pub bdd: Bdd,
    pub report: MergeReport,
}

/// Chains the second init tree after every successful first init, then
/// writes one merged process path per compatible pair of input paths.
#[instrument(skip_all, fields(first = %first.name, second = %second.name))]
pub fn merge(
    first: &Bdd,
    second: &Bdd,
    policy: &MergePolicy,
    solver: &SolverToolbox,
) -> Result<MergedBdd, SynapseError> {
    let mut second = second.clone();
    rename_apart(&mut second, SECOND_TAG)?;
    let mut report = MergeReport::default();
    let mut trie = Trie::default();
    let (left, right) = (paths(first, first.process)?, paths(&second, second.process)?);
    for a in &left {
        for b in &right {
            if !compatible((first, a), (&second, b), solver)? {
                report.incompatible_pairs += 1;
                continue;
            }
            let woven = weave((first, a), (&second, b), policy)?;
            report.compatible_pairs += 1;
            report.extra_borrows[0] += woven.extra[0];
            report.extra_borrows[1] += woven.extra[1];
            if woven.overridden {
                report.overridden_terminals += 1;
            }
            trie.add(&woven, solver)?;
        }
    }
    event!(
        Level::DEBUG,
        "{} of {} path pairs are compatible",
        report.compatible_pairs,
        left.len() * right.len()
    );

    let mut out = Bdd::empty(&format!("{}+{}", first.name, second.name));
    let mut origins = BTreeMap::new();
    out.process = trie.materialize(&mut out, &mut origins)?;
    let (init, ids) = out.import_subtree(first, first.init)?;
    out.init = init;
    origins.extend(ids.into_values().map(|id| (id, Origin::First)));
    for leaf in out.leaves(init) {
        let node = out.node(leaf)?;
        if !matches!(
            node.kind,
            NodeKind::ReturnInit {
                value: ReturnInitValue::Success
            }
        ) {
            continue;
        }
        let parent = node.prev;
        let (copy, ids) = out.import_subtree(&second, second.init)?;
        origins.extend(ids.into_values().map(|id| (id, Origin::Second)));
        out.relink(parent, leaf, copy)?;
        out.remove(leaf);
        origins.remove(&leaf);
    }
    out.total_call_paths = first.total_call_paths + second.total_call_paths;

    let remap = out.renumber();
    out.finalize(solver)?;
    report.origins = origins
        .into_iter()
        .filter_map(|(id, o)| Some((*remap.get(&id)?, o)))
        .collect();
    event!(
        Level::INFO,
        "Merged {} and {} into {} process nodes",
        first.name,
        second.name,
        out.get_number_of_nodes(out.process)
    );
    Ok(MergedBdd { bdd: out, report })
}
