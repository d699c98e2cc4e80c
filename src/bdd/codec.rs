use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::{Level, event, instrument};

use crate::bdd::{Bdd, Node, NodeId, NodeKind, ReturnInitValue, ReturnOp};
use crate::call_path::parse_call;
use crate::error::SynapseError;
use crate::expr::{ConstraintSet, Expr};

pub const MAGIC_SIGNATURE: &str = "===== VIGOR_BDD_SIG =====";
pub const METADATA_HEADER: &str = ";;-- Metadata --";
pub const KQUERY_HEADER: &str = ";;-- kQuery --";
pub const NODES_HEADER: &str = ";; -- Nodes --";
pub const EDGES_HEADER: &str = ";; -- Edges --";
pub const ROOTS_HEADER: &str = ";; -- Roots --";

impl Bdd {
    /// Writes the diagram in the line-oriented `.bdd` format. Nodes are
    /// emitted in id order; their constraint clauses and branch conditions
    /// occupy consecutive kQuery entries in the same order.
    pub fn serialize(&self) -> Result<String, SynapseError> {
        let mut table = String::new();
        let mut nodes = String::new();
        let mut edges = String::new();
        let mut next_expr = 0usize;
        let mut push_expr = |table: &mut String, e: &Expr| -> usize {
            let idx = next_expr;
            let _ = writeln!(table, "{idx}:{e}");
            next_expr += 1;
            idx
        };
        for node in self.nodes() {
            for set in &node.constraints {
                for e in set {
                    push_expr(&mut table, e);
                }
            }
            let paths: Vec<String> = node
                .filenames
                .iter()
                .zip(node.constraints.iter())
                .map(|(f, c)| format!("{f}:{}", c.len()))
                .collect();
            let payload = match &node.kind {
                NodeKind::Call { call, next } => {
                    let _ = writeln!(edges, "({}->{next})", node.id);
                    call.to_string()
                }
                NodeKind::Branch {
                    condition,
                    on_true,
                    on_false,
                } => {
                    let _ = writeln!(edges, "({}->{on_true}->{on_false})", node.id);
                    push_expr(&mut table, condition).to_string()
                }
                NodeKind::ReturnInit { value } => value.to_string(),
                NodeKind::ReturnProcess { value, op } => format!("{op} {value}"),
                NodeKind::ReturnRaw { .. } => {
                    return Err(SynapseError::invariant(format!(
                        "raw return {} cannot be serialized",
                        node.id
                    )));
                }
            };
            let _ = writeln!(
                nodes,
                "{}:([{}] {} {payload})",
                node.id,
                paths.join(" "),
                node.kind_name()
            );
        }
        let mut out = String::new();
        let _ = writeln!(out, "{MAGIC_SIGNATURE}");
        let _ = writeln!(out, "{METADATA_HEADER}");
        let _ = writeln!(out, "cps:{}", self.total_call_paths);
        let _ = writeln!(out, "{KQUERY_HEADER}");
        out.push_str(&table);
        let _ = writeln!(out, "{NODES_HEADER}");
        out.push_str(&nodes);
        let _ = writeln!(out, "{EDGES_HEADER}");
        out.push_str(&edges);
        let _ = writeln!(out, "{ROOTS_HEADER}");
        let _ = writeln!(out, "init:{}", self.init);
        let _ = writeln!(out, "process:{}", self.process);
        Ok(out)
    }

    /// Parses the `.bdd` format. Ids are kept as written.
    #[instrument(skip_all, fields(name = name))]
    pub fn deserialize(name: &str, contents: &str) -> Result<Bdd, SynapseError> {
        let mut lines = contents.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));
        match lines.by_ref().find(|(_, l)| !l.is_empty()) {
            Some((_, MAGIC_SIGNATURE)) => {}
            Some((n, _)) => return Err(SynapseError::malformed(n, "missing BDD signature")),
            None => return Err(SynapseError::malformed(0, "empty BDD file")),
        }
        let mut reader = Reader::default();
        let mut section = Section::Preamble;
        for (n, line) in lines {
            if line.is_empty() {
                continue;
            }
            section = match line {
                METADATA_HEADER => Section::Metadata,
                KQUERY_HEADER => Section::KQuery,
                NODES_HEADER => Section::Nodes,
                EDGES_HEADER => Section::Edges,
                ROOTS_HEADER => Section::Roots,
                _ => {
                    reader.line(section, n, line)?;
                    continue;
                }
            };
        }
        let bdd = reader.finish(name)?;
        event!(
            Level::DEBUG,
            "Loaded BDD with {} nodes",
            bdd.nodes().count()
        );
        Ok(bdd)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), SynapseError> {
        fs::write(path, self.serialize()?)?;
        Ok(())
    }

    /// Reads a `.bdd` file; the diagram is named after the file stem.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Bdd, SynapseError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Bdd::deserialize(&name, &contents)
    }
}

#[derive(Copy, Clone)]
enum Section {
    Preamble,
    Metadata,
    KQuery,
    Nodes,
    Edges,
    Roots,
}

#[derive(Default)]
struct Reader {
    cps: usize,
    exprs: BTreeMap<usize, Expr>,
    cursor: usize,
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<(usize, NodeId, Vec<NodeId>)>,
    init: Option<NodeId>,
    process: Option<NodeId>,
}

fn number<T: std::str::FromStr>(n: usize, s: &str) -> Result<T, SynapseError> {
    s.trim()
        .parse()
        .map_err(|_| SynapseError::malformed(n, format!("expected a number, found '{s}'")))
}

fn parse_op(n: usize, s: &str) -> Result<ReturnOp, SynapseError> {
    match s {
        "FWD" => Ok(ReturnOp::Fwd),
        "DROP" => Ok(ReturnOp::Drop),
        "BCAST" => Ok(ReturnOp::Bcast),
        "ERR" => Ok(ReturnOp::Err),
        _ => Err(SynapseError::malformed(n, format!("unknown return operation '{s}'"))),
    }
}

impl Reader {
    fn line(&mut self, section: Section, n: usize, line: &str) -> Result<(), SynapseError> {
        match section {
            Section::Preamble => Err(SynapseError::malformed(n, "content outside any section")),
            Section::Metadata => {
                if let Some(v) = line.strip_prefix("cps:") {
                    self.cps = number(n, v)?;
                }
                Ok(())
            }
            Section::KQuery => {
                let (idx, expr) = line
                    .split_once(':')
                    .ok_or_else(|| SynapseError::malformed(n, "expected <index>:<expr>"))?;
                let e: Expr = expr
                    .parse()
                    .map_err(|e| SynapseError::from_parse(n, e))?;
                self.exprs.insert(number(n, idx)?, e);
                Ok(())
            }
            Section::Nodes => self.node(n, line),
            Section::Edges => {
                let inner = line
                    .strip_prefix('(')
                    .and_then(|l| l.strip_suffix(')'))
                    .ok_or_else(|| SynapseError::malformed(n, "edge must be parenthesized"))?;
                let ids = inner
                    .split("->")
                    .map(|s| number(n, s))
                    .collect::<Result<Vec<NodeId>, _>>()?;
                let Some((src, targets)) = ids.split_first() else {
                    return Err(SynapseError::malformed(n, "empty edge"));
                };
                self.edges.push((n, *src, targets.to_vec()));
                Ok(())
            }
            Section::Roots => {
                if let Some(v) = line.strip_prefix("init:") {
                    self.init = Some(number(n, v)?);
                } else if let Some(v) = line.strip_prefix("process:") {
                    self.process = Some(number(n, v)?);
                } else {
                    return Err(SynapseError::malformed(n, format!("unknown root '{line}'")));
                }
                Ok(())
            }
        }
    }

    fn take_expr(&mut self, n: usize, idx: usize) -> Result<Expr, SynapseError> {
        let e = self
            .exprs
            .get(&idx)
            .cloned()
            .ok_or_else(|| SynapseError::malformed(n, format!("no kQuery entry {idx}")))?;
        self.cursor = self.cursor.max(idx + 1);
        Ok(e)
    }

    fn node(&mut self, n: usize, line: &str) -> Result<(), SynapseError> {
        let (id, body) = line
            .split_once(':')
            .ok_or_else(|| SynapseError::malformed(n, "expected <id>:(...)"))?;
        let id: NodeId = number(n, id)?;
        let body = body
            .strip_prefix("([")
            .and_then(|b| b.strip_suffix(')'))
            .ok_or_else(|| SynapseError::malformed(n, "node must be written as ([paths] KIND payload)"))?;
        let (paths, rest) = body
            .split_once(']')
            .ok_or_else(|| SynapseError::malformed(n, "unterminated path list"))?;
        let mut filenames = vec![];
        let mut constraints = vec![];
        for (file, count) in path_entries(n, paths)? {
            let mut clauses = Vec::with_capacity(count);
            for _ in 0..count {
                let idx = self.cursor;
                clauses.push(self.take_expr(n, idx)?);
            }
            filenames.push(file);
            constraints.push(ConstraintSet::new(clauses));
        }
        let rest = rest.trim_start();
        let (kind, payload) = rest.split_once(' ').unwrap_or((rest, ""));
        let kind = match kind {
            "CALL" => NodeKind::Call {
                call: parse_call(payload).map_err(|e| SynapseError::from_parse(n, e))?,
                next: id,
            },
            "BRANCH" => {
                let idx = number(n, payload)?;
                NodeKind::Branch {
                    condition: self.take_expr(n, idx)?,
                    on_true: id,
                    on_false: id,
                }
            }
            "RETURN_INIT" => NodeKind::ReturnInit {
                value: match payload {
                    "SUCCESS" => ReturnInitValue::Success,
                    "FAILURE" => ReturnInitValue::Failure,
                    _ => {
                        return Err(SynapseError::malformed(
                            n,
                            format!("unknown init return '{payload}'"),
                        ));
                    }
                },
            },
            "RETURN_PROCESS" => {
                let (op, value) = payload
                    .split_once(' ')
                    .ok_or_else(|| SynapseError::malformed(n, "expected <OP> <value>"))?;
                NodeKind::ReturnProcess {
                    op: parse_op(n, op)?,
                    value: number(n, value)?,
                }
            }
            _ => return Err(SynapseError::malformed(n, format!("unknown node kind '{kind}'"))),
        };
        if self.nodes.contains_key(&id) {
            return Err(SynapseError::malformed(n, format!("duplicate node id {id}")));
        }
        self.nodes
            .insert(id, Node::new(id, kind).with_paths(filenames, constraints));
        Ok(())
    }

    fn finish(mut self, name: &str) -> Result<Bdd, SynapseError> {
        for (n, src, targets) in std::mem::take(&mut self.edges) {
            for t in &targets {
                let child = self
                    .nodes
                    .get_mut(t)
                    .ok_or_else(|| SynapseError::malformed(n, format!("edge to unknown node {t}")))?;
                child.prev = Some(src);
            }
            let node = self
                .nodes
                .get_mut(&src)
                .ok_or_else(|| SynapseError::malformed(n, format!("edge from unknown node {src}")))?;
            match (&mut node.kind, targets.as_slice()) {
                (NodeKind::Call { next, .. }, [t]) => *next = *t,
                (
                    NodeKind::Branch {
                        on_true, on_false, ..
                    },
                    [t, f],
                ) => {
                    *on_true = *t;
                    *on_false = *f;
                }
                _ => {
                    return Err(SynapseError::malformed(
                        n,
                        format!("edge does not fit node {src}"),
                    ));
                }
            }
        }
        if let Some(dangling) = self.nodes.values().find(|node| node.successors().contains(&node.id)) {
            return Err(SynapseError::malformed(
                0,
                format!("node {} has no outgoing edge", dangling.id),
            ));
        }
        let (Some(init), Some(process)) = (self.init, self.process) else {
            return Err(SynapseError::malformed(0, "missing init or process root"));
        };
        let mut bdd = Bdd::empty(name);
        bdd.total_call_paths = self.cps;
        for (_, node) in std::mem::take(&mut self.nodes) {
            let prev = node.prev;
            let id = bdd.insert(node);
            bdd.node_mut(id)?.prev = prev;
        }
        bdd.init = init;
        bdd.process = process;
        bdd.check_invariants()?;
        Ok(bdd)
    }
}

/// `<file>:<count>` entries separated by spaces. An entry only ends at a
/// token with the `:<count>` suffix, so file names may hold spaces.
fn path_entries(n: usize, list: &str) -> Result<Vec<(String, usize)>, SynapseError> {
    let mut out = vec![];
    let mut pending: Option<String> = None;
    for token in list.split(' ') {
        let entry = match pending.take() {
            Some(head) => format!("{head} {token}"),
            None if token.is_empty() => continue,
            None => token.to_string(),
        };
        let parsed = entry
            .rsplit_once(':')
            .and_then(|(file, count)| Some((file, count.parse::<usize>().ok()?)));
        match parsed {
            Some((file, count)) => out.push((file.to_string(), count)),
            None => pending = Some(entry),
        }
    }
    match pending {
        Some(rest) => Err(SynapseError::malformed(n, format!("bad path entry '{rest}'"))),
        None => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use crate::bdd::builder::tests::scenario_path;
    use crate::bdd::{Bdd, BddBuilder, NodeKind, ReturnOp};
    use crate::call_path::CallPath;
    use crate::error::SynapseError;
    use crate::expr::{ConstraintSet, Expr, SolverToolbox};

    #[test]
    fn test_roundtrip_single_path() {
        let s = SolverToolbox::new();
        let bdd = BddBuilder::new("nf", &s).build(&[scenario_path()]).unwrap();
        let text = bdd.serialize().unwrap();
        assert!(text.starts_with("===== VIGOR_BDD_SIG ====="));
        let back = Bdd::deserialize("nf", &text).unwrap();
        back.check_invariants().unwrap();
        assert_eq!(back.get_number_of_nodes(back.process), 4);
        assert_eq!(back.total_call_paths, 1);
        assert!(back.equivalent(&bdd));
    }

    #[test]
    fn test_roundtrip_branches_and_constraints() {
        let s = SolverToolbox::new();
        let hit = Expr::read_lsb("map_has_this_key", 0, 4).ne(&Expr::constant(0, 32));
        let mut a = scenario_path();
        a.constraints = ConstraintSet::new([hit.clone()]);
        let b = CallPath {
            filename: "miss".into(),
            constraints: ConstraintSet::new([hit.negated()]),
            calls: vec![
                crate::bdd::builder::tests::borrow(14, 0),
                crate::bdd::builder::tests::map_get(6),
                crate::call_path::Call::new("packet_free"),
            ],
        };
        let bdd = BddBuilder::new("nf", &s).build(&[a, b]).unwrap();
        let back = Bdd::deserialize("nf", &bdd.serialize().unwrap()).unwrap();
        assert!(back.equivalent(&bdd));
        let branch = back.nodes().find(|n| n.is_branch()).unwrap();
        assert_eq!(branch.filenames.len(), 2);
        assert!(matches!(
            back.terminals().last().unwrap().kind,
            NodeKind::ReturnProcess {
                op: ReturnOp::Drop,
                ..
            }
        ));
    }

    #[test]
    fn test_filenames_with_spaces() {
        let s = SolverToolbox::new();
        let mut cp = scenario_path();
        cp.filename = "runs/day 2/call path 1.call_path".into();
        let bdd = BddBuilder::new("nf", &s).build(&[cp]).unwrap();
        let back = Bdd::deserialize("nf", &bdd.serialize().unwrap()).unwrap();
        assert!(back.equivalent(&bdd));
        assert_eq!(
            back.node(back.process).unwrap().filenames,
            vec!["runs/day 2/call path 1.call_path".to_string()]
        );
        assert_eq!(
            super::path_entries(1, "a b:0 c:2").unwrap(),
            vec![("a b".to_string(), 0), ("c".to_string(), 2)]
        );
        assert!(super::path_entries(1, "a b").is_err());
    }

    #[test]
    fn test_missing_signature() {
        let err = Bdd::deserialize("x", ";;-- Metadata --\ncps:1\n").unwrap_err();
        assert!(matches!(err, SynapseError::MalformedInput { line: 1, .. }));
    }

    #[test]
    fn test_raw_return_is_not_serializable() {
        let mut bdd = crate::bdd::tests::chain(vec![], ReturnOp::Drop, 0);
        bdd.node_mut(bdd.process).unwrap().kind = NodeKind::ReturnRaw { calls: vec![] };
        assert!(bdd.serialize().is_err());
    }
}
