//! Graphviz export.
//!
//! Calls are drawn as boxes, branches as diamonds and terminals as rounded
//! boxes. The true side of a branch is a solid edge, the false side dashed.
//! Callers can color individual nodes through a style hook; the hit-rate
//! report and the merger's provenance coloring are both built on it.

use std::fmt::Write as _;

use crate::bdd::{Bdd, Node, NodeId, NodeKind, ReturnInitValue, ReturnOp};

#[derive(Debug, Clone)]
pub struct DotConfig {
    pub call_shape: &'static str,
    pub branch_shape: &'static str,
    pub terminal_shape: &'static str,
    pub true_edge_style: &'static str,
    pub false_edge_style: &'static str,
    /// Longer call and condition labels are cut to this many characters.
    pub max_label: usize,
    pub include_init: bool,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            call_shape: "box",
            branch_shape: "diamond",
            terminal_shape: "Mrecord",
            true_edge_style: "solid",
            false_edge_style: "dashed",
            max_label: 120,
            include_init: true,
        }
    }
}

/// Per-node styling decided by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStyle {
    pub fill: Option<String>,
    /// Appended to the node's label on its own line.
    pub note: Option<String>,
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn truncate(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        return s;
    }
    let mut t: String = s.chars().take(max).collect();
    t.push_str("...");
    t
}

fn default_fill(node: &Node) -> Option<&'static str> {
    match &node.kind {
        NodeKind::ReturnInit {
            value: ReturnInitValue::Success,
        } => Some("chartreuse2"),
        NodeKind::ReturnInit {
            value: ReturnInitValue::Failure,
        } => Some("brown1"),
        NodeKind::ReturnProcess { op, .. } => Some(match op {
            ReturnOp::Fwd => "chartreuse2",
            ReturnOp::Drop => "brown1",
            ReturnOp::Bcast => "purple",
            ReturnOp::Err => "gray",
        }),
        NodeKind::Branch { .. } => Some("yellow"),
        _ => None,
    }
}

impl Bdd {
    pub fn to_dot(&self) -> Result<String, std::fmt::Error> {
        self.to_dot_with(&DotConfig::default(), |_| NodeStyle::default())
    }

    /// Renders the diagram, asking `style` about every node.
    pub fn to_dot_with<F>(&self, config: &DotConfig, style: F) -> Result<String, std::fmt::Error>
    where
        F: Fn(&Node) -> NodeStyle,
    {
        let mut dot = String::new();
        writeln!(dot, "digraph \"{}\" {{", escape(&self.name))?;
        writeln!(dot, "node [style=filled, fillcolor=white];")?;
        let mut roots: Vec<(&str, NodeId)> = vec![];
        if config.include_init {
            roots.push(("nf_init", self.init));
        }
        roots.push(("nf_process", self.process));
        for (title, root) in roots {
            writeln!(dot, "subgraph cluster_{title} {{")?;
            writeln!(dot, "label=\"{title}\";")?;
            for id in self.descendants(root) {
                let Some(node) = self.get(id) else { continue };
                let s = style(node);
                let (shape, text) = match &node.kind {
                    NodeKind::Call { call, .. } => (config.call_shape, call.to_string()),
                    NodeKind::Branch { condition, .. } => {
                        (config.branch_shape, condition.to_string())
                    }
                    NodeKind::ReturnInit { value } => (config.terminal_shape, value.to_string()),
                    NodeKind::ReturnProcess { value, op } => {
                        (config.terminal_shape, format!("{op} {value}"))
                    }
                    NodeKind::ReturnRaw { calls } => {
                        (config.terminal_shape, format!("raw ({} paths)", calls.len()))
                    }
                };
                let mut label = format!("{id}: {}", escape(&truncate(text, config.max_label)));
                if let Some(note) = &s.note {
                    let _ = write!(label, "\\n{}", escape(note));
                }
                let fill = s.fill.as_deref().or(default_fill(node)).unwrap_or("white");
                writeln!(
                    dot,
                    "{id} [shape={shape}, label=\"{label}\", fillcolor=\"{fill}\"];"
                )?;
                match &node.kind {
                    NodeKind::Call { next, .. } => writeln!(dot, "{id} -> {next};")?,
                    NodeKind::Branch {
                        on_true, on_false, ..
                    } => {
                        writeln!(dot, "{id} -> {on_true} [style={}];", config.true_edge_style)?;
                        writeln!(
                            dot,
                            "{id} -> {on_false} [style={}];",
                            config.false_edge_style
                        )?;
                    }
                    _ => {}
                }
            }
            writeln!(dot, "}}")?;
        }
        writeln!(dot, "}}")?;
        Ok(dot)
    }
}

#[cfg(test)]
mod tests {
    use crate::bdd::ReturnOp;
    use crate::bdd::dot::{DotConfig, NodeStyle};
    use crate::bdd::tests::chain;
    use crate::call_path::Call;

    #[test]
    fn test_dot_shapes_and_hook() {
        let bdd = chain(vec![Call::new("map_put")], ReturnOp::Fwd, 3);
        let dot = bdd
            .to_dot_with(&DotConfig::default(), |n| NodeStyle {
                fill: n.is_call().then(|| "#00ff00".to_string()),
                note: None,
            })
            .unwrap();
        assert!(dot.starts_with("digraph \"test\""));
        assert!(dot.contains("FWD 3"));
        assert!(dot.contains("fillcolor=\"#00ff00\""));
        assert!(dot.contains(&format!("{} -> ", bdd.process)));
    }
}
