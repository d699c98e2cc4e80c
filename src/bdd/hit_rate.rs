//! Per-node traffic share, from a report of how often each call path was
//! taken.

use std::collections::BTreeMap;
use std::path::Path;

use crate::bdd::dot::NodeStyle;
use crate::bdd::{Bdd, Node, NodeId};
use crate::error::SynapseError;

fn base_name(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
}

/// Hits per call path, keyed by the call path's file name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HitReport {
    hits: BTreeMap<String, u64>,
}

impl HitReport {
    /// One `<call-path filename> <hits>` pair per line. Blank lines are
    /// skipped; repeated names add up.
    pub fn parse(text: &str) -> Result<Self, SynapseError> {
        let mut hits = BTreeMap::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(name), Some(count), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(SynapseError::malformed(i + 1, "expected `<filename> <hits>`"));
            };
            let count: u64 = count
                .parse()
                .map_err(|_| SynapseError::malformed(i + 1, format!("bad hit count {count}")))?;
            *hits.entry(base_name(name).to_string()).or_insert(0) += count;
        }
        Ok(Self { hits })
    }

    pub fn hits(&self, filename: &str) -> u64 {
        self.hits.get(base_name(filename)).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.hits.values().sum()
    }

    /// Hits flowing through `node`.
    pub fn node_hits(&self, node: &Node) -> u64 {
        node.filenames.iter().map(|f| self.hits(f)).sum()
    }

    /// Share of all hits flowing through each node, in `[0, 1]`.
    pub fn rates(&self, bdd: &Bdd) -> BTreeMap<NodeId, f64> {
        let total = self.total();
        bdd.nodes()
            .map(|n| {
                let rate = if total == 0 {
                    0.0
                } else {
                    self.node_hits(n) as f64 / total as f64
                };
                (n.id, rate)
            })
            .collect()
    }

    /// Blue for cold nodes through red for the hottest.
    pub fn style(&self, node: &Node) -> NodeStyle {
        let total = self.total();
        let hits = self.node_hits(node);
        let rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        NodeStyle {
            fill: Some(heat_color(rate)),
            note: Some(format!("{hits} hits ({:.2}%)", rate * 100.0)),
        }
    }
}

pub fn heat_color(rate: f64) -> String {
    let rate = rate.clamp(0.0, 1.0);
    let red = (rate * 255.0).round() as u8;
    let blue = ((1.0 - rate) * 255.0).round() as u8;
    format!("#{red:02x}60{blue:02x}")
}

#[cfg(test)]
mod tests {
    use crate::bdd::BddBuilder;
    use crate::bdd::builder::tests::scenario_path;
    use crate::bdd::hit_rate::{HitReport, heat_color};
    use crate::error::SynapseError;
    use crate::expr::SolverToolbox;

    #[test]
    fn test_parse_report() {
        let report = HitReport::parse("a.call_path 10\n\n/tmp/b.call_path 30\na.call_path 5\n").unwrap();
        assert_eq!(report.hits("a.call_path"), 15);
        assert_eq!(report.hits("out/b.call_path"), 30);
        assert_eq!(report.total(), 45);
        assert!(matches!(
            HitReport::parse("a.call_path ten"),
            Err(SynapseError::MalformedInput { line: 1, .. })
        ));
    }

    #[test]
    fn test_rates_follow_call_paths() {
        let s = SolverToolbox::new();
        let bdd = BddBuilder::new("nf", &s).build(&[scenario_path()]).unwrap();
        let report = HitReport::parse("call-path-1.call_path 8\nother.call_path 8").unwrap();
        let rates = report.rates(&bdd);
        assert_eq!(rates[&bdd.process], 0.5);
        assert_eq!(heat_color(1.0), "#ff6000");
        assert_eq!(heat_color(0.0), "#0060ff");
    }
}
