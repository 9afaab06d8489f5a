//! Per-path plan tree built from raw listing counts and the unique pool.

use std::collections::BTreeMap;

use crate::traverse::{Harvest, RawCounts};

/// One node of the plan tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanNode {
    /// Node name (last path segment; the root name for the top node).
    pub name: String,
    /// Depth below the root.
    pub depth: usize,
    /// Members listed directly at this node.
    pub direct_raw: usize,
    /// Pool records assigned directly to this node.
    pub direct_unique: usize,
    /// `direct_raw` summed over the subtree.
    pub total_raw: usize,
    /// `direct_unique` summed over the subtree.
    pub total_unique: usize,
    /// Children, sorted case-insensitively.
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    /// Members listed here but assigned elsewhere (or filtered out).
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.direct_raw.saturating_sub(self.direct_unique)
    }

    fn child_mut(&mut self, name: &str) -> &mut Self {
        let idx = match self.children.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                self.children.push(Self {
                    name: name.to_string(),
                    depth: self.depth + 1,
                    ..Self::default()
                });
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    fn finish(&mut self) -> (usize, usize) {
        self.children
            .sort_by(|a, b| sort_key(&a.name).cmp(&sort_key(&b.name)));
        let (mut raw, mut unique) = (self.direct_raw, self.direct_unique);
        for child in &mut self.children {
            let (r, u) = child.finish();
            raw += r;
            unique += u;
        }
        self.total_raw = raw;
        self.total_unique = unique;
        (raw, unique)
    }
}

fn sort_key(name: &str) -> (String, &str) {
    (name.to_lowercase(), name)
}

/// Builds the tree for one root from raw and unique per-path counts.
#[must_use]
pub fn build_tree(root: &str, raw: &RawCounts, unique: &BTreeMap<Vec<String>, usize>) -> PlanNode {
    let mut top = PlanNode {
        name: root.to_string(),
        ..PlanNode::default()
    };
    for (path, &count) in raw {
        descend(&mut top, path).direct_raw += count;
    }
    for (path, &count) in unique {
        descend(&mut top, path).direct_unique += count;
    }
    top.finish();
    top
}

fn descend<'a>(top: &'a mut PlanNode, path: &[String]) -> &'a mut PlanNode {
    path.iter().fold(top, |node, segment| node.child_mut(segment))
}

/// Plan for every harvested root.
#[derive(Debug, Clone, Default)]
pub struct PlanReport {
    /// One tree per root, in harvest order.
    pub roots: Vec<PlanNode>,
}

impl PlanReport {
    /// Builds the report from harvests.
    #[must_use]
    pub fn new(harvests: &[Harvest]) -> Self {
        let roots = harvests
            .iter()
            .map(|h| build_tree(&h.root, &h.raw_counts, &h.pool.counts_by_path()))
            .collect();
        Self { roots }
    }

    /// Raw members across all roots.
    #[must_use]
    pub fn grand_raw(&self) -> usize {
        self.roots.iter().map(|r| r.total_raw).sum()
    }

    /// Unique eligible files across all roots.
    #[must_use]
    pub fn grand_unique(&self) -> usize {
        self.roots.iter().map(|r| r.total_unique).sum()
    }

    /// Text lines of the report.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for root in &self.roots {
            lines.push(format!(
                "Category:{} -> raw candidates={} | unique eligible={} (root level: raw={}, unique={}; subcategories={})",
                root.name,
                root.total_raw,
                root.total_unique,
                root.direct_raw,
                root.direct_unique,
                count_descendants(root),
            ));
            render_children(root, &root.name, &mut lines);
        }
        lines.push(format!(
            "Total across {} root(s): raw candidates={} | unique eligible={}",
            self.roots.len(),
            self.grand_raw(),
            self.grand_unique()
        ));
        lines
    }
}

fn count_descendants(node: &PlanNode) -> usize {
    node.children.iter().map(|c| 1 + count_descendants(c)).sum()
}

fn render_children(node: &PlanNode, prefix: &str, lines: &mut Vec<String>) {
    for child in &node.children {
        let full = format!("{prefix}/{}", child.name);
        lines.push(format!(
            "{}- {full} -> raw: direct={}, total={} | unique: direct={}, total={} | duplicates skipped={} | depth {}",
            "  ".repeat(child.depth),
            child.direct_raw,
            child.total_raw,
            child.direct_unique,
            child.total_unique,
            child.skipped(),
            child.depth,
        ));
        render_children(child, &full, lines);
    }
}
