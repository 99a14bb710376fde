//! Task forests and the structure-preserving partition shared by daily
//! clearing, visibility filtering and monthly carry-forward.

use std::collections::HashSet;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionNode {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    /// Set exactly when `completed` is true.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub children: Vec<ActionNode>,
}

pub type Forest = Vec<ActionNode>;

impl ActionNode {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            completed: false,
            completed_at: None,
            is_public: false,
            children: Vec::new(),
        }
    }

    pub fn completed_at(mut self, at: Timestamp) -> Self {
        self.completed = true;
        self.completed_at = Some(at);
        self
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    pub fn with_children(mut self, children: Vec<ActionNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Same node, different children.
    fn shell(&self, children: Vec<ActionNode>) -> Self {
        Self {
            id: self.id.clone(),
            description: self.description.clone(),
            completed: self.completed,
            completed_at: self.completed_at,
            is_public: self.is_public,
            children,
        }
    }
}

/// Split `forest` into `(side_a, side_b)`: side B holds nodes matching
/// `predicate`, side A the rest.
///
/// A node appears on a side when it belongs there itself or when any of its
/// descendants does; in the latter case it acts as a container holding only
/// that side's children. Leaves therefore land on exactly one side, and a
/// parent with mixed descendants appears on both. Sibling order is kept.
pub fn partition<P>(forest: &[ActionNode], predicate: &P) -> (Forest, Forest)
where
    P: Fn(&ActionNode) -> bool,
{
    let mut side_a = Vec::new();
    let mut side_b = Vec::new();

    for node in forest {
        let (children_a, children_b) = partition(&node.children, predicate);
        let matches = predicate(node);

        if !matches || !children_a.is_empty() {
            side_a.push(node.shell(children_a));
        }
        if matches || !children_b.is_empty() {
            side_b.push(node.shell(children_b));
        }
    }

    (side_a, side_b)
}

/// Depth-first iterator over every node in a forest.
pub fn walk(forest: &[ActionNode]) -> impl Iterator<Item = &ActionNode> {
    let mut stack: Vec<&ActionNode> = forest.iter().rev().collect();
    std::iter::from_fn(move || {
        let node = stack.pop()?;
        stack.extend(node.children.iter().rev());
        Some(node)
    })
}

pub fn collect_ids(forest: &[ActionNode]) -> HashSet<&str> {
    walk(forest).map(|n| n.id.as_str()).collect()
}

pub fn count_nodes(forest: &[ActionNode]) -> usize {
    walk(forest).count()
}
