//! Daily task-tree views: next-day clearing and the public visibility filter.

use jiff::Timestamp;
use serde::Serialize;

use crate::tree::{ActionNode, Forest, partition, walk};

/// A derived forest plus how many private items it leaves out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FilteredForest {
    pub forest: Forest,
    pub hidden_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Viewer {
    Owner,
    Visitor,
}

/// Completed before the current local day began.
///
/// A completed node without a timestamp is treated as fresh and stays visible.
pub fn completed_before(node: &ActionNode, start_of_day: Timestamp) -> bool {
    node.completed && node.completed_at.is_some_and(|at| at < start_of_day)
}

/// Drop items completed on an earlier day. Parents whose other children are
/// still live remain as containers.
pub fn clear_completed(forest: &[ActionNode], start_of_day: Timestamp) -> FilteredForest {
    let (kept, _cleared) = partition(forest, &|n: &ActionNode| completed_before(n, start_of_day));
    FilteredForest {
        forest: kept,
        hidden_count: 0,
    }
}

/// Keep public nodes and private containers of public descendants.
///
/// `hidden_count` is the number of private, incomplete leaf items removed.
pub fn public_only(forest: &[ActionNode]) -> FilteredForest {
    let (visible, _hidden) = partition(forest, &|n: &ActionNode| !n.is_public);
    let hidden_count = walk(forest)
        .filter(|n| n.is_leaf() && !n.is_public && !n.completed)
        .count();
    FilteredForest {
        forest: visible,
        hidden_count,
    }
}

/// The task list as shown on a given day: yesterday's finished items are
/// cleared, and visitors additionally see only public items.
pub fn daily_view(forest: &[ActionNode], start_of_day: Timestamp, viewer: Viewer) -> FilteredForest {
    let cleared = clear_completed(forest, start_of_day);
    match viewer {
        Viewer::Owner => cleared,
        Viewer::Visitor => public_only(&cleared.forest),
    }
}
