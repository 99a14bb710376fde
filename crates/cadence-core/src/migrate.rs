//! Monthly carry-forward of unfinished targets.
//!
//! Last month's forest is split by completion. The unfinished side moves into
//! this month's bucket; the finished side stays behind as history. A parent
//! with both kinds of children ends up in both places, each copy holding only
//! its own children.

use std::collections::HashSet;

use jiff::civil::Date;
use serde::Serialize;

use crate::date::{month_start, previous_month_start};
use crate::error::Result;
use crate::store::{BucketKey, LifecycleStore};
use crate::tree::{ActionNode, Forest, collect_ids, partition};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub previous: BucketKey,
    pub current: BucketKey,
    /// Top-level trees appended to the current month.
    pub migrated: usize,
    /// Top-level trees already present in the current month.
    pub skipped: usize,
    /// Top-level trees left in the previous month as history.
    pub retained: usize,
}

/// What a migration would write, computed without touching the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationPlan {
    /// New current-month forest, or `None` when nothing was merged.
    pub current: Option<Forest>,
    /// New previous-month forest, or `None` when nothing moved out of it.
    pub history: Option<Forest>,
    pub migrated: usize,
    pub skipped: usize,
    pub retained: usize,
}

pub fn plan_migration(previous: &[ActionNode], current: &[ActionNode]) -> MigrationPlan {
    let (active, completed) = partition(previous, &|n: &ActionNode| n.completed);
    let retained = completed.len();

    if active.is_empty() {
        return MigrationPlan {
            current: None,
            history: None,
            migrated: 0,
            skipped: 0,
            retained,
        };
    }

    let existing: HashSet<String> = collect_ids(current)
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut merged = current.to_vec();
    let mut migrated = 0;
    let mut skipped = 0;
    for node in active {
        if existing.contains(&node.id) {
            skipped += 1;
        } else {
            merged.push(node);
            migrated += 1;
        }
    }

    MigrationPlan {
        current: (migrated > 0).then_some(merged),
        history: Some(completed),
        migrated,
        skipped,
        retained,
    }
}

pub struct TargetLifecycleMigrator;

impl TargetLifecycleMigrator {
    /// Carry last month's unfinished targets into the month containing
    /// `today`. Safe to call any number of times.
    ///
    /// The current bucket is written before history is trimmed, so a failed
    /// write never loses an unfinished target.
    pub fn run<S: LifecycleStore>(store: &S, user_id: &str, today: Date) -> Result<MigrationReport> {
        let previous = BucketKey::Month(previous_month_start(today)?);
        let current = BucketKey::Month(month_start(today));

        let previous_forest = store.fetch_bucket(user_id, previous).map_err(Into::into)?;
        let plan = if previous_forest.is_empty() {
            plan_migration(&[], &[])
        } else {
            let current_forest = store.fetch_bucket(user_id, current).map_err(Into::into)?;
            plan_migration(&previous_forest, &current_forest)
        };

        if let Some(forest) = &plan.current {
            store
                .update_bucket(user_id, current, forest)
                .map_err(Into::into)?;
        }
        if let Some(forest) = &plan.history {
            store
                .update_bucket(user_id, previous, forest)
                .map_err(Into::into)?;
        }

        if plan.migrated + plan.skipped > 0 {
            tracing::info!(
                user_id,
                from = %previous,
                to = %current,
                migrated = plan.migrated,
                skipped = plan.skipped,
                "targets carried forward"
            );
        }

        Ok(MigrationReport {
            previous,
            current,
            migrated: plan.migrated,
            skipped: plan.skipped,
            retained: plan.retained,
        })
    }
}
