//! Cadence habit lifecycle engine.
//!
//! Advances habits through daily states (TODAY → YESTERDAY → LIVELY →
//! JUNKED), tracks streaks with one level of undo, catches up habits that
//! were not visited for several days, and reshapes task forests for daily
//! display and monthly carry-forward.
//!
//! Zero I/O: storage is reached only through the [`LifecycleStore`] trait, and
//! every component receives an already-resolved calendar date.

pub mod date;
pub mod error;
pub mod habit;
pub mod machine;
pub mod memory;
pub mod migrate;
pub mod processor;
pub mod store;
pub mod tree;
pub mod view;

pub use date::{
    DateResolver, add_days, day_start, diff_in_days, month_start, parse_date,
    parse_simulated_instant, previous_month_start, time_zone,
};
pub use error::{EngineError, Result};
pub use habit::{BROKEN_STREAK, Habit, HabitState, HabitUpdate, LifecycleEvent, LifecycleSnapshot};
pub use machine::{HabitLifecycleMachine, transition};
pub use memory::MemoryStore;
pub use migrate::{MigrationPlan, MigrationReport, TargetLifecycleMigrator, plan_migration};
pub use processor::{
    CatchUp, HabitFailure, LifecycleProcessor, ProcessReport, catch_up, needs_grace_review,
};
pub use store::{BucketKey, HabitRecord, LifecycleStore, UnreadableHabit};
pub use tree::{ActionNode, Forest, collect_ids, count_nodes, partition, walk};
pub use view::{FilteredForest, Viewer, clear_completed, daily_view, public_only};

pub use jiff::Timestamp;
pub use jiff::civil::Date;
