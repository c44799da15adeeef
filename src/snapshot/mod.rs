//! Snapshot data: the wire document format, the denormalized per-namespace
//! evaluation model, and the concurrent store that holds the active
//! snapshot.
pub mod source;

mod namespace;
mod store;

pub use namespace::{
    Constraint, ConstraintComparisonType, Distribution, Flag, FlagType, Namespace, Rollout,
    RolloutAction, Rule, Segment, SegmentMatchType, SegmentOperator, SegmentRollout,
    ThresholdRollout,
};
pub use store::SnapshotStore;
