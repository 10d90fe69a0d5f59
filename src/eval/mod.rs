//! Criteria evaluation: picks the effective conditional value of a config for a context.
mod criteria;
mod operators;

pub use criteria::{CriteriaEvaluator, Match};

use crate::context::PropertyLookup;

/// Property name that refers to the process namespace instead of a context property.
pub const NAMESPACE_PROPERTY: &str = "NAMESPACE";

/// Pseudo-property holding the evaluation time as epoch milliseconds.
pub const CURRENT_TIME_PROPERTY: &str = "prefab.current-time";

/// Resolves segment membership for `IN_SEG` / `NOT_IN_SEG` criteria.
///
/// `depth` is the segment nesting depth of the requested evaluation; implementations should refuse
/// to go deeper than a fixed limit so that accidental self-references cannot exhaust the stack.
pub trait SegmentResolver {
    /// Return whether `context` is in segment `segment_key`, or `None` if the segment cannot be
    /// evaluated (not found, not boolean, too deep).
    fn in_segment(
        &self,
        segment_key: &str,
        context: &dyn PropertyLookup,
        depth: usize,
    ) -> Option<bool>;
}

/// Segment resolver that knows no segments.
pub struct NoSegments;

impl SegmentResolver for NoSegments {
    #[inline]
    fn in_segment(&self, _: &str, _: &dyn PropertyLookup, _: usize) -> Option<bool> {
        None
    }
}
