//! Part change notifications.

use super::part::Part;

/// Observes changes to the parts of a replicated object.
///
/// Callbacks run on the object's processor task, one at a time and in the
/// order updates were applied. A panicking listener is logged and skipped.
pub trait PartListener<T>: Send + Sync {
    /// A part was added or replaced. `old` is `None` for a node seen for the
    /// first time.
    fn updated(&self, old: Option<&Part<T>>, new: &Part<T>) {
        let _ = (old, new);
    }

    /// A node left and its part was dropped
    fn removed(&self, part: &Part<T>) {
        let _ = part;
    }
}
