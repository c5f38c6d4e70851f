//! The upward interface: what the election manager needs from, and reports to, the layer that
//! runs once a leader is established.

use super::{Epoch, PeerId, Priority};

/// Supplies this peer's priority and receives the leadership lifecycle.
///
/// Calls are made on the manager's control thread, in the order the transitions happen. Every
/// `on_start_*` is matched by the corresponding `on_stop_*` before the next `on_start_*`.
pub trait ElectionCallbacks {
    /// Current priority of this peer; a higher value wins ties between simultaneous candidates.
    fn priority(&self) -> Priority;

    /// Renders a priority for diagnostics.
    fn format_priority(&self, priority: Priority) -> String {
        priority.to_string()
    }

    fn on_start_leading(&mut self, epoch: Epoch);
    fn on_stop_leading(&mut self);
    fn on_start_following(&mut self, leader_id: PeerId, epoch: Epoch);
    fn on_stop_following(&mut self);
}
