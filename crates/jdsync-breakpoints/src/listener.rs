use jdsync_jdi::Event;

use crate::target::DebugTarget;

/// Receives events for the requests it is registered on.
pub trait EventListener: Send + Sync {
    /// Handles one event and votes on resuming the event thread: `true` to
    /// resume, `false` to stay suspended.
    ///
    /// The listener may register or deregister listeners on `target` from
    /// inside this call, itself included.
    fn handle_event(&self, event: &Event, target: &DebugTarget) -> bool;
}

impl<F> EventListener for F
where
    F: Fn(&Event, &DebugTarget) -> bool + Send + Sync,
{
    fn handle_event(&self, event: &Event, target: &DebugTarget) -> bool {
        self(event, target)
    }
}
