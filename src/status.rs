//! Pipeline status and its transition rules

use core::fmt;

use parking_lot::Mutex;
use tracing::debug;

/// Derived decoder status, driven by the drain loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStatus {
    Stopped,
    Running,
    /// The frame queue reached its threshold; the producer is waiting
    QueueFull,
    /// Input has ended; residual frames are being flushed
    Draining,
    /// The source rejected input; the stream must be torn down
    Stopping,
    /// The sink reported end of stream
    Ended,
}

impl PipelineStatus {
    /// Statuses only left through an explicit restart.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStatus::Stopping | PipelineStatus::Ended)
    }

    /// Whether the drain loop keeps waiting for the consumer in this status.
    pub fn is_waiting(self) -> bool {
        matches!(self, PipelineStatus::QueueFull | PipelineStatus::Draining)
    }

    pub fn can_transition(self, to: PipelineStatus) -> bool {
        use PipelineStatus::*;

        if self == to || to == Stopped {
            return true;
        }
        match self {
            Stopped => to == Running,
            Running | QueueFull => true,
            Draining => !matches!(to, Running | QueueFull),
            Stopping | Ended => false,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStatus::Stopped => "Stopped",
            PipelineStatus::Running => "Running",
            PipelineStatus::QueueFull => "QueueFull",
            PipelineStatus::Draining => "Draining",
            PipelineStatus::Stopping => "Stopping",
            PipelineStatus::Ended => "Ended",
        };
        f.write_str(name)
    }
}

/// The authoritative status value. Never held while taking another lock.
#[derive(Debug)]
pub struct StatusCell {
    status: Mutex<PipelineStatus>,
}

impl StatusCell {
    pub fn new(status: PipelineStatus) -> Self {
        Self {
            status: Mutex::new(status),
        }
    }

    #[inline]
    pub fn get(&self) -> PipelineStatus {
        *self.status.lock()
    }

    /// Move to `to` if allowed. Returns whether the status is now `to`.
    pub fn transition(&self, to: PipelineStatus) -> bool {
        let mut status = self.status.lock();
        if *status == to {
            return true;
        }
        if !status.can_transition(to) {
            debug!("Status {} -> {} not allowed", *status, to);
            return false;
        }
        debug!("Status {} -> {}", *status, to);
        *status = to;
        true
    }

    /// Move from `from` to `to` only if the status is still `from`.
    pub fn transition_from(&self, from: PipelineStatus, to: PipelineStatus) -> bool {
        let mut status = self.status.lock();
        if *status != from || !from.can_transition(to) {
            return false;
        }
        debug!("Status {} -> {}", from, to);
        *status = to;
        true
    }

    /// Set `to` unconditionally, for restarts and disposal.
    pub fn reset(&self, to: PipelineStatus) {
        let mut status = self.status.lock();
        if *status != to {
            debug!("Status {} -> {} (reset)", *status, to);
        }
        *status = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineStatus::*;

    #[test]
    fn terminal_states_are_one_way() {
        for to in [Running, QueueFull, Draining] {
            assert!(!Ended.can_transition(to));
            assert!(!Stopping.can_transition(to));
        }
        assert!(!Ended.can_transition(Stopping));
        assert!(Ended.can_transition(Stopped));
    }

    #[test]
    fn draining_never_resumes() {
        assert!(!Draining.can_transition(Running));
        assert!(!Draining.can_transition(QueueFull));
        assert!(Draining.can_transition(Ended));
        assert!(Draining.can_transition(Stopping));
    }

    #[test]
    fn cell_enforces_rules() {
        let cell = StatusCell::new(Stopped);
        assert!(!cell.transition(QueueFull));
        assert!(cell.transition(Running));
        assert!(cell.transition_from(Running, QueueFull));
        assert!(!cell.transition_from(Running, QueueFull));
        assert!(cell.transition(Ended));
        assert!(!cell.transition(Running));
        assert_eq!(cell.get(), Ended);

        cell.reset(Running);
        assert_eq!(cell.get(), Running);
    }
}
