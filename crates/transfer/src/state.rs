//! Task lifecycle state machine.
//!
//! Every status change goes through [`StateMachine::apply`], which checks the
//! precondition for the transition and performs exactly one step.

use serde::Serialize;

/// Lifecycle status of a transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Fresh,
    Prefetching,
    Prefetched,
    Redirecting,
    Processing,
    Canceling,
    Finished,
    Aborted,
    /// The task could not be scheduled at all.
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Error)
    }
}

/// Events that move a task between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Start. `prefetch` is false when the transfer URL is already known.
    Run { prefetch: bool },
    /// The prefetch body named the transfer URL.
    PrefetchResolved,
    /// An HTTP redirect arrived during prefetch or transfer.
    RedirectReceived,
    /// The redirect target was accepted; resume where the redirect came from.
    RedirectAccepted,
    /// Local file opened or source validated.
    LocalReady,
    /// All bytes exchanged and the server reported success.
    TransferComplete,
    Fail,
    CancelRequested,
    /// The worker context is gone before the task ever ran.
    WorkerLost,
}

/// Rejected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {transition:?} from {from:?}")]
pub struct IllegalTransition {
    pub from: TaskStatus,
    pub transition: Transition,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    status: TaskStatus,
    /// Status a pending redirect returns to.
    redirected_from: Option<TaskStatus>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            status: TaskStatus::Fresh,
            redirected_from: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Applies `transition`, returning the new status.
    pub fn apply(&mut self, transition: Transition) -> Result<TaskStatus, IllegalTransition> {
        use TaskStatus::*;
        use Transition::*;

        let next = match (self.status, transition) {
            (Fresh, Run { prefetch: true }) => Prefetching,
            (Fresh, Run { prefetch: false }) => Prefetched,
            (Prefetching, PrefetchResolved) => Prefetched,
            (from @ (Prefetching | Processing), RedirectReceived) => {
                self.redirected_from = Some(from);
                Redirecting
            }
            (Redirecting, RedirectAccepted) => match self.redirected_from.take() {
                Some(origin) => origin,
                None => return Err(self.illegal(transition)),
            },
            (Prefetched, LocalReady) => Processing,
            (Processing, TransferComplete) => Finished,
            (Canceling, CancelRequested) => Canceling,
            (from, CancelRequested) if !from.is_terminal() => Canceling,
            (from, Fail) if !from.is_terminal() => Aborted,
            (Fresh, WorkerLost) => Error,
            _ => return Err(self.illegal(transition)),
        };

        self.status = next;
        Ok(next)
    }

    fn illegal(&self, transition: Transition) -> IllegalTransition {
        IllegalTransition {
            from: self.status,
            transition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStatus::*;
    use super::Transition::*;
    use super::*;

    fn machine_at(path: &[Transition]) -> StateMachine {
        let mut sm = StateMachine::new();
        for t in path {
            sm.apply(*t).unwrap();
        }
        sm
    }

    #[test]
    fn download_happy_path() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(Run { prefetch: true }), Ok(Prefetching));
        assert_eq!(sm.apply(PrefetchResolved), Ok(Prefetched));
        assert_eq!(sm.apply(LocalReady), Ok(Processing));
        assert_eq!(sm.apply(TransferComplete), Ok(Finished));
        assert!(sm.status().is_terminal());
    }

    #[test]
    fn direct_task_skips_prefetch() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(Run { prefetch: false }), Ok(Prefetched));
        assert_eq!(sm.apply(LocalReady), Ok(Processing));
    }

    #[test]
    fn redirect_returns_to_origin() {
        let mut sm = machine_at(&[Run { prefetch: true }]);
        assert_eq!(sm.apply(RedirectReceived), Ok(Redirecting));
        assert_eq!(sm.apply(RedirectAccepted), Ok(Prefetching));

        let mut sm = machine_at(&[Run { prefetch: true }, PrefetchResolved, LocalReady]);
        assert_eq!(sm.apply(RedirectReceived), Ok(Redirecting));
        assert_eq!(sm.apply(RedirectAccepted), Ok(Processing));
    }

    #[test]
    fn redirect_accept_requires_pending_redirect() {
        let mut sm = machine_at(&[Run { prefetch: true }]);
        assert!(sm.apply(RedirectAccepted).is_err());
        assert_eq!(sm.status(), Prefetching);
    }

    #[test]
    fn redirect_not_allowed_from_prefetched() {
        let mut sm = machine_at(&[Run { prefetch: false }]);
        let err = sm.apply(RedirectReceived).unwrap_err();
        assert_eq!(err.from, Prefetched);
    }

    #[test]
    fn invalid_redirect_aborts() {
        let mut sm = machine_at(&[Run { prefetch: true }, RedirectReceived]);
        assert_eq!(sm.apply(Fail), Ok(Aborted));
    }

    #[test]
    fn cancel_then_abort() {
        let mut sm = machine_at(&[Run { prefetch: true }, PrefetchResolved, LocalReady]);
        assert_eq!(sm.apply(CancelRequested), Ok(Canceling));
        assert_eq!(sm.apply(CancelRequested), Ok(Canceling));
        assert!(sm.apply(TransferComplete).is_err());
        assert_eq!(sm.apply(Fail), Ok(Aborted));
    }

    #[test]
    fn cancel_from_fresh() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(CancelRequested), Ok(Canceling));
        assert!(sm.apply(Run { prefetch: true }).is_err());
    }

    #[test]
    fn terminal_states_reject_everything() {
        let finished = [Run { prefetch: false }, LocalReady, TransferComplete];
        for t in [CancelRequested, Fail, Run { prefetch: true }, WorkerLost] {
            let mut sm = machine_at(&finished);
            assert!(sm.apply(t).is_err(), "{t:?}");
            assert_eq!(sm.status(), Finished);
        }

        let mut sm = machine_at(&[Run { prefetch: true }, Fail]);
        assert!(sm.apply(CancelRequested).is_err());
        assert_eq!(sm.status(), Aborted);
    }

    #[test]
    fn worker_lost_only_before_run() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(WorkerLost), Ok(Error));
        assert!(sm.apply(Fail).is_err());

        let mut sm = machine_at(&[Run { prefetch: true }]);
        assert!(sm.apply(WorkerLost).is_err());
    }

    #[test]
    fn complete_requires_processing() {
        let mut sm = machine_at(&[Run { prefetch: true }]);
        let err = sm.apply(TransferComplete).unwrap_err();
        assert_eq!(
            err,
            IllegalTransition {
                from: Prefetching,
                transition: TransferComplete
            }
        );
    }
}
