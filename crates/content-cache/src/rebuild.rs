//! Rebuild lifecycle and complete-update admission.
//!
//! Every complete update admitted by the controller becomes a [`Rebuild`].
//! Its [`RebuildState`] only changes through [`RebuildState::transition`],
//! and the controller holds at most two rebuilds at a time: `current` (the
//! one executing or about to) and `next` (queued behind it). Admission is a
//! pure decision over those two slots, see [`RebuildSlots::admit`].

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::error::{CacheError, CacheResult};
use crate::update::UpdateUnit;

/// Lifecycle of a single complete update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildState {
    Waiting,
    Running,
    ApplyingQueuedPartials,
    Finished,
    Failed,
}

/// Inputs to the rebuild state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildEvent {
    /// Execution started.
    Start,
    /// The fresh snapshot was built; queued partials are replayed next.
    Built,
    /// Queued partials were replayed and the snapshot published.
    Published,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid rebuild transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: RebuildState,
    pub event: RebuildEvent,
}

impl RebuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RebuildState::Finished | RebuildState::Failed)
    }

    pub fn transition(self, event: RebuildEvent) -> Result<RebuildState, InvalidTransition> {
        use RebuildEvent::*;
        use RebuildState::*;

        match (self, event) {
            (Waiting, Start) => Ok(Running),
            (Running, Built) => Ok(ApplyingQueuedPartials),
            (ApplyingQueuedPartials, Published) => Ok(Finished),
            (Waiting | Running | ApplyingQueuedPartials, Fail) => Ok(Failed),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

/// One admitted complete update.
pub(crate) struct Rebuild {
    id: u64,
    unit: Mutex<Option<UpdateUnit>>,
    state: watch::Sender<RebuildState>,
    failure: OnceLock<CacheError>,
}

impl Rebuild {
    pub(crate) fn new(id: u64, unit: UpdateUnit) -> Arc<Self> {
        let (state, _) = watch::channel(RebuildState::Waiting);
        Arc::new(Self {
            id,
            unit: Mutex::new(Some(unit)),
            state,
            failure: OnceLock::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> RebuildState {
        *self.state.borrow()
    }

    /// Hand the unit to the executing task. Only the first call gets it.
    pub(crate) fn take_unit(&self) -> Option<UpdateUnit> {
        self.unit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Apply `event` to the state machine and wake waiters on success.
    pub(crate) fn advance(&self, event: RebuildEvent) -> Result<RebuildState, InvalidTransition> {
        let mut outcome = None;
        self.state.send_if_modified(|state| {
            let next = state.transition(event);
            if let Ok(next) = next {
                *state = next;
            }
            outcome = Some(next);
            next.is_ok()
        });
        outcome.unwrap_or(Err(InvalidTransition {
            from: self.state(),
            event,
        }))
    }

    /// Record `cause` and move to `Failed`.
    pub(crate) fn fail(&self, cause: CacheError) -> Result<RebuildState, InvalidTransition> {
        let _ = self.failure.set(cause);
        self.advance(RebuildEvent::Fail)
    }

    /// Wait until this rebuild is finished or failed.
    pub(crate) async fn wait(&self) -> CacheResult<()> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => {
                return Err(CacheError::Aborted(format!(
                    "rebuild {} state channel closed",
                    self.id
                )))
            }
        };

        match state {
            RebuildState::Finished => Ok(()),
            _ => Err(self.failure.get().cloned().unwrap_or_else(|| {
                CacheError::Aborted(format!("rebuild {} failed without a cause", self.id))
            })),
        }
    }
}

impl fmt::Debug for Rebuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rebuild")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// What the controller does with a newly submitted complete update.
#[derive(Debug)]
pub(crate) enum Admission {
    /// The update became `current`; execute it now.
    Execute(Arc<Rebuild>),
    /// The update became `next`; execute it once `previous` is done.
    ExecuteAfter {
        previous: Arc<Rebuild>,
        rebuild: Arc<Rebuild>,
    },
    /// The update is redundant; wait for this rebuild instead.
    Join(Arc<Rebuild>),
}

/// The `current` and `next` complete-update slots.
#[derive(Debug, Default)]
pub(crate) struct RebuildSlots {
    current: Option<Arc<Rebuild>>,
    next: Option<Arc<Rebuild>>,
}

impl RebuildSlots {
    /// Decide where a new complete update goes.
    ///
    /// `create` is only called when the update takes a slot; a joined update
    /// is dropped unexecuted.
    pub(crate) fn admit(&mut self, create: impl FnOnce() -> Arc<Rebuild>) -> Admission {
        self.settle();

        let Some(current) = self.current.clone() else {
            let rebuild = create();
            self.current = Some(Arc::clone(&rebuild));
            return Admission::Execute(rebuild);
        };

        if current.state() == RebuildState::Waiting {
            return Admission::Join(current);
        }

        match &self.next {
            Some(next) => Admission::Join(Arc::clone(next)),
            None => {
                let rebuild = create();
                self.next = Some(Arc::clone(&rebuild));
                Admission::ExecuteAfter {
                    previous: current,
                    rebuild,
                }
            }
        }
    }

    /// Drop terminal rebuilds and move a pending `next` into `current`.
    pub(crate) fn settle(&mut self) {
        if self.current.as_ref().is_some_and(|r| r.state().is_terminal()) {
            self.current = None;
        }
        if self.next.as_ref().is_some_and(|r| r.state().is_terminal()) {
            self.next = None;
        }
        if self.current.is_none() {
            self.current = self.next.take();
        }
    }

    /// Clear `rebuild` from its slot once it reached a terminal state.
    pub(crate) fn release(&mut self, rebuild: &Arc<Rebuild>) {
        if self
            .current
            .as_ref()
            .is_some_and(|r| Arc::ptr_eq(r, rebuild))
        {
            self.current = None;
        }
        self.settle();
    }

    pub(crate) fn is_current(&self, rebuild: &Arc<Rebuild>) -> bool {
        self.current
            .as_ref()
            .is_some_and(|r| Arc::ptr_eq(r, rebuild))
    }

    pub(crate) fn current_state(&self) -> Option<RebuildState> {
        self.current.as_ref().map(|r| r.state())
    }

    pub(crate) fn next_state(&self) -> Option<RebuildState> {
        self.next.as_ref().map(|r| r.state())
    }

    pub(crate) fn in_progress(&self) -> bool {
        self.current_state().is_some_and(|s| !s.is_terminal())
    }

    /// Rebuilds not yet finished or failed, `current` first.
    pub(crate) fn pending(&self) -> Vec<Arc<Rebuild>> {
        self.current
            .iter()
            .chain(self.next.iter())
            .filter(|r| !r.state().is_terminal())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ContentCache;
    use crate::update::CacheUpdate;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl CacheUpdate for Noop {
        fn kind(&self) -> crate::update::UpdateKind {
            crate::update::UpdateKind::Complete
        }

        fn name(&self) -> &'static str {
            "noop"
        }

        async fn apply(&self, _cache: &mut ContentCache) -> CacheResult<()> {
            Ok(())
        }
    }

    fn rebuild(id: u64) -> Arc<Rebuild> {
        Rebuild::new(id, UpdateUnit::new(Noop))
    }

    fn id_of(admission: &Admission) -> u64 {
        match admission {
            Admission::Execute(r) | Admission::Join(r) => r.id(),
            Admission::ExecuteAfter { rebuild, .. } => rebuild.id(),
        }
    }

    #[test]
    fn test_transitions_happy_path() {
        let s = RebuildState::Waiting;
        let s = s.transition(RebuildEvent::Start).unwrap();
        assert_eq!(s, RebuildState::Running);
        let s = s.transition(RebuildEvent::Built).unwrap();
        assert_eq!(s, RebuildState::ApplyingQueuedPartials);
        let s = s.transition(RebuildEvent::Published).unwrap();
        assert_eq!(s, RebuildState::Finished);
        assert!(s.is_terminal());
    }

    #[test]
    fn test_terminal_states_reject_events() {
        for state in [RebuildState::Finished, RebuildState::Failed] {
            for event in [
                RebuildEvent::Start,
                RebuildEvent::Built,
                RebuildEvent::Published,
                RebuildEvent::Fail,
            ] {
                assert_eq!(
                    state.transition(event),
                    Err(InvalidTransition { from: state, event })
                );
            }
        }
    }

    #[test]
    fn test_cannot_skip_running() {
        assert!(RebuildState::Waiting
            .transition(RebuildEvent::Built)
            .is_err());
        assert!(RebuildState::Running
            .transition(RebuildEvent::Published)
            .is_err());
    }

    #[test]
    fn test_fail_from_any_live_state() {
        for state in [
            RebuildState::Waiting,
            RebuildState::Running,
            RebuildState::ApplyingQueuedPartials,
        ] {
            assert_eq!(
                state.transition(RebuildEvent::Fail),
                Ok(RebuildState::Failed)
            );
        }
    }

    #[test]
    fn test_admit_into_empty_slots_executes() {
        let mut slots = RebuildSlots::default();
        let admission = slots.admit(|| rebuild(1));

        assert!(matches!(admission, Admission::Execute(_)));
        assert_eq!(slots.current_state(), Some(RebuildState::Waiting));
        assert!(slots.in_progress());
    }

    #[test]
    fn test_admit_joins_waiting_current() {
        let mut slots = RebuildSlots::default();
        slots.admit(|| rebuild(1));

        let admission = slots.admit(|| rebuild(2));
        assert!(matches!(admission, Admission::Join(_)));
        assert_eq!(id_of(&admission), 1);
        assert_eq!(slots.next_state(), None);
    }

    #[test]
    fn test_admit_queues_behind_running_current() {
        let mut slots = RebuildSlots::default();
        let Admission::Execute(first) = slots.admit(|| rebuild(1)) else {
            panic!("expected execute");
        };
        first.advance(RebuildEvent::Start).unwrap();

        let admission = slots.admit(|| rebuild(2));
        match &admission {
            Admission::ExecuteAfter { previous, rebuild } => {
                assert_eq!(previous.id(), 1);
                assert_eq!(rebuild.id(), 2);
            }
            other => panic!("expected execute-after, got {:?}", other),
        }
        assert_eq!(slots.next_state(), Some(RebuildState::Waiting));

        // A third request while both slots are taken joins `next`.
        let third = slots.admit(|| rebuild(3));
        assert!(matches!(third, Admission::Join(_)));
        assert_eq!(id_of(&third), 2);
        assert_eq!(slots.pending().len(), 2);
    }

    #[test]
    fn test_finished_current_promotes_next() {
        let mut slots = RebuildSlots::default();
        let Admission::Execute(first) = slots.admit(|| rebuild(1)) else {
            panic!("expected execute");
        };
        first.advance(RebuildEvent::Start).unwrap();
        let Admission::ExecuteAfter { rebuild: second, .. } = slots.admit(|| rebuild(2)) else {
            panic!("expected execute-after");
        };

        first.advance(RebuildEvent::Built).unwrap();
        first.advance(RebuildEvent::Published).unwrap();
        slots.release(&first);

        assert!(slots.is_current(&second));
        assert_eq!(slots.next_state(), None);

        // `second` has not started yet, so a new request joins it.
        let admission = slots.admit(|| rebuild(3));
        assert_eq!(id_of(&admission), 2);
    }

    #[test]
    fn test_failed_current_frees_slot() {
        let mut slots = RebuildSlots::default();
        let Admission::Execute(first) = slots.admit(|| rebuild(1)) else {
            panic!("expected execute");
        };
        first.advance(RebuildEvent::Start).unwrap();
        first
            .fail(CacheError::Source("database down".to_string()))
            .unwrap();
        slots.release(&first);

        assert!(!slots.in_progress());
        let admission = slots.admit(|| rebuild(2));
        assert!(matches!(admission, Admission::Execute(_)));
    }

    #[tokio::test]
    async fn test_waiters_receive_failure_cause() {
        let r = rebuild(7);
        let waiter = {
            let r = Arc::clone(&r);
            tokio::spawn(async move { r.wait().await })
        };

        r.advance(RebuildEvent::Start).unwrap();
        r.fail(CacheError::Source("database down".to_string()))
            .unwrap();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(CacheError::Source(msg)) if msg == "database down"));
    }

    #[tokio::test]
    async fn test_wait_on_finished_returns_immediately() {
        let r = rebuild(8);
        r.advance(RebuildEvent::Start).unwrap();
        r.advance(RebuildEvent::Built).unwrap();
        r.advance(RebuildEvent::Published).unwrap();

        assert!(r.wait().await.is_ok());
    }

    #[test]
    fn test_take_unit_once() {
        let r = rebuild(9);
        assert!(r.take_unit().is_some());
        assert!(r.take_unit().is_none());
    }
}
