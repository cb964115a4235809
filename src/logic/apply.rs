use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{ApplyError, InconsistencyError, OperationFailure};
use crate::logic::engine::ChangeSetEngine;
use crate::logic::validate::Validator;
use crate::model::{ChangeSet, Operation, ReferenceContext};
use crate::store::traits::ModelWriter;

/// Coordinator state machine:
/// `Idle -> Applying -> {Committed -> Idle | RollingBack -> {RolledBack | Inconsistent}}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyState {
    Idle,
    Applying,
    Committed,
    RollingBack,
    RolledBack,
    /// Terminal until acknowledged: the live model shape is unknown
    Inconsistent,
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyState::Idle => "idle",
            ApplyState::Applying => "applying",
            ApplyState::Committed => "committed",
            ApplyState::RollingBack => "rolling back",
            ApplyState::RolledBack => "rolled back",
            ApplyState::Inconsistent => "inconsistent",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation for a running apply.
/// Checked after each completed write, so an in-flight write always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of a committed apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Operations written to the live model
    pub applied: usize,
    /// Fingerprint of the new baseline
    pub baseline_fingerprint: String,
}

/// Sequences a validated change-set into writes against the live model,
/// reverting everything already written if any write fails.
#[derive(Debug)]
pub struct ApplyCoordinator {
    state: watch::Sender<ApplyState>,
    /// Forward operations left on the live model by the last inconsistent run
    stranded: Mutex<Vec<Operation>>,
}

/// Tracks the forward operations of a running apply whose effect is still on the
/// live model. If the run is dropped before it settles, the coordinator becomes
/// `Inconsistent` with those operations recorded as stranded.
struct InFlight<'a> {
    coordinator: &'a ApplyCoordinator,
    applied: Vec<Operation>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let state = self.coordinator.state();
        if !matches!(state, ApplyState::Applying | ApplyState::RollingBack) {
            return;
        }
        log::error!(
            "Apply abandoned while {}: {} operation(s) remain applied on the live model",
            state,
            self.applied.len()
        );
        *self.coordinator.stranded.lock() = std::mem::take(&mut self.applied);
        self.coordinator.transition(ApplyState::Inconsistent);
    }
}

impl ApplyCoordinator {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ApplyState::Idle);
        Self {
            state,
            stranded: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ApplyState {
        *self.state.borrow()
    }

    /// Observe state transitions without holding the coordinator
    pub fn subscribe(&self) -> watch::Receiver<ApplyState> {
        self.state.subscribe()
    }

    /// Operations still applied remotely after an inconsistent or abandoned run,
    /// in application order. For an abandoned run this includes the write that was
    /// in flight. Empty once acknowledged.
    pub fn stranded_operations(&self) -> Vec<Operation> {
        self.stranded.lock().clone()
    }

    fn transition(&self, next: ApplyState) {
        let previous = self.state.send_replace(next);
        log::debug!("Apply coordinator: {} -> {}", previous, next);
    }

    /// Clear the terminal inconsistent state once the user has reconciled the model.
    /// Returns `false` if there was nothing to acknowledge.
    pub fn acknowledge_inconsistency(&self) -> bool {
        if self.state() != ApplyState::Inconsistent {
            return false;
        }
        self.stranded.lock().clear();
        self.transition(ApplyState::Idle);
        true
    }

    /// Apply `change_set` to the live model and, on total success, advance the
    /// engine's baseline and clear its history.
    ///
    /// The engine's local state is never touched on failure: a rolled-back apply
    /// leaves every pending edit in place. Dropping the returned future mid-run
    /// leaves the coordinator `Inconsistent`, never stuck in `Applying`.
    pub async fn apply<W: ModelWriter + ?Sized>(
        &self,
        engine: &mut ChangeSetEngine,
        change_set: &ChangeSet,
        context: &ReferenceContext,
        writer: &W,
        cancel: &CancelToken,
    ) -> Result<ApplyReport, ApplyError> {
        match self.state() {
            ApplyState::Idle | ApplyState::RolledBack => {}
            other => return Err(ApplyError::Blocked(other)),
        }

        if change_set.base_fingerprint != engine.baseline().fingerprint()
            || *change_set != engine.current_change_set()
        {
            return Err(ApplyError::StaleChangeSet);
        }

        let report = Validator::validate(change_set, engine.baseline(), context);
        if !report.is_apply_eligible() {
            log::warn!(
                "Refusing apply: {} blocking validation error(s)",
                report.error_count()
            );
            return Err(ApplyError::Validation(report));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!(
            "Apply {} started: {} operation(s)",
            run_id,
            change_set.len()
        );

        let applied = self.execute(change_set, writer, cancel).await?;

        engine.mark_synced();
        self.transition(ApplyState::Idle);

        let report = ApplyReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            applied,
            baseline_fingerprint: engine.baseline().fingerprint(),
        };
        log::info!("Apply {} committed: {} operation(s)", run_id, applied);
        Ok(report)
    }

    /// Run the write/rollback protocol for `change_set` without touching local state.
    /// Ends in `Committed`, `RolledBack` or `Inconsistent`.
    async fn execute<W: ModelWriter + ?Sized>(
        &self,
        change_set: &ChangeSet,
        writer: &W,
        cancel: &CancelToken,
    ) -> Result<usize, ApplyError> {
        self.transition(ApplyState::Applying);
        let mut run = InFlight {
            coordinator: self,
            applied: Vec::with_capacity(change_set.len()),
        };

        if cancel.is_cancelled() {
            log::warn!("Apply cancelled before the first write");
            return Err(self.roll_back(&mut run, writer, None).await);
        }

        for op in change_set.iter() {
            log::debug!("Applying {}", op);
            // Counted as applied while in flight; an abandoned run cannot know its outcome
            run.applied.push(op.clone());
            if let Err(source) = writer.apply_operation(op).await {
                run.applied.pop();
                let failure = OperationFailure::new(op, source);
                log::warn!("Write failed, rolling back: {}", failure);
                return Err(self.roll_back(&mut run, writer, Some(failure)).await);
            }

            if cancel.is_cancelled() {
                log::warn!(
                    "Apply cancelled after {} write(s), rolling back",
                    run.applied.len()
                );
                return Err(self.roll_back(&mut run, writer, None).await);
            }
        }

        self.transition(ApplyState::Committed);
        Ok(run.applied.len())
    }

    /// Execute inverses of everything in `run` in strict reverse order
    async fn roll_back<W: ModelWriter + ?Sized>(
        &self,
        run: &mut InFlight<'_>,
        writer: &W,
        failure: Option<OperationFailure>,
    ) -> ApplyError {
        self.transition(ApplyState::RollingBack);
        let to_revert = run.applied.len();

        while let Some(op) = run.applied.last() {
            let inverse = op.inverse();
            log::debug!("Rolling back with {}", inverse);
            if let Err(source) = writer.apply_operation(&inverse).await {
                let inconsistency = InconsistencyError {
                    failure,
                    rollback_failure: OperationFailure::new(&inverse, source),
                    still_applied: run.applied.clone(),
                };
                log::error!("{}", inconsistency);
                *self.stranded.lock() = run.applied.clone();
                self.transition(ApplyState::Inconsistent);
                return ApplyError::Inconsistent(inconsistency);
            }
            run.applied.pop();
        }

        self.transition(ApplyState::RolledBack);
        log::info!("Rollback complete: {} operation(s) reverted", to_revert);

        match failure {
            Some(failure) => ApplyError::RolledBack {
                failure,
                reverted: to_revert,
            },
            None => ApplyError::Cancelled {
                reverted: to_revert,
            },
        }
    }
}

impl Default for ApplyCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriteError;
    use crate::logic::history::DEFAULT_HISTORY_LIMIT;
    use crate::model::{GroupField, GroupingRecord, OperationKind};
    use crate::store::memory::{FailurePlan, InMemoryModel};

    fn seed() -> Vec<GroupingRecord> {
        vec![
            GroupingRecord::new("A001", "G1", "", ""),
            GroupingRecord::new("A002", "G2", "G2a", ""),
        ]
    }

    fn setup() -> (ChangeSetEngine, InMemoryModel) {
        let mut engine = ChangeSetEngine::new(DEFAULT_HISTORY_LIMIT);
        engine.load(seed()).unwrap();
        (engine, InMemoryModel::with_groupings(seed()))
    }

    /// Writer that cancels the token once it has accepted `after` writes
    struct CancellingWriter<'a> {
        inner: &'a InMemoryModel,
        token: CancelToken,
        after: usize,
    }

    #[async_trait::async_trait]
    impl<'a> ModelWriter for CancellingWriter<'a> {
        async fn apply_operation(&self, op: &Operation) -> Result<(), WriteError> {
            self.inner.apply_operation(op).await?;
            if self.inner.received().len() >= self.after {
                self.token.cancel();
            }
            Ok(())
        }
    }

    /// Writer that holds every accepted write open for `delay`
    struct SlowWriter<'a> {
        inner: &'a InMemoryModel,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl<'a> ModelWriter for SlowWriter<'a> {
        async fn apply_operation(&self, op: &Operation) -> Result<(), WriteError> {
            self.inner.apply_operation(op).await?;
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_successful_apply_advances_baseline() {
        let (mut engine, model) = setup();
        engine
            .set_field("A001", GroupField::SecondGroup, "G1a")
            .unwrap();
        engine
            .add(GroupingRecord::new("B002", "G3", "", ""))
            .unwrap();

        let coordinator = ApplyCoordinator::new();
        let change_set = engine.current_change_set();
        let report = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.applied, 2);
        assert!(engine.current_change_set().is_empty());
        assert!(!engine.history().can_undo());
        assert_eq!(coordinator.state(), ApplyState::Idle);
        assert_eq!(model.rows(), engine.records().records());
        assert_eq!(report.baseline_fingerprint, engine.baseline().fingerprint());
    }

    #[tokio::test]
    async fn test_single_failed_update_rolls_back_and_keeps_local_edit() {
        let mut engine = ChangeSetEngine::default();
        engine
            .load(vec![GroupingRecord::new("A001", "G1", "", "")])
            .unwrap();
        let model = InMemoryModel::with_groupings(vec![GroupingRecord::new("A001", "G1", "", "")]);
        model.fail_on(OperationKind::Update, "A001");

        engine
            .set_field("A001", GroupField::SecondGroup, "G1a")
            .unwrap();
        let change_set = engine.current_change_set();
        assert_eq!(
            change_set.operations,
            vec![Operation::update("A001", GroupField::SecondGroup, "", "G1a")]
        );
        assert!(engine.validate(&ReferenceContext::unknown()).is_apply_eligible());

        let coordinator = ApplyCoordinator::new();
        let err = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ApplyError::RolledBack { reverted: 0, .. }));
        assert_eq!(coordinator.state(), ApplyState::RolledBack);
        assert_eq!(engine.records().get("A001").unwrap().second_group, "G1a");
        assert_eq!(engine.current_change_set(), change_set);
        // Only the failed attempt reached the model
        assert_eq!(model.received().len(), 1);
        assert_eq!(model.get("A001").unwrap().second_group, "");
    }

    #[tokio::test]
    async fn test_partial_failure_invokes_inverse_before_reporting() {
        let (mut engine, model) = setup();
        engine
            .add(GroupingRecord::new("B002", "G3", "", ""))
            .unwrap();
        engine
            .set_field("A001", GroupField::SecondGroup, "G1a")
            .unwrap();
        model.fail_on(OperationKind::Update, "A001");

        let change_set = engine.current_change_set();
        assert_eq!(change_set.operations[0].kind(), OperationKind::Add);
        assert_eq!(change_set.operations[1].kind(), OperationKind::Update);

        let coordinator = ApplyCoordinator::new();
        let err = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            ApplyError::RolledBack { failure, reverted } => {
                assert_eq!(failure.instrument_id, "A001");
                assert_eq!(reverted, 1);
            }
            other => panic!("expected rollback, got {:?}", other),
        }

        let received = model.received();
        assert_eq!(received.len(), 3);
        assert_eq!(
            received[2],
            Operation::remove(GroupingRecord::new("B002", "G3", "", ""))
        );
        assert_eq!(model.rows(), seed());
        assert_eq!(engine.current_change_set(), change_set);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_fatal_and_blocks() {
        let (mut engine, model) = setup();
        engine
            .add(GroupingRecord::new("B002", "G3", "", ""))
            .unwrap();
        engine
            .add(GroupingRecord::new("C003", "G3", "", ""))
            .unwrap();
        engine
            .set_field("A001", GroupField::SecondGroup, "G1a")
            .unwrap();
        model.fail_on(OperationKind::Update, "A001");
        model.fail_on(OperationKind::Remove, "C003");

        let coordinator = ApplyCoordinator::new();
        let change_set = engine.current_change_set();
        let err = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        let ApplyError::Inconsistent(inconsistency) = err else {
            panic!("expected inconsistency");
        };
        assert_eq!(inconsistency.rollback_failure.instrument_id, "C003");
        assert_eq!(
            inconsistency.failure.map(|f| f.instrument_id),
            Some("A001".to_string())
        );
        assert_eq!(inconsistency.still_applied.len(), 2);
        assert_eq!(coordinator.state(), ApplyState::Inconsistent);
        assert_eq!(coordinator.stranded_operations(), inconsistency.still_applied);

        // Local edits survive, further applies are refused until acknowledged
        assert_eq!(engine.current_change_set(), change_set);
        let blocked = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(blocked, ApplyError::Blocked(ApplyState::Inconsistent));

        assert!(coordinator.acknowledge_inconsistency());
        assert!(!coordinator.acknowledge_inconsistency());
        assert_eq!(coordinator.state(), ApplyState::Idle);
        assert!(coordinator.stranded_operations().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_apply_becomes_inconsistent() {
        let (mut engine, model) = setup();
        engine
            .add(GroupingRecord::new("B002", "G3", "", ""))
            .unwrap();
        engine
            .set_field("A001", GroupField::SecondGroup, "G1a")
            .unwrap();
        let writer = SlowWriter {
            inner: &model,
            delay: std::time::Duration::from_millis(200),
        };

        let coordinator = ApplyCoordinator::new();
        let change_set = engine.current_change_set();
        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            coordinator.apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &writer,
                &CancelToken::new(),
            ),
        )
        .await;
        assert!(timed_out.is_err());

        // The add reached the model and was never reverted
        assert!(model.get("B002").is_some());
        assert_eq!(coordinator.state(), ApplyState::Inconsistent);
        assert_eq!(
            coordinator.stranded_operations(),
            vec![Operation::add(GroupingRecord::new("B002", "G3", "", ""))]
        );

        let retry = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(retry, ApplyError::Blocked(ApplyState::Inconsistent));

        assert!(coordinator.acknowledge_inconsistency());
        assert_eq!(coordinator.state(), ApplyState::Idle);
        // Local edits were never touched
        assert_eq!(engine.current_change_set(), change_set);
    }

    #[tokio::test]
    async fn test_cancellation_completes_in_flight_write_then_rolls_back() {
        let (mut engine, model) = setup();
        engine
            .add(GroupingRecord::new("B002", "G3", "", ""))
            .unwrap();
        engine
            .add(GroupingRecord::new("C003", "G4", "", ""))
            .unwrap();
        engine.remove("A002").unwrap();

        let token = CancelToken::new();
        let writer = CancellingWriter {
            inner: &model,
            token: token.clone(),
            after: 2,
        };

        let coordinator = ApplyCoordinator::new();
        let change_set = engine.current_change_set();
        let err = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &writer,
                &token,
            )
            .await
            .unwrap_err();

        assert_eq!(err, ApplyError::Cancelled { reverted: 2 });
        assert_eq!(coordinator.state(), ApplyState::RolledBack);
        assert_eq!(model.rows(), seed());
        // Two forward writes, two inverses, the third operation never sent
        assert_eq!(model.received().len(), 4);
        assert!(engine.is_dirty());
    }

    #[tokio::test]
    async fn test_pre_cancelled_apply_writes_nothing() {
        let (mut engine, model) = setup();
        engine.remove("A001").unwrap();
        let token = CancelToken::new();
        token.cancel();

        let coordinator = ApplyCoordinator::new();
        let change_set = engine.current_change_set();
        let err = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &token,
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApplyError::Cancelled { reverted: 0 });
        assert!(model.received().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_or_stale_change_sets_are_refused() {
        let (mut engine, model) = setup();
        engine
            .set_field("A001", GroupField::ThirdGroup, "Deep")
            .unwrap();

        let coordinator = ApplyCoordinator::new();
        let change_set = engine.current_change_set();
        let err = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Validation(ref report) if report.error_count() == 1));
        assert_eq!(coordinator.state(), ApplyState::Idle);

        engine.undo();
        let err = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApplyError::StaleChangeSet);
        assert!(model.received().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_model_fails_rollback() {
        let (mut engine, model) = setup();
        engine
            .add(GroupingRecord::new("B002", "G3", "", ""))
            .unwrap();
        engine.remove("A002").unwrap();
        model.set_failure_plan(FailurePlan {
            fail_nth_write: Some(2),
            unavailable_after_failure: true,
            ..Default::default()
        });

        let coordinator = ApplyCoordinator::new();
        let mut states = coordinator.subscribe();
        let change_set = engine.current_change_set();
        let err = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        let ApplyError::Inconsistent(inconsistency) = err else {
            panic!("expected inconsistency");
        };
        assert!(matches!(
            inconsistency.rollback_failure.source,
            WriteError::Unavailable(_)
        ));
        assert_eq!(
            inconsistency.still_applied,
            vec![Operation::add(GroupingRecord::new("B002", "G3", "", ""))]
        );
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ApplyState::Inconsistent);
    }

    #[tokio::test]
    async fn test_empty_change_set_commits_without_writes() {
        let (mut engine, model) = setup();
        let coordinator = ApplyCoordinator::new();
        let change_set = engine.current_change_set();
        let report = coordinator
            .apply(
                &mut engine,
                &change_set,
                &ReferenceContext::unknown(),
                &model,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.applied, 0);
        assert!(model.received().is_empty());
    }
}
