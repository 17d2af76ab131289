//! Upload waiter: fans one task out into legs and joins their outcomes
//!
//! All leg events of a task go through one unbounded queue into a single loop,
//! which is the only code touching the task's bookkeeping. Observers see the
//! result through the broadcast channel the waiter publishes to.

use crate::model::events::{LegEnvelope, LegEvent, TaskEvent};
use crate::model::leg::{CombinedResult, LegId};
use crate::model::task_id::TaskId;
use crate::services::leg::{run_leg, LegReporter, UploadLeg};
use crate::services::task_registry::UnitId;
use crate::services::worker_pool::WorkerPool;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Lifecycle of one waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterPhase {
    /// Legs are being registered
    Idle,
    /// Legs started, join not reached
    Running,
    /// Every leg succeeded
    Succeeded,
    /// A leg failed
    Failed,
    /// Terminal event and finished signal emitted
    Finished,
}

/// Per-task bookkeeping, mutated only by the waiter loop
#[derive(Debug)]
pub struct Aggregation {
    task_id: TaskId,
    phase: WaiterPhase,
    registered: BTreeSet<LegId>,
    /// Latest leg-local progress of every leg that reported at least once
    progress: BTreeMap<LegId, f64>,
    /// Legs that already delivered their terminal event
    terminated: BTreeSet<LegId>,
    results: CombinedResult,
    remaining: usize,
    outcome: Option<WaiterPhase>,
}

impl Aggregation {
    pub fn new(task_id: TaskId) -> Self {
        Aggregation {
            task_id,
            phase: WaiterPhase::Idle,
            registered: BTreeSet::new(),
            progress: BTreeMap::new(),
            terminated: BTreeSet::new(),
            results: CombinedResult::new(),
            remaining: 0,
            outcome: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn phase(&self) -> WaiterPhase {
        self.phase
    }

    /// Legs whose terminal event is still outstanding
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// How the task ended, once it has
    pub fn outcome(&self) -> Option<WaiterPhase> {
        self.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.phase == WaiterPhase::Finished
    }

    /// Add a leg before the task starts
    ///
    /// # Panics
    /// On a task id mismatch, a duplicate leg id or a registration after start.
    pub fn register(&mut self, leg: &LegId, leg_task: TaskId) {
        assert_eq!(
            leg_task, self.task_id,
            "leg {} belongs to task {}, not to task {}",
            leg, leg_task, self.task_id
        );
        assert_eq!(
            self.phase,
            WaiterPhase::Idle,
            "leg {} registered after task {} started",
            leg,
            self.task_id
        );
        assert!(
            self.registered.insert(leg.clone()),
            "leg {} registered twice for task {}",
            leg,
            self.task_id
        );
        self.remaining += 1;
    }

    /// Close registration
    ///
    /// # Panics
    /// When no leg was registered.
    pub fn begin(&mut self) {
        assert!(
            !self.registered.is_empty(),
            "task {} started without any leg",
            self.task_id
        );
        assert_eq!(self.phase, WaiterPhase::Idle, "task {} started twice", self.task_id);
        self.phase = WaiterPhase::Running;
    }

    /// Apply one leg event, returning what observers must be told
    pub fn apply(&mut self, envelope: LegEnvelope) -> Vec<TaskEvent> {
        let LegEnvelope { task_id, leg, event } = envelope;
        if task_id != self.task_id || !self.registered.contains(&leg) {
            tracing::warn!(
                "task {} ignoring event from unknown leg {} of task {}",
                self.task_id,
                leg,
                task_id
            );
            return Vec::new();
        }

        match event {
            LegEvent::Progress { percent, message } => self.on_progress(leg, percent, message),
            LegEvent::Succeeded(_) | LegEvent::Failed(_) if !self.terminated.insert(leg.clone()) => {
                tracing::warn!("task {}: second terminal event from {} ignored", self.task_id, leg);
                Vec::new()
            }
            LegEvent::Succeeded(payload) => {
                if self.phase != WaiterPhase::Running {
                    tracing::debug!("task {}: late result from {} dropped", self.task_id, leg);
                    return Vec::new();
                }
                tracing::info!("task {}: {} finished uploading", self.task_id, leg);
                self.results.insert(leg, payload);
                self.remaining = self
                    .remaining
                    .checked_sub(1)
                    .expect("join counter went below zero");
                if self.remaining > 0 {
                    tracing::debug!("task {}: waiting for {} more legs", self.task_id, self.remaining);
                    return Vec::new();
                }
                self.phase = WaiterPhase::Succeeded;
                let results = std::mem::take(&mut self.results);
                self.finish(TaskEvent::Uploaded {
                    task_id: self.task_id,
                    results,
                })
            }
            LegEvent::Failed(failure) => {
                if self.phase != WaiterPhase::Running {
                    tracing::debug!("task {}: late failure from {} dropped", self.task_id, leg);
                    return Vec::new();
                }
                tracing::error!("task {}: {}", self.task_id, failure);
                self.remaining = self.remaining.saturating_sub(1);
                self.phase = WaiterPhase::Failed;
                self.finish(TaskEvent::Failed {
                    task_id: self.task_id,
                    failure,
                })
            }
        }
    }

    fn on_progress(&mut self, leg: LegId, percent: f64, message: String) -> Vec<TaskEvent> {
        self.progress.insert(leg, percent.clamp(0.0, 100.0));
        if self.phase != WaiterPhase::Running {
            return Vec::new();
        }
        vec![TaskEvent::Progress {
            task_id: self.task_id,
            percent: self.combined_progress(),
            message,
        }]
    }

    /// Mean of the latest progress of every leg that reported, rounded up
    ///
    /// Legs that have not reported yet are left out of the mean entirely.
    pub fn combined_progress(&self) -> u8 {
        combined_progress(self.progress.values().copied())
    }

    fn finish(&mut self, terminal: TaskEvent) -> Vec<TaskEvent> {
        self.outcome = Some(self.phase);
        self.phase = WaiterPhase::Finished;
        vec![
            terminal,
            TaskEvent::Finished {
                task_id: self.task_id,
            },
        ]
    }
}

/// `ceil(mean(values))` clamped to 0-100; 0 for no values
pub fn combined_progress(values: impl IntoIterator<Item = f64>) -> u8 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return 0;
    }
    let mean = sum / count as f64;
    // Float noise such as 50.000000001 must not round up to 51.
    (mean - 1e-9).ceil().clamp(0.0, 100.0) as u8
}

/// A task's legs before they run
pub struct UploadWaiter {
    aggregation: Aggregation,
    legs: Vec<Box<dyn UploadLeg>>,
    events: broadcast::Sender<TaskEvent>,
    outcome_tx: Option<oneshot::Sender<TaskEvent>>,
    cancel_siblings_on_failure: bool,
}

/// Units started for one task
#[derive(Debug, Clone)]
pub struct WaiterHandle {
    pub task_id: TaskId,
    pub waiter_unit: UnitId,
    pub leg_units: Vec<UnitId>,
}

impl UploadWaiter {
    pub fn new(task_id: TaskId, events: broadcast::Sender<TaskEvent>) -> Self {
        UploadWaiter {
            aggregation: Aggregation::new(task_id),
            legs: Vec::new(),
            events,
            outcome_tx: None,
            cancel_siblings_on_failure: false,
        }
    }

    /// Receive the task's terminal event (`Uploaded` or `Failed`) directly
    ///
    /// Unlike a broadcast subscription this cannot lag behind. Only the most
    /// recently requested receiver is served.
    pub fn terminal_outcome(&mut self) -> oneshot::Receiver<TaskEvent> {
        let (tx, rx) = oneshot::channel();
        self.outcome_tx = Some(tx);
        rx
    }

    /// Abort the other legs as soon as one fails
    pub fn cancel_siblings_on_failure(mut self, enabled: bool) -> Self {
        self.cancel_siblings_on_failure = enabled;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.aggregation.task_id()
    }

    /// Attach a leg
    ///
    /// # Panics
    /// If the leg belongs to another task or its id is already registered.
    pub fn register(&mut self, leg: Box<dyn UploadLeg>) {
        self.aggregation.register(leg.id(), leg.task_id());
        tracing::debug!("task {}: registered leg {}", self.task_id(), leg.id());
        self.legs.push(leg);
    }

    /// Start every leg on the pool and the join loop on its own unit
    ///
    /// # Panics
    /// When no leg was registered.
    pub async fn start(self, pool: &WorkerPool) -> WaiterHandle {
        let UploadWaiter {
            mut aggregation,
            legs,
            events,
            mut outcome_tx,
            cancel_siblings_on_failure,
        } = self;
        let task_id = aggregation.task_id();
        aggregation.begin();

        let (tx, mut rx) = mpsc::unbounded_channel::<LegEnvelope>();
        let mut leg_units = Vec::with_capacity(legs.len());
        for leg in legs {
            let reporter = LegReporter::new(task_id, leg.id().clone(), tx.clone())
                .watching(pool.shutdown_signal());
            let name = format!("{}/{}", task_id, leg.id());
            leg_units.push(pool.spawn(name, run_leg(leg, reporter)).await);
        }
        drop(tx);

        let loop_pool = pool.clone();
        let siblings = leg_units.clone();
        let waiter_unit = pool
            .spawn_unbounded(format!("{}/waiter", task_id), async move {
                while let Some(envelope) = rx.recv().await {
                    for event in aggregation.apply(envelope) {
                        if matches!(event, TaskEvent::Uploaded { .. } | TaskEvent::Failed { .. }) {
                            if let Some(tx) = outcome_tx.take() {
                                let _ = tx.send(event.clone());
                            }
                        }
                        // No subscribers is fine; the event simply has no audience.
                        let _ = events.send(event);
                    }
                    if aggregation.is_finished() {
                        break;
                    }
                }

                match aggregation.outcome() {
                    Some(WaiterPhase::Failed) if cancel_siblings_on_failure => {
                        for unit in siblings {
                            loop_pool.cancel(unit).await;
                        }
                    }
                    Some(_) => {}
                    None if loop_pool.is_shutting_down() => {
                        tracing::info!("task {}: stopped by shutdown", task_id)
                    }
                    None => tracing::error!("task {}: every leg left without a result", task_id),
                }
                tracing::debug!("task {}: waiter finished", task_id);
            })
            .await;

        WaiterHandle {
            task_id,
            waiter_unit,
            leg_units,
        }
    }
}
