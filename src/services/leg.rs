//! The contract every upload leg implements and the runner that enforces it
//!
//! A leg body only returns a `Result`. The runner turns every outcome into exactly
//! one terminal event: success, error, panic, or the unit being aborted.

use crate::model::error::{LegError, LegFailure, LegResult};
use crate::model::events::{LegEnvelope, LegEvent};
use crate::model::leg::{LegId, LegPayload};
use crate::model::task_id::TaskId;
use crate::services::worker_pool::ShutdownSignal;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc::UnboundedSender;

/// One backend-specific upload of a model package
///
/// `upload` consumes the leg, so a leg can run at most once.
#[async_trait]
pub trait UploadLeg: Send {
    fn id(&self) -> &LegId;

    fn task_id(&self) -> TaskId;

    async fn upload(self: Box<Self>, reporter: &LegReporter) -> LegResult<LegPayload>;
}

/// Event sink handed to a running leg
///
/// Dropping a reporter that never finished emits a crash failure, so an aborted
/// or panicking leg still produces its terminal event. The exception is a leg
/// torn down by a pool shutdown: it stays silent and the task stays unfinished.
pub struct LegReporter {
    task_id: TaskId,
    leg: LegId,
    tx: UnboundedSender<LegEnvelope>,
    shutdown: ShutdownSignal,
    finished: bool,
}

impl LegReporter {
    pub fn new(task_id: TaskId, leg: LegId, tx: UnboundedSender<LegEnvelope>) -> Self {
        LegReporter {
            task_id,
            leg,
            tx,
            shutdown: ShutdownSignal::default(),
            finished: false,
        }
    }

    /// Stay silent on drop once `signal` is raised
    pub fn watching(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    pub fn leg(&self) -> &LegId {
        &self.leg
    }

    /// Report leg-local progress in percent
    pub fn progress(&self, percent: f64, message: impl Into<String>) {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        self.send(LegEvent::Progress {
            percent,
            message: message.into(),
        });
    }

    /// Report the terminal outcome; consumes the reporter
    pub fn finish(mut self, outcome: LegResult<LegPayload>) {
        self.finished = true;
        let event = match outcome {
            Ok(payload) => LegEvent::Succeeded(payload),
            Err(error) => {
                tracing::warn!("leg {} of task {} failed: {}", self.leg, self.task_id, error);
                LegEvent::Failed(LegFailure::new(self.task_id, self.leg.clone(), error))
            }
        };
        self.send(event);
    }

    fn send(&self, event: LegEvent) {
        let envelope = LegEnvelope {
            task_id: self.task_id,
            leg: self.leg.clone(),
            event,
        };
        // The aggregator stops listening once the task is decided.
        if self.tx.send(envelope).is_err() {
            tracing::trace!("aggregator for {} is gone, dropping event from {}", self.task_id, self.leg);
        }
    }
}

impl Drop for LegReporter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.shutdown.is_raised() {
            tracing::debug!("leg {} of task {} aborted by shutdown", self.leg, self.task_id);
        } else {
            self.send(LegEvent::Failed(LegFailure::new(
                self.task_id,
                self.leg.clone(),
                LegError::Crashed("upload stopped before reporting a result".to_string()),
            )));
        }
    }
}

/// Run a leg to completion and emit its terminal event
pub async fn run_leg(leg: Box<dyn UploadLeg>, reporter: LegReporter) {
    let leg_id = leg.id().clone();
    tracing::debug!("leg {} starting", leg_id);
    let outcome = AssertUnwindSafe(leg.upload(&reporter)).catch_unwind().await;
    let outcome = match outcome {
        Ok(result) => result,
        Err(panic) => Err(LegError::Crashed(panic_message(panic.as_ref()))),
    };
    tracing::debug!("leg {} done, success: {}", leg_id, outcome.is_ok());
    reporter.finish(outcome);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
