//! Drive an [`Acquisition`] on the tokio runtime.
//!
//! The start sequence issues blocking device commands and may wait for the
//! probe request to drain, so it runs on the blocking pool. Ticks then run
//! on a single task at the engine's tick period until the acquisition tears
//! itself down.

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info_span, Instrument};

use crate::acquisition::{Acquisition, StopHandle};
use crate::controller::TickOutcome;
use crate::error::{Result, SlogicError};
use crate::session::SessionSummary;
use crate::sink::AcquisitionSink;
use crate::transfer::{AsyncBulkReader, RemoteControl};

/// Engine handed back once its task has ended.
#[derive(Debug)]
pub struct Finished<D, S> {
    /// The idle engine, with its device and sink
    pub acquisition: Acquisition<D, S>,
    /// Summary of the run, or why it could not start
    pub outcome: Result<SessionSummary>,
}

/// A running acquisition task.
#[derive(Debug)]
pub struct RunningAcquisition<D, S> {
    stop: StopHandle,
    task: JoinHandle<Result<Finished<D, S>>>,
}

impl<D, S> RunningAcquisition<D, S> {
    /// Request the acquisition to stop. Teardown completes on the next tick.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Cloneable stop handle.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task and take the engine back.
    pub async fn join(self) -> Result<Finished<D, S>> {
        self.task.await.map_err(|e| SlogicError::IoError {
            message: format!("Task join error: {}", e),
        })?
    }

    /// Wait for the task and return the run summary.
    pub async fn wait(self) -> Result<SessionSummary> {
        self.join().await?.outcome
    }
}

/// Start `acquisition` and tick it until it finishes.
pub fn spawn_acquisition<D, S>(acquisition: Acquisition<D, S>) -> RunningAcquisition<D, S>
where
    D: AsyncBulkReader + RemoteControl + Send + 'static,
    S: AcquisitionSink + Send + 'static,
{
    let stop = acquisition.stop_handle();
    let task = tokio::spawn(run(acquisition).instrument(info_span!("slogic_acquisition")));
    RunningAcquisition { stop, task }
}

async fn run<D, S>(acquisition: Acquisition<D, S>) -> Result<Finished<D, S>>
where
    D: AsyncBulkReader + RemoteControl + Send + 'static,
    S: AcquisitionSink + Send + 'static,
{
    let (mut acquisition, started) = tokio::task::spawn_blocking(move || {
        let mut acquisition = acquisition;
        let started = acquisition.start();
        (acquisition, started)
    })
    .await
    .map_err(|e| SlogicError::IoError {
        message: format!("Task join error: {}", e),
    })?;

    if let Err(e) = started {
        return Ok(Finished {
            acquisition,
            outcome: Err(e),
        });
    }

    let period = acquisition.tick_period();
    debug!(?period, "Ticking acquisition");
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match acquisition.tick() {
            TickOutcome::Continue => {}
            TickOutcome::Finished(summary) => {
                return Ok(Finished {
                    acquisition,
                    outcome: Ok(summary),
                });
            }
            TickOutcome::Idle => {
                return Ok(Finished {
                    acquisition,
                    outcome: Err(SlogicError::IoError {
                        message: "acquisition stopped without teardown".to_string(),
                    }),
                });
            }
        }
    }
}
