//! Job controller: owns the canonical status of every (project, kind) job,
//! drives the background executor, and publishes lifecycle events.
//!
//! Canonical status changes only here. Subscribers get clones through the
//! [`EventSink`] and can never touch it.
//!
//! Events published per run:
//! - one synthetic `progress` (analyzing) when the run is handed to the executor
//! - `progress` for every accepted executor report
//! - exactly one of `complete`, `error` or `stopped` to end it
//!
//! A superseded run ends silently; its late reports are discarded as stale.

#[cfg(test)]
mod tests;

use crate::bridge::EventSink;
use crate::events::BridgeEvent;
use crate::executor::{
    BackgroundExecutor, ExecutorError, ExecutorReport, ExecutorUpdate, ReportReceiver, RunTicket,
};
use crate::models::state_machine::{can_transition, is_active_phase, transition_phase};
use crate::models::{GenerationConfig, GenerationPhase, GenerationStatus, JobIdentity};
use crate::projects::ProjectResolver;
use crate::utils::lock_mutex_recover;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Progress of the synthetic status emitted on start/refresh
pub const DEFAULT_INITIAL_PROGRESS: u8 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    /// The process boundary is gone; no event could report the outcome
    #[error("Background executor unavailable: {0}")]
    BoundaryUnavailable(String),
}

#[derive(Debug, Default)]
struct JobSlot {
    status: GenerationStatus,
    /// Run the executor is working on, if any
    live_run: Option<Uuid>,
}

pub struct JobController<R, E> {
    resolver: Arc<R>,
    executor: Arc<E>,
    sink: Arc<dyn EventSink>,
    jobs: Mutex<HashMap<JobIdentity, JobSlot>>,
    initial_progress: u8,
}

impl<R: ProjectResolver, E: BackgroundExecutor> JobController<R, E> {
    pub fn new(resolver: Arc<R>, executor: Arc<E>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            resolver,
            executor,
            sink,
            jobs: Mutex::new(HashMap::new()),
            initial_progress: DEFAULT_INITIAL_PROGRESS,
        }
    }

    /// Clamped to 1..=99 so the synthetic status always shows movement
    pub fn with_initial_progress(mut self, progress: u8) -> Self {
        self.initial_progress = progress.clamp(1, 99);
        self
    }

    /// Start a generation. Outcomes arrive as events; only a missing
    /// process boundary is returned as an error.
    pub async fn start(
        &self,
        identity: JobIdentity,
        config: GenerationConfig,
    ) -> Result<(), ControllerError> {
        self.launch(identity, config, false).await
    }

    /// Same as [`JobController::start`], flagged as a refresh for the executor
    pub async fn refresh(
        &self,
        identity: JobIdentity,
        config: GenerationConfig,
    ) -> Result<(), ControllerError> {
        self.launch(identity, config, true).await
    }

    async fn launch(
        &self,
        identity: JobIdentity,
        mut config: GenerationConfig,
        is_refresh: bool,
    ) -> Result<(), ControllerError> {
        config.refresh = is_refresh;
        log::info!(
            "[JobController] {} {} (features: {:?})",
            if is_refresh { "Refreshing" } else { "Starting" },
            identity,
            config.enabled_features(identity.kind)
        );

        self.supersede(&identity).await?;

        let Some(project) = self.resolver.lookup(&identity.project_id) else {
            let error = format!("Project not found: {}", identity.project_id);
            log::warn!("[JobController] {}", error);
            self.fail(&identity, None, error);
            return Ok(());
        };

        let ticket = RunTicket::new(identity.clone());
        let status = GenerationStatus::in_phase(
            GenerationPhase::Analyzing,
            self.initial_progress,
            identity.kind.started_message(is_refresh),
        );
        {
            let mut jobs = lock_mutex_recover(&self.jobs);
            let slot = jobs.entry(identity.clone()).or_default();
            slot.status = status.clone();
            slot.live_run = Some(ticket.run_id);
        }
        self.sink.emit(BridgeEvent::Progress {
            identity: identity.clone(),
            status,
        });

        let run_id = ticket.run_id;
        match self
            .executor
            .start_job(ticket, &project.path, &config, is_refresh)
            .await
        {
            Ok(()) => Ok(()),
            Err(ExecutorError::Rejected(error)) => {
                self.fail(&identity, Some(run_id), error);
                Ok(())
            }
            Err(ExecutorError::Unavailable(reason)) => {
                log::warn!(
                    "[JobController] Could not hand {} to the executor: {}",
                    identity,
                    reason
                );
                let reset = {
                    let mut jobs = lock_mutex_recover(&self.jobs);
                    match jobs.get_mut(&identity) {
                        Some(slot) if slot.live_run == Some(run_id) => {
                            *slot = JobSlot::default();
                            true
                        }
                        _ => false,
                    }
                };
                // Subscribers already saw the synthetic status; bring them back to idle
                if reset {
                    self.sink.emit(BridgeEvent::Stopped {
                        identity: identity.clone(),
                    });
                }
                Err(ControllerError::BoundaryUnavailable(reason))
            }
        }
    }

    /// Cancel a live run before a new start and return the job to idle, without an event
    async fn supersede(&self, identity: &JobIdentity) -> Result<(), ControllerError> {
        let previous = {
            let mut jobs = lock_mutex_recover(&self.jobs);
            jobs.get_mut(identity).and_then(|slot| {
                slot.status = GenerationStatus::idle();
                slot.live_run.take()
            })
        };

        if let Some(run_id) = previous {
            log::info!("[JobController] Superseding {} run {}", identity, run_id);
            match self.executor.stop_job(identity).await {
                Ok(_) => {}
                Err(ExecutorError::Unavailable(reason)) => {
                    return Err(ControllerError::BoundaryUnavailable(reason));
                }
                Err(e) => log::warn!("[JobController] Could not cancel {}: {}", identity, e),
            }
        }
        Ok(())
    }

    /// Request cancellation of the live run.
    ///
    /// Returns whether a live run existed and the executor accepted the
    /// request; in that case exactly one `stopped` event is emitted and the
    /// job is back to idle. Cancellation itself completes asynchronously.
    pub async fn stop(&self, identity: &JobIdentity) -> Result<bool, ControllerError> {
        let live_run = lock_mutex_recover(&self.jobs)
            .get(identity)
            .and_then(|slot| slot.live_run);

        let Some(run_id) = live_run else {
            log::debug!("[JobController] Stop for {}: nothing running", identity);
            return Ok(false);
        };

        log::info!("[JobController] Stopping {} run {}", identity, run_id);
        let accepted = match self.executor.stop_job(identity).await {
            Ok(accepted) => accepted,
            Err(ExecutorError::Unavailable(reason)) => {
                return Err(ControllerError::BoundaryUnavailable(reason));
            }
            Err(e) => {
                log::warn!("[JobController] Stop for {} rejected: {}", identity, e);
                false
            }
        };
        if !accepted {
            log::debug!(
                "[JobController] Executor had no task for {}; its final report is in flight",
                identity
            );
            return Ok(false);
        }

        {
            let mut jobs = lock_mutex_recover(&self.jobs);
            let Some(slot) = jobs.get_mut(identity) else {
                return Ok(false);
            };
            // Finished or superseded while the stop was crossing the boundary
            if slot.live_run != Some(run_id) {
                return Ok(false);
            }
            *slot = JobSlot::default();
        }

        self.sink.emit(BridgeEvent::Stopped {
            identity: identity.clone(),
        });
        Ok(true)
    }

    /// Copy of the canonical status (idle if the job was never started)
    pub fn status(&self, identity: &JobIdentity) -> GenerationStatus {
        lock_mutex_recover(&self.jobs)
            .get(identity)
            .map(|slot| slot.status.clone())
            .unwrap_or_default()
    }

    pub fn is_running(&self, identity: &JobIdentity) -> bool {
        lock_mutex_recover(&self.jobs)
            .get(identity)
            .is_some_and(|slot| slot.live_run.is_some())
    }

    /// Apply one executor report. Returns false when it was discarded as stale
    /// or as an illegal transition.
    pub fn ingest(&self, update: ExecutorUpdate) -> bool {
        let ExecutorUpdate { ticket, report } = update;
        let identity = ticket.identity;

        let event = {
            let mut jobs = lock_mutex_recover(&self.jobs);
            let Some(slot) = jobs
                .get_mut(&identity)
                .filter(|slot| slot.live_run == Some(ticket.run_id))
            else {
                log::debug!(
                    "[JobController] Discarding stale report for {} run {}",
                    identity,
                    ticket.run_id
                );
                return false;
            };

            match report {
                ExecutorReport::Progress(status) if status.phase == GenerationPhase::Error => {
                    let error = status.error.unwrap_or(status.message);
                    Self::terminate_with_error(slot, &identity, error)
                }
                ExecutorReport::Progress(reported) => {
                    if !is_active_phase(reported.phase) {
                        log::warn!(
                            "[JobController] Ignoring {:?} progress report for {}",
                            reported.phase,
                            identity
                        );
                        return false;
                    }
                    if let Err(e) = transition_phase(slot.status.phase, reported.phase) {
                        log::warn!("[JobController] Ignoring progress for {}: {}", identity, e);
                        return false;
                    }
                    // Canonical form: no error outside the error phase, progress capped at 100
                    let mut status = GenerationStatus::in_phase(
                        reported.phase,
                        reported.progress,
                        reported.message,
                    );
                    if status.progress < slot.status.progress {
                        log::debug!(
                            "[JobController] Holding {} progress at {} (reported {})",
                            identity,
                            slot.status.progress,
                            status.progress
                        );
                        status.progress = slot.status.progress;
                    }
                    slot.status = status.clone();
                    BridgeEvent::Progress {
                        identity: identity.clone(),
                        status,
                    }
                }
                ExecutorReport::Complete(result) => {
                    if !can_transition(slot.status.phase, GenerationPhase::Complete) {
                        log::warn!(
                            "[JobController] Ignoring completion of {} from {:?}",
                            identity,
                            slot.status.phase
                        );
                        return false;
                    }
                    slot.status = GenerationStatus::complete();
                    slot.live_run = None;
                    BridgeEvent::Complete {
                        identity: identity.clone(),
                        result: Arc::new(result),
                    }
                }
                ExecutorReport::Error(error) => Self::terminate_with_error(slot, &identity, error),
            }
        };

        self.sink.emit(event);
        true
    }

    fn terminate_with_error(
        slot: &mut JobSlot,
        identity: &JobIdentity,
        error: String,
    ) -> BridgeEvent {
        log::warn!("[JobController] {} failed: {}", identity, error);
        slot.status = GenerationStatus::failed(slot.status.progress, error.clone());
        slot.live_run = None;
        BridgeEvent::Error {
            identity: identity.clone(),
            error,
        }
    }

    /// Move a job to error and publish it. With `run_id`, only if that run is still live.
    fn fail(&self, identity: &JobIdentity, run_id: Option<Uuid>, error: String) {
        let event = {
            let mut jobs = lock_mutex_recover(&self.jobs);
            let slot = jobs.entry(identity.clone()).or_default();
            if run_id.is_some() && slot.live_run != run_id {
                return;
            }
            Self::terminate_with_error(slot, identity, error)
        };
        self.sink.emit(event);
    }

    /// Feed executor reports into `ingest` until the executor side hangs up
    pub async fn run_report_loop(self: Arc<Self>, mut reports: ReportReceiver) {
        while let Some(update) = reports.recv().await {
            self.ingest(update);
        }
        log::debug!("[JobController] Report channel closed");
    }
}
