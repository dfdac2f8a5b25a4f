//! Background executor collaborator.
//!
//! The executor runs the actual generation work and reports back over an
//! unbounded channel of [`ExecutorUpdate`]s tagged with the [`RunTicket`] it
//! was started with. Cancellation is cooperative: `stop_job` only raises a
//! [`CancelFlag`], the running task decides when to stop reporting.

mod simulated;

pub use simulated::{SimulatedExecutor, SimulationScript};

use crate::models::{GenerationConfig, GenerationResult, GenerationStatus, JobIdentity};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The process boundary is gone; no command or event can cross it
    #[error("Background executor unavailable: {0}")]
    Unavailable(String),

    /// The executor refused this particular job
    #[error("Background executor rejected the job: {0}")]
    Rejected(String),
}

/// Identifies one run of one job; reports from any other run are stale
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunTicket {
    pub identity: JobIdentity,
    pub run_id: Uuid,
}

impl RunTicket {
    pub fn new(identity: JobIdentity) -> Self {
        Self {
            identity,
            run_id: Uuid::new_v4(),
        }
    }
}

/// What a running job reports
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorReport {
    Progress(GenerationStatus),
    Complete(GenerationResult),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorUpdate {
    pub ticket: RunTicket,
    pub report: ExecutorReport,
}

pub type ReportSender = mpsc::UnboundedSender<ExecutorUpdate>;
pub type ReportReceiver = mpsc::UnboundedReceiver<ExecutorUpdate>;

pub fn report_channel() -> (ReportSender, ReportReceiver) {
    mpsc::unbounded_channel()
}

/// The long-running task runner on the far side of the process boundary
pub trait BackgroundExecutor: Send + Sync + 'static {
    /// Hand a run over. Returns once the executor has accepted it; progress
    /// arrives later as [`ExecutorUpdate`]s carrying `ticket`.
    fn start_job(
        &self,
        ticket: RunTicket,
        project_path: &str,
        config: &GenerationConfig,
        is_refresh: bool,
    ) -> impl Future<Output = Result<(), ExecutorError>> + Send;

    /// Request cancellation of the live task for `identity`.
    /// Ok(false) means there was no task to cancel.
    fn stop_job(
        &self,
        identity: &JobIdentity,
    ) -> impl Future<Output = Result<bool, ExecutorError>> + Send;
}

/// Cooperative cancellation flag shared between a job and whoever may stop it
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
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
