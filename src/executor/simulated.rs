// Scripted executor: walks a fixed list of progress steps on a tokio task.
// Used by the `genflow simulate` command and by tests.

use super::{
    BackgroundExecutor, CancelFlag, ExecutorError, ExecutorReport, ExecutorUpdate, ReportSender,
    RunTicket,
};
use crate::bridge::EventSink;
use crate::events::BridgeEvent;
use crate::models::{
    GenerationConfig, GenerationPhase, GenerationResult, GenerationStatus, JobIdentity, JobKind,
};
use crate::rate_limit::{DetectedAt, RateLimitOrigin, RateLimitType, RawRateLimitPayload};
use crate::utils::lock_mutex_recover;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// What a simulated run does
#[derive(Debug, Clone)]
pub struct SimulationScript {
    pub step_delay: Duration,
    /// Report this error instead of completing
    pub failure: Option<String>,
    /// Emit an SDK rate-limit detection right after this step index
    pub rate_limit_after: Option<usize>,
    /// Report one more progress step after noticing cancellation,
    /// like a real agent whose last write crosses the stop request
    pub report_after_cancel: bool,
}

impl Default for SimulationScript {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(50),
            failure: None,
            rate_limit_after: None,
            report_after_cancel: false,
        }
    }
}

impl SimulationScript {
    /// Progress steps for one run; competitor analysis adds a step for roadmaps
    pub fn steps(&self, kind: JobKind, config: &GenerationConfig) -> Vec<GenerationStatus> {
        use GenerationPhase::*;

        let mut steps = vec![GenerationStatus::in_phase(
            Analyzing,
            20,
            "Discovering project context...",
        )];
        if kind == JobKind::Roadmap && config.competitor_analysis {
            steps.push(GenerationStatus::in_phase(
                Analyzing,
                35,
                "Running competitor analysis...",
            ));
        }
        let subject = match kind {
            JobKind::Roadmap => "roadmap features",
            JobKind::Ideation => "ideas",
        };
        steps.push(GenerationStatus::in_phase(
            Generating,
            50,
            format!("Generating {}...", subject),
        ));
        steps.push(GenerationStatus::in_phase(
            Generating,
            80,
            format!("Prioritizing {}...", subject),
        ));
        steps
    }
}

type RunningJobs = Arc<Mutex<HashMap<JobIdentity, (Uuid, CancelFlag)>>>;

pub struct SimulatedExecutor {
    reports: ReportSender,
    script: SimulationScript,
    rate_limits: Option<Arc<dyn EventSink>>,
    running: RunningJobs,
    available: Arc<AtomicBool>,
}

impl SimulatedExecutor {
    pub fn new(reports: ReportSender) -> Self {
        Self {
            reports,
            script: SimulationScript::default(),
            rate_limits: None,
            running: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_script(mut self, script: SimulationScript) -> Self {
        self.script = script;
        self
    }

    /// Where rate-limit detections go; they bypass the controller entirely
    pub fn with_rate_limit_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.rate_limits = Some(sink);
        self
    }

    /// Simulate the process boundary going away
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn running_count(&self) -> usize {
        lock_mutex_recover(&self.running).len()
    }

    fn check_available(&self) -> Result<(), ExecutorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExecutorError::Unavailable(
                "simulated executor is offline".to_string(),
            ))
        }
    }
}

impl BackgroundExecutor for SimulatedExecutor {
    async fn start_job(
        &self,
        ticket: RunTicket,
        project_path: &str,
        config: &GenerationConfig,
        is_refresh: bool,
    ) -> Result<(), ExecutorError> {
        self.check_available()?;

        let flag = CancelFlag::new();
        {
            let mut running = lock_mutex_recover(&self.running);
            if let Some((_, previous)) =
                running.insert(ticket.identity.clone(), (ticket.run_id, flag.clone()))
            {
                previous.cancel();
            }
        }

        log::debug!(
            "[SimulatedExecutor] Starting {} run {} (refresh: {})",
            ticket.identity,
            ticket.run_id,
            is_refresh
        );

        let run = SimulatedRun {
            steps: self.script.steps(ticket.identity.kind, config),
            result: GenerationResult {
                kind: ticket.identity.kind,
                document: serde_json::json!({
                    "projectPath": project_path,
                    "competitorAnalysis": config.competitor_analysis,
                    "refresh": is_refresh,
                    "items": [],
                }),
            },
            ticket,
            flag,
            script: self.script.clone(),
            reports: self.reports.clone(),
            rate_limits: self.rate_limits.clone(),
            running: self.running.clone(),
        };
        tokio::spawn(run.execute());
        Ok(())
    }

    async fn stop_job(&self, identity: &JobIdentity) -> Result<bool, ExecutorError> {
        self.check_available()?;

        match lock_mutex_recover(&self.running).remove(identity) {
            Some((run_id, flag)) => {
                log::debug!("[SimulatedExecutor] Cancelling {} run {}", identity, run_id);
                flag.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

struct SimulatedRun {
    ticket: RunTicket,
    steps: Vec<GenerationStatus>,
    result: GenerationResult,
    flag: CancelFlag,
    script: SimulationScript,
    reports: ReportSender,
    rate_limits: Option<Arc<dyn EventSink>>,
    running: RunningJobs,
}

impl SimulatedRun {
    async fn execute(self) {
        for (index, step) in self.steps.iter().enumerate() {
            tokio::time::sleep(self.script.step_delay).await;

            if self.flag.is_cancelled() {
                if self.script.report_after_cancel {
                    self.report(ExecutorReport::Progress(step.clone()));
                }
                return self.finish();
            }
            if !self.report(ExecutorReport::Progress(step.clone())) {
                return self.finish();
            }
            if self.script.rate_limit_after == Some(index) {
                self.report_rate_limit();
            }
        }

        tokio::time::sleep(self.script.step_delay).await;
        // Deregister before the terminal report so a stop after it finds nothing
        self.finish();
        if !self.flag.is_cancelled() {
            let outcome = match &self.script.failure {
                Some(error) => ExecutorReport::Error(error.clone()),
                None => ExecutorReport::Complete(self.result.clone()),
            };
            self.report(outcome);
        }
    }

    /// False once nobody is listening
    fn report(&self, report: ExecutorReport) -> bool {
        self.reports
            .send(ExecutorUpdate {
                ticket: self.ticket.clone(),
                report,
            })
            .is_ok()
    }

    fn report_rate_limit(&self) {
        let Some(sink) = &self.rate_limits else {
            return;
        };
        sink.emit(BridgeEvent::RateLimit {
            origin: RateLimitOrigin::Sdk,
            payload: RawRateLimitPayload {
                project_id: Some(self.ticket.identity.project_id.clone()),
                source_id: format!("{}#{}", self.ticket.identity, self.ticket.run_id),
                profile_id: None,
                limit_type: Some(RateLimitType::ClaudeRateLimit),
                reset_time: None,
                retry_after_ms: Some(60_000),
                matched_pattern: None,
                detected_at: DetectedAt::Text(Utc::now().to_rfc3339()),
            },
        });
    }

    fn finish(&self) {
        let mut running = lock_mutex_recover(&self.running);
        let is_current = running
            .get(&self.ticket.identity)
            .is_some_and(|(run_id, _)| *run_id == self.ticket.run_id);
        if is_current {
            running.remove(&self.ticket.identity);
        }
    }
}
