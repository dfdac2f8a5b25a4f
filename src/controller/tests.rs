//! Tests for JobController
//!
//! Reports are fed through `ingest` directly so ordering is deterministic.

#[cfg(test)]
mod tests {
    use crate::bridge::EventSink;
    use crate::controller::{ControllerError, JobController};
    use crate::events::BridgeEvent;
    use crate::executor::{
        BackgroundExecutor, ExecutorError, ExecutorReport, ExecutorUpdate, RunTicket,
    };
    use crate::models::{
        GenerationConfig, GenerationPhase, GenerationResult, GenerationStatus, JobIdentity,
        JobKind, Project,
    };
    use crate::projects::InMemoryProjectResolver;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<BridgeEvent>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<BridgeEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: BridgeEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    /// Executor that only records what it was asked to do
    #[derive(Default)]
    struct FakeExecutor {
        started: Mutex<Vec<(RunTicket, bool)>>,
        stopped: Mutex<Vec<JobIdentity>>,
        start_error: Mutex<Option<ExecutorError>>,
        stop_result: Mutex<Option<Result<bool, ExecutorError>>>,
    }

    impl FakeExecutor {
        fn last_ticket(&self) -> RunTicket {
            self.started.lock().unwrap().last().unwrap().0.clone()
        }

        fn fail_start_with(&self, error: ExecutorError) {
            *self.start_error.lock().unwrap() = Some(error);
        }

        fn answer_stop_with(&self, result: Result<bool, ExecutorError>) {
            *self.stop_result.lock().unwrap() = Some(result);
        }
    }

    impl BackgroundExecutor for FakeExecutor {
        async fn start_job(
            &self,
            ticket: RunTicket,
            _project_path: &str,
            _config: &GenerationConfig,
            is_refresh: bool,
        ) -> Result<(), ExecutorError> {
            if let Some(error) = self.start_error.lock().unwrap().clone() {
                return Err(error);
            }
            self.started.lock().unwrap().push((ticket, is_refresh));
            Ok(())
        }

        async fn stop_job(&self, identity: &JobIdentity) -> Result<bool, ExecutorError> {
            self.stopped.lock().unwrap().push(identity.clone());
            self.stop_result.lock().unwrap().clone().unwrap_or(Ok(true))
        }
    }

    struct Harness {
        controller: JobController<InMemoryProjectResolver, FakeExecutor>,
        executor: Arc<FakeExecutor>,
        sink: Arc<RecordingSink>,
    }

    fn setup() -> Harness {
        let resolver = InMemoryProjectResolver::new();
        for id in ["p1", "a", "b"] {
            resolver.add(Project {
                id: id.to_string(),
                name: id.to_uppercase(),
                path: format!("/work/{}", id),
            });
        }
        let executor = Arc::new(FakeExecutor::default());
        let sink = Arc::new(RecordingSink::default());
        let controller = JobController::new(Arc::new(resolver), executor.clone(), sink.clone());
        Harness {
            controller,
            executor,
            sink,
        }
    }

    fn progress(ticket: &RunTicket, phase: GenerationPhase, value: u8) -> ExecutorUpdate {
        ExecutorUpdate {
            ticket: ticket.clone(),
            report: ExecutorReport::Progress(GenerationStatus::in_phase(phase, value, "working")),
        }
    }

    fn complete(ticket: &RunTicket) -> ExecutorUpdate {
        ExecutorUpdate {
            ticket: ticket.clone(),
            report: ExecutorReport::Complete(GenerationResult {
                kind: ticket.identity.kind,
                document: serde_json::json!({ "features": ["search"] }),
            }),
        }
    }

    /// Drive a run through generating to complete
    fn finish(
        controller: &JobController<InMemoryProjectResolver, FakeExecutor>,
        ticket: &RunTicket,
    ) {
        assert!(controller.ingest(progress(ticket, GenerationPhase::Generating, 60)));
        assert!(controller.ingest(complete(ticket)));
    }

    #[tokio::test]
    async fn test_start_emits_synthetic_analyzing_status() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");

        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();

        let expected = GenerationStatus::in_phase(
            GenerationPhase::Analyzing,
            10,
            "Analyzing project structure...",
        );
        assert_eq!(
            h.sink.take(),
            vec![BridgeEvent::Progress {
                identity: identity.clone(),
                status: expected.clone(),
            }]
        );
        assert_eq!(h.controller.status(&identity), expected);
        assert!(h.controller.is_running(&identity));
    }

    #[tokio::test]
    async fn test_full_run_to_complete() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket = h.executor.last_ticket();
        h.sink.take();

        assert!(h.controller.ingest(progress(&ticket, GenerationPhase::Analyzing, 20)));
        assert!(h.controller.ingest(progress(&ticket, GenerationPhase::Generating, 60)));
        assert!(h.controller.ingest(complete(&ticket)));

        let events = h.sink.take();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[2], BridgeEvent::Complete { result, .. }
            if result.document["features"][0] == "search"));

        let status = h.controller.status(&identity);
        assert_eq!(status.phase, GenerationPhase::Complete);
        assert_eq!(status.progress, 100);
        assert!(!h.controller.is_running(&identity));
    }

    #[tokio::test]
    async fn test_refresh_after_complete_restarts_at_low_progress() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket = h.executor.last_ticket();
        finish(&h.controller, &ticket);
        h.sink.take();

        h.controller
            .refresh(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();

        let status = h.controller.status(&identity);
        assert_eq!(status.phase, GenerationPhase::Analyzing);
        assert!(status.progress < 100);
        assert_eq!(status.message, JobKind::Roadmap.started_message(true));

        let started = h.executor.started.lock().unwrap();
        assert_eq!(started.len(), 2);
        assert!(!started[0].1);
        assert!(started[1].1);
        assert_ne!(started[0].0, started[1].0);
    }

    #[tokio::test]
    async fn test_stop_emits_stopped_once_and_resets_to_idle() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        h.sink.take();

        assert_eq!(h.controller.stop(&identity).await, Ok(true));
        assert_eq!(
            h.sink.take(),
            vec![BridgeEvent::Stopped {
                identity: identity.clone()
            }]
        );
        assert!(h.controller.status(&identity).is_idle());

        // Nothing left to stop
        assert_eq!(h.controller.stop(&identity).await, Ok(false));
        assert!(h.sink.take().is_empty());
        assert_eq!(h.executor.stopped.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_run_returns_false() {
        let h = setup();
        assert_eq!(
            h.controller.stop(&JobIdentity::ideation("p1")).await,
            Ok(false)
        );
        assert!(h.sink.take().is_empty());
        assert!(h.executor.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reports_after_stop_are_stale() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket = h.executor.last_ticket();
        h.controller.stop(&identity).await.unwrap();
        h.sink.take();

        assert!(!h.controller.ingest(progress(&ticket, GenerationPhase::Generating, 70)));
        assert!(!h.controller.ingest(complete(&ticket)));

        assert!(h.sink.take().is_empty());
        assert!(h.controller.status(&identity).is_idle());
    }

    #[tokio::test]
    async fn test_stop_declined_by_executor_keeps_run() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket = h.executor.last_ticket();
        h.sink.take();
        h.executor.answer_stop_with(Ok(false));

        assert_eq!(h.controller.stop(&identity).await, Ok(false));
        assert!(h.sink.take().is_empty());

        // The run's own terminal report still lands
        finish(&h.controller, &ticket);
        assert_eq!(
            h.controller.status(&identity).phase,
            GenerationPhase::Complete
        );
    }

    #[tokio::test]
    async fn test_stop_with_boundary_gone_is_an_error() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        h.executor
            .answer_stop_with(Err(ExecutorError::Unavailable("gone".to_string())));

        assert_eq!(
            h.controller.stop(&identity).await,
            Err(ControllerError::BoundaryUnavailable("gone".to_string()))
        );
        assert!(h.controller.is_running(&identity));
    }

    #[tokio::test]
    async fn test_jobs_are_isolated_by_identity() {
        let h = setup();
        let a = JobIdentity::roadmap("a");
        let b = JobIdentity::roadmap("b");
        h.controller
            .start(a.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket_a = h.executor.last_ticket();
        h.controller
            .start(b.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket_b = h.executor.last_ticket();

        finish(&h.controller, &ticket_a);
        h.controller
            .ingest(progress(&ticket_b, GenerationPhase::Generating, 40));

        assert_eq!(h.controller.status(&a).phase, GenerationPhase::Complete);
        let status_b = h.controller.status(&b);
        assert_eq!(status_b.phase, GenerationPhase::Generating);
        assert_eq!(status_b.progress, 40);

        // Same project, other kind: untouched
        assert!(h.controller.status(&JobIdentity::ideation("a")).is_idle());
    }

    #[tokio::test]
    async fn test_unknown_project_emits_single_error() {
        let h = setup();
        let identity = JobIdentity::roadmap("missing");

        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();

        let events = h.sink.take();
        assert_eq!(events.len(), 1);
        match &events[0] {
            BridgeEvent::Error { identity: id, error } => {
                assert_eq!(id, &identity);
                assert!(!error.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let status = h.controller.status(&identity);
        assert_eq!(status.phase, GenerationPhase::Error);
        assert!(status.is_consistent());
        assert!(h.executor.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_supersedes_live_run() {
        let h = setup();
        let identity = JobIdentity::ideation("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let first = h.executor.last_ticket();
        h.controller
            .ingest(progress(&first, GenerationPhase::Generating, 60));
        h.sink.take();

        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let second = h.executor.last_ticket();

        assert_eq!(*h.executor.stopped.lock().unwrap(), vec![identity.clone()]);
        let events = h.sink.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BridgeEvent::Progress { status, .. }
            if status.phase == GenerationPhase::Analyzing && status.progress == 10));

        // The superseded run can no longer move the status
        assert!(!h.controller.ingest(complete(&first)));
        assert!(h.controller.ingest(progress(&second, GenerationPhase::Analyzing, 20)));
        assert_eq!(h.controller.status(&identity).progress, 20);
    }

    #[tokio::test]
    async fn test_unavailable_executor_returns_subscribers_to_idle() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.executor
            .fail_start_with(ExecutorError::Unavailable("offline".to_string()));

        let result = h
            .controller
            .start(identity.clone(), GenerationConfig::default())
            .await;

        assert!(matches!(result, Err(ControllerError::BoundaryUnavailable(_))));
        assert!(h.controller.status(&identity).is_idle());
        assert!(!h.controller.is_running(&identity));

        let events = h.sink.take();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BridgeEvent::Progress { status, .. }
            if status.phase == GenerationPhase::Analyzing));
        assert_eq!(
            events[1],
            BridgeEvent::Stopped {
                identity: identity.clone()
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_start_becomes_error_event() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.executor
            .fail_start_with(ExecutorError::Rejected("quota exhausted".to_string()));

        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();

        let events = h.sink.take();
        assert!(matches!(events.last(), Some(BridgeEvent::Error { error, .. })
            if error == "quota exhausted"));
        let status = h.controller.status(&identity);
        assert_eq!(status.phase, GenerationPhase::Error);
        assert_eq!(status.progress, 10);
    }

    #[tokio::test]
    async fn test_progress_never_moves_backwards() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket = h.executor.last_ticket();

        h.controller
            .ingest(progress(&ticket, GenerationPhase::Generating, 50));
        h.controller
            .ingest(progress(&ticket, GenerationPhase::Generating, 30));

        assert_eq!(h.controller.status(&identity).progress, 50);
    }

    #[tokio::test]
    async fn test_reported_status_is_normalised() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket = h.executor.last_ticket();
        h.sink.take();

        let accepted = h.controller.ingest(ExecutorUpdate {
            ticket: ticket.clone(),
            report: ExecutorReport::Progress(GenerationStatus {
                phase: GenerationPhase::Generating,
                progress: 250,
                message: "x".to_string(),
                error: Some("oops".to_string()),
            }),
        });
        assert!(accepted);

        let expected = GenerationStatus::in_phase(GenerationPhase::Generating, 100, "x");
        assert_eq!(expected.error, None);
        assert_eq!(h.controller.status(&identity), expected);
        assert_eq!(
            h.sink.take(),
            vec![BridgeEvent::Progress {
                identity: identity.clone(),
                status: expected,
            }]
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_is_discarded() {
        let h = setup();
        let identity = JobIdentity::roadmap("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket = h.executor.last_ticket();
        h.controller
            .ingest(progress(&ticket, GenerationPhase::Generating, 50));
        h.sink.take();

        assert!(!h.controller.ingest(progress(&ticket, GenerationPhase::Analyzing, 60)));
        assert!(h.sink.take().is_empty());
        assert_eq!(
            h.controller.status(&identity).phase,
            GenerationPhase::Generating
        );
    }

    #[tokio::test]
    async fn test_executor_error_keeps_last_progress() {
        let h = setup();
        let identity = JobIdentity::ideation("p1");
        h.controller
            .start(identity.clone(), GenerationConfig::default())
            .await
            .unwrap();
        let ticket = h.executor.last_ticket();
        h.controller
            .ingest(progress(&ticket, GenerationPhase::Generating, 45));

        h.controller.ingest(ExecutorUpdate {
            ticket: ticket.clone(),
            report: ExecutorReport::Error("model overloaded".to_string()),
        });

        let status = h.controller.status(&identity);
        assert_eq!(status.phase, GenerationPhase::Error);
        assert_eq!(status.progress, 45);
        assert_eq!(status.error.as_deref(), Some("model overloaded"));
        assert!(!h.controller.is_running(&identity));
    }

    #[test]
    fn test_initial_progress_is_clamped() {
        let resolver = Arc::new(InMemoryProjectResolver::new());
        let executor = Arc::new(FakeExecutor::default());
        let sink: Arc<dyn EventSink> = Arc::new(RecordingSink::default());

        let low = JobController::new(resolver.clone(), executor.clone(), sink.clone())
            .with_initial_progress(0);
        assert_eq!(low.initial_progress, 1);
        let high = JobController::new(resolver, executor, sink).with_initial_progress(100);
        assert_eq!(high.initial_progress, 99);
    }
}
